//! LED制御タスク
//!
//! 状態表示用LED。正常時はゆっくり、フォルト時は速く点滅させます。

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

use crate::fmt::*;
use crate::state::STATUS;

/// LED制御タスク
///
/// * NO_FAULT: 500ms周期で点滅
/// * フォルト: 100ms周期で点滅
/// * アクチュエーション中: 2つ目のLEDを点灯
#[embassy_executor::task]
pub async fn led_task(mut heartbeat: Output<'static>, mut active: Output<'static>) {
    info!("LED task started");

    loop {
        let snapshot = STATUS.read();
        let period = if snapshot.state.is_fault() {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(500)
        };

        if snapshot.output.relay {
            active.set_high();
        } else {
            active.set_low();
        }

        heartbeat.toggle();
        Timer::after(period).await;
    }
}
