//! 制御ティックタスク
//!
//! 固定周期でセンサ読み取り → 判定 → 出力を実行します。
//! 判断はすべて `interceptor_core::Controller` が行い、ここはペリフェラルとの橋渡しのみ。

use embassy_time::{Duration, Ticker, TICK_HZ};
use interceptor_core::config::{DeviceConfig, DEFAULT_TICK_HZ};
use interceptor_core::{Controller, ControllerEvent};

use crate::bootloader;
use crate::fmt::*;
use crate::hardware::{ActuatorDac, SensorAdc};
use crate::state::{FRAMES, HEALTH, STATUS, TELEMETRY};

/// タイマ分解能で丸めた実際のティック周期 [Hz]
///
/// 32.768kHzのタイムベースでは732Hzちょうどにならないため、
/// ウォッチドッグのティック数はこの値でスケーリングする。
const CONTROL_TICK_HZ: u32 = (TICK_HZ / (TICK_HZ / DEFAULT_TICK_HZ as u64)) as u32;

/// 制御ティックタスク
#[embassy_executor::task]
pub async fn control_task(config: DeviceConfig, mut sensors: SensorAdc, mut outputs: ActuatorDac) {
    info!("Control task started ({} Hz)", CONTROL_TICK_HZ);

    let mut controller = Controller::new(config, CONTROL_TICK_HZ);

    // 起動時は中立出力（リレー開）
    controller.force_neutral(&mut outputs);

    let mut ticker = Ticker::every(Duration::from_hz(DEFAULT_TICK_HZ as u64));

    loop {
        ticker.next().await;

        // 受信済みフレームを取り込み（ブートローダ指令はステートマシンを経由しない）
        if let Some(ControllerEvent::EnterBootloader(kind)) = controller.poll_mailbox(&FRAMES) {
            controller.force_neutral(&mut outputs);
            bootloader::enter(kind);
        }

        let report = controller.tick(&mut sensors, HEALTH.read(), &mut outputs);
        STATUS.publish(report.snapshot);

        if let Some(fields) = report.debug {
            TELEMETRY.signal(fields);
        }
    }
}
