//! デバッグテレメトリタスク
//!
//! 制御タスクから受け取ったステータスをUARTへテキスト行で出力します。
//! 読み取り専用のミラーであり、入力としては扱わない。

use embassy_stm32::{mode::Blocking, usart::UartTx};

use crate::fmt::*;
use crate::state::TELEMETRY;

/// テレメトリタスク - 最新のデバッグ行のみ送信（取りこぼしは許容）
#[embassy_executor::task]
pub async fn telemetry_task(mut uart: UartTx<'static, Blocking>) {
    info!("Telemetry task started");

    loop {
        let fields = TELEMETRY.wait().await;

        match fields.format() {
            Ok(line) => {
                if let Err(_e) = uart.blocking_write(line.as_bytes()) {
                    debug!("UART write failed: {:?}", _e);
                }
            }
            Err(_) => warn!("Debug line overflow"),
        }
    }
}
