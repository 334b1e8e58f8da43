//! CAN通信タスク
//!
//! コマンドフレームの受信とステータスフレームの送信を行います。
//! 受信フレームは受け渡しレジスタへ書き込むだけで、解釈は制御タスク側で行う。

use embassy_stm32::can;
use embassy_time::{with_timeout, Duration, Ticker};
use embedded_can::StandardId;
use interceptor_core::config::DEFAULT_STATUS_HZ;
use interceptor_core::state::TransportHealth;
use interceptor_core::StatusTransmitter;

use crate::fmt::*;
use crate::state::{FRAMES, HEALTH, STATUS};

/// 送信キューが空かない場合に送信失敗とみなす時間
const SEND_TIMEOUT: Duration = Duration::from_millis(5);

/// CAN通信タスク - コマンド受信とステータス送信
#[embassy_executor::task]
pub async fn can_task(can: can::Can<'static>) {
    let (mut tx, mut rx, _properties) = can.split();

    info!("CAN task started");

    // ステータス送信用タイマー（制御ティックとは独立）
    let mut status_ticker = Ticker::every(Duration::from_hz(DEFAULT_STATUS_HZ as u64));
    let mut transmitter = StatusTransmitter::new();

    loop {
        // CANフレーム受信とステータス送信を並行処理
        embassy_futures::select::select(
            async {
                match rx.read().await {
                    Ok(envelope) => {
                        FRAMES.post(&envelope.frame);
                        HEALTH.update(|h| TransportHealth {
                            bus_error: false,
                            ..h
                        });
                    }
                    Err(_e) => {
                        debug!("CAN RX error: {:?}", _e);
                        HEALTH.update(|h| TransportHealth {
                            bus_error: true,
                            ..h
                        });
                    }
                }
            },
            async {
                status_ticker.next().await;

                let snapshot = STATUS.read();
                let Some((id, data)) = transmitter.prepare(&snapshot) else {
                    return;
                };
                let Some(std_id) = StandardId::new(id) else {
                    return;
                };
                let Ok(frame) = can::frame::Frame::new_data(std_id, &data) else {
                    return;
                };

                let sent = with_timeout(SEND_TIMEOUT, tx.write(&frame)).await.is_ok();
                if sent {
                    transmitter.commit();
                } else {
                    debug!("Status frame not queued");
                }
                HEALTH.update(|h| TransportHealth {
                    send_failed: !sent,
                    ..h
                });
            },
        )
        .await;
    }
}
