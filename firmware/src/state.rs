//! グローバル共有状態管理
//!
//! タスク間の受け渡しレジスタ。CAN受信・制御ティック・CAN送信・テレメトリは
//! 優先度が異なるため、すべてクリティカルセクションで保護します。
//! 各レジスタの書き込み側は1タスクのみ。

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use interceptor_core::state::{
    FrameMailbox, HealthRegister, StatusRegister, StatusSnapshot, TelemetrySignal, TransportHealth,
};

/// 受信フレーム（CANタスク → 制御タスク）
pub static FRAMES: FrameMailbox<CriticalSectionRawMutex> = FrameMailbox::new();

/// ステータススナップショット（制御タスク → CANタスク）
pub static STATUS: StatusRegister<CriticalSectionRawMutex> = StatusRegister::new(StatusSnapshot::new());

/// 送信/バス状態（CANタスク → 制御タスク）
pub static HEALTH: HealthRegister<CriticalSectionRawMutex> = HealthRegister::new(TransportHealth {
    send_failed: false,
    bus_error: false,
});

/// デバッグ行（制御タスク → テレメトリタスク）
pub static TELEMETRY: TelemetrySignal<CriticalSectionRawMutex> = Signal::new();
