//! タスク間受け渡しレジスタ
//!
//! CAN受信・制御ティック・CAN送信は優先度が異なります。各レジスタの書き込み側は
//! 1つだけで、`Cell` をブロッキングMutexで包んでいるため、読み出し側は常に
//! 値全体を受け取ります（複数バイトのフレームが途中で混ざることはない）。
//!
//! RawMutexはジェネリック。ファームウェアは `CriticalSectionRawMutex` で
//! static配置し、ホストテストは `NoopRawMutex` を使います。

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_can::Frame;

use crate::actuation::ActuationOutput;
use crate::can_protocol::{
    can_ids, decode_command, Command, CommandFrame, DecodeError, RawFrame, SpecialCommand,
};
use crate::fault::FaultState;
use crate::telemetry::DebugFields;

/// CANトランスポートの状態（CANタスクが書き込み）
///
/// どちらもレベル判定。次の送信成功／エラーなし受信でCANタスクがクリアする。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportHealth {
    /// 直近のステータスフレームを送信キューに積めなかった
    pub send_failed: bool,
    /// バスオフ／エラーパッシブ／プロトコルエラー
    pub bus_error: bool,
}

/// 直近ティックのうち送信側が必要とする値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusSnapshot {
    pub adc: [u16; 2],
    pub override_active: bool,
    pub state: FaultState,
    /// 動作モードのステータスCAN ID（`None` = 送信しない）
    pub status_id: Option<u16>,
    pub output: ActuationOutput,
    /// スナップショットを生成した制御ティック
    pub tick: u32,
}

impl StatusSnapshot {
    pub const fn new() -> Self {
        Self {
            adc: [0, 0],
            override_active: false,
            state: FaultState::Startup,
            status_id: None,
            output: ActuationOutput::centered(),
            tick: 0,
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// 前回の取り出し以降に受信したコマンドID上のフレーム
///
/// 受信時にデコード済み。棄却フレームは有効コマンドを上書きしない。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingCommands {
    /// ブートローダ指令（後続の制御コマンドで消えない）
    pub directive: Option<SpecialCommand>,
    /// 最新の有効な制御コマンド
    pub command: Option<CommandFrame>,
    /// `command` より後に受信した棄却フレームの理由
    pub rejected: Option<DecodeError>,
    /// 棄却フレーム数
    pub rejections: u32,
}

impl PendingCommands {
    fn record(&mut self, result: Result<Command, DecodeError>) {
        match result {
            Ok(Command::Special(kind)) => self.directive = Some(kind),
            Ok(Command::Control(cmd)) => {
                self.command = Some(cmd);
                self.rejected = None;
            }
            Err(e) => {
                self.rejected = Some(e);
                self.rejections = self.rejections.wrapping_add(1);
            }
        }
    }
}

/// 受信側 → 制御ティックのメールボックス
///
/// コマンドIDのフレームはここでデコードし、有効な最新コマンドと棄却情報を
/// 別々に保持します。監視対象の車速IDはフラグを立てるだけ。
pub struct FrameMailbox<M: RawMutex> {
    pending: Mutex<M, Cell<PendingCommands>>,
    watched_id: Mutex<M, Cell<Option<u16>>>,
    watched_seen: Mutex<M, Cell<bool>>,
}

impl<M: RawMutex> FrameMailbox<M> {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(PendingCommands {
                directive: None,
                command: None,
                rejected: None,
                rejections: 0,
            })),
            watched_id: Mutex::new(Cell::new(None)),
            watched_seen: Mutex::new(Cell::new(false)),
        }
    }

    /// 受信側: フレームを振り分ける
    ///
    /// # Returns
    /// フレームを保持した場合 `true`
    pub fn post(&self, frame: &impl Frame) -> bool {
        let Some(raw) = RawFrame::from_frame(frame) else {
            return false;
        };
        let Some(id) = raw.standard_id() else {
            return false;
        };

        if id == can_ids::COMMAND {
            let result = decode_command(raw.data());
            self.pending.lock(|c| {
                let mut pending = c.get();
                pending.record(result);
                c.set(pending);
            });
            true
        } else if self.watched_id.lock(|c| c.get()) == Some(id) {
            self.watched_seen.lock(|c| c.set(true));
            true
        } else {
            false
        }
    }

    /// ティック側: 溜まったコマンドをまとめて取り出す
    pub fn take_commands(&self) -> PendingCommands {
        self.pending.lock(|c| c.take())
    }

    /// ティック側: 監視する車速IDを設定（`None` で監視停止）
    pub fn watch(&self, id: Option<u16>) {
        self.watched_id.lock(|c| c.set(id));
        self.watched_seen.lock(|c| c.set(false));
    }

    /// ティック側: 前回以降に監視IDのフレームを受信したか
    pub fn take_watched(&self) -> bool {
        self.watched_seen.lock(|c| c.replace(false))
    }
}

impl<M: RawMutex> Default for FrameMailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// 書き込み側1つの単一値レジスタ
pub struct Register<M: RawMutex, T: Copy> {
    value: Mutex<M, Cell<T>>,
}

impl<M: RawMutex, T: Copy> Register<M, T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: Mutex::new(Cell::new(value)),
        }
    }

    pub fn publish(&self, value: T) {
        self.value.lock(|c| c.set(value));
    }

    pub fn read(&self) -> T {
        self.value.lock(|c| c.get())
    }

    /// ロック内で読み出し・更新・書き込み
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.value.lock(|c| c.set(f(c.get())));
    }
}

/// 制御ティック → CAN送信
pub type StatusRegister<M> = Register<M, StatusSnapshot>;

/// CANタスク → 制御ティック
pub type HealthRegister<M> = Register<M, TransportHealth>;

/// 制御ティック → テレメトリ（最新行のみ保持）
pub type TelemetrySignal<M> = Signal<M, DebugFields>;

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embedded_can::StandardId;

    use crate::can_protocol::{encode_command, BOOTLOADER_HARD};

    fn frame(id: u16, data: &[u8]) -> RawFrame {
        RawFrame::new(StandardId::new(id).unwrap(), data).unwrap()
    }

    #[test]
    fn test_mailbox_keeps_latest_command() {
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        let first = encode_command(1, -1, true, 0);
        let second = encode_command(2, -2, true, 1);

        assert!(mailbox.post(&frame(0x300, &first)));
        assert!(mailbox.post(&frame(0x300, &second)));

        let pending = mailbox.take_commands();
        assert_eq!(pending.command.map(|c| c.target0), Some(2));
        assert_eq!(pending.rejected, None);
        assert_eq!(mailbox.take_commands(), PendingCommands::default());
    }

    #[test]
    fn test_corrupt_frame_keeps_pending_command() {
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        let valid = encode_command(100, -100, true, 0);
        let mut corrupt = encode_command(100, -100, true, 1);
        corrupt[0] ^= 0x01;

        mailbox.post(&frame(0x300, &valid));
        mailbox.post(&frame(0x300, &corrupt));

        let pending = mailbox.take_commands();
        assert_eq!(pending.command.map(|c| c.target0), Some(100));
        assert!(matches!(pending.rejected, Some(DecodeError::BadChecksum { .. })));
        assert_eq!(pending.rejections, 1);
    }

    #[test]
    fn test_valid_frame_supersedes_rejection() {
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        mailbox.post(&frame(0x300, &[1, 2, 3]));
        mailbox.post(&frame(0x300, &encode_command(5, 0, false, 0)));

        let pending = mailbox.take_commands();
        assert_eq!(pending.command.map(|c| c.target0), Some(5));
        assert_eq!(pending.rejected, None);
        assert_eq!(pending.rejections, 1);
    }

    #[test]
    fn test_directive_survives_later_command() {
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        mailbox.post(&frame(0x300, &BOOTLOADER_HARD));
        mailbox.post(&frame(0x300, &encode_command(0, 0, false, 0)));

        let pending = mailbox.take_commands();
        assert_eq!(pending.directive, Some(SpecialCommand::HardBootloader));
        assert!(pending.command.is_some());
    }

    #[test]
    fn test_mailbox_watched_id() {
        let mailbox = FrameMailbox::<NoopRawMutex>::new();
        assert!(!mailbox.post(&frame(0x1D0, &[0; 8])));

        mailbox.watch(Some(0x1D0));
        assert!(!mailbox.take_watched());
        assert!(mailbox.post(&frame(0x1D0, &[0; 8])));
        assert!(!mailbox.post(&frame(0x1D1, &[0; 8])));
        assert!(mailbox.take_watched());
        assert!(!mailbox.take_watched());
    }

    #[test]
    fn test_register_roundtrip() {
        let health = HealthRegister::<NoopRawMutex>::new(TransportHealth::default());
        health.update(|h| TransportHealth {
            bus_error: true,
            ..h
        });
        assert!(health.read().bus_error);
        assert!(!health.read().send_failed);

        let status = StatusRegister::<NoopRawMutex>::new(StatusSnapshot::new());
        assert_eq!(status.read().state, FaultState::Startup);
    }
}
