//! タイミング・しきい値・出力の設定パラメータ（デフォルト値）

/// 制御ティック周波数 [Hz]
pub const DEFAULT_TICK_HZ: u32 = 732;

/// ステータス送信周波数 [Hz]
pub const DEFAULT_STATUS_HZ: u32 = 732;

/// 有効コマンドなしでタイムアウトとするティック数（732 Hzで約1秒）
pub const DEFAULT_COMMAND_TIMEOUT_TICKS: u32 = 700;

/// 車速フレームなしでVSSタイムアウトとするティック数
pub const DEFAULT_VSS_TIMEOUT_TICKS: u32 = 700;

/// |adc0 - adc1| がこの値を超えるとドライバーのオーバーライドと判定
pub const DEFAULT_OVERRIDE_THRESHOLD: u16 = 336;

/// デバッグ行の出力間隔 [ティック]（732 Hzで約10 Hz）
pub const DEFAULT_DEBUG_DECIMATION: u32 = 73;

/// ADC/DAC分解能
pub mod analog {
    /// 12ビットの最大値
    pub const MAX_VALUE: u16 = 4095;

    /// 出力中点（差動モードの中立）
    pub const MIDPOINT: u16 = 2048;
}

/// CANバス設定
pub mod can {
    /// ビットレート（500 kbps）
    pub const DEFAULT_BITRATE: u32 = 500_000;
}

/// [`DEFAULT_TICK_HZ`] 基準のティック数を別の周波数に換算（実時間を保つ）
///
/// 0は返さない。
pub const fn scale_ticks(ticks: u32, tick_hz: u32) -> u32 {
    let scaled = (ticks as u64 * tick_hz as u64 + DEFAULT_TICK_HZ as u64 / 2) / DEFAULT_TICK_HZ as u64;
    if scaled == 0 {
        1
    } else if scaled > u32::MAX as u64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_ticks_identity() {
        assert_eq!(scale_ticks(DEFAULT_COMMAND_TIMEOUT_TICKS, DEFAULT_TICK_HZ), 700);
    }

    #[test]
    fn test_scale_ticks_double_rate() {
        assert_eq!(scale_ticks(700, 1464), 1400);
    }

    #[test]
    fn test_scale_ticks_never_zero() {
        assert_eq!(scale_ticks(1, 1), 1);
    }
}
