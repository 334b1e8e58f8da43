//! 永続化される設定レコード
//!
//! リトルエンディアン固定レイアウト。設定ツールが最終フラッシュページに書き込み、
//! 起動時に読み戻します。
//!
//! | Offset | Size | Field |
//! | ------ | ---- | ----- |
//! | 0      | 4    | magic `"ICF1"` |
//! | 4      | 2    | version |
//! | 6      | 1    | debug_level |
//! | 7      | 1    | flags (bit0 can_output_enable, bit1 watchdog_enable, bit2 override_latch, bit3 validation_required) |
//! | 8      | 1    | mode |
//! | 9      | 1    | reserved |
//! | 10     | 2    | override_threshold |
//! | 12     | 2    | vss_can_id |
//! | 14     | 8    | channel 0 (present, center_or_max, unused_or_min, tolerance, enabled) |
//! | 22     | 8    | channel 1 |
//! | 30     | 2    | reserved |
//! | 32     | 4    | CRC-32 of bytes 0..32 |
//! | 36     | 4    | padding (flash double-word alignment) |

use core::fmt;

use super::{DeviceConfig, OperatingMode, ValidationRange};

/// 設定データのマジックナンバー（"ICF1"のASCII）
pub const CONFIG_MAGIC: u32 = 0x3146_4349;

/// 現在の設定バージョン
pub const CONFIG_VERSION: u16 = 1;

/// レコード全長 [バイト]
pub const RECORD_LEN: usize = 40;

/// CRC対象のバイト数
const CRC_COVERED: usize = 32;

const CHANNEL_OFFSETS: [usize; 2] = [14, 22];

const FLAG_CAN_OUTPUT: u8 = 0x01;
const FLAG_WATCHDOG: u8 = 0x02;
const FLAG_OVERRIDE_LATCH: u8 = 0x04;
const FLAG_VALIDATION_REQUIRED: u8 = 0x08;

/// CRC-32計算器
///
/// ファームウェアではCRCペリフェラルで実装。標準CRC-32と同じ値を返せば何でもよい。
pub trait ConfigCrc {
    fn crc32(&mut self, data: &[u8]) -> u32;
}

/// レコード検証エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// 1レコード分に満たない
    InvalidSize(usize),
    /// マジックナンバー不一致（未書き込み、または別用途のページ）
    InvalidMagic(u32),
    /// バージョン不一致
    VersionMismatch(u16),
    /// CRC不一致
    CrcMismatch { stored: u32, computed: u32 },
    /// 未知の動作モード
    InvalidMode(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidSize(len) => write!(f, "record too short ({} bytes)", len),
            ConfigError::InvalidMagic(magic) => write!(f, "bad magic 0x{:08X}", magic),
            ConfigError::VersionMismatch(v) => write!(f, "unsupported version {}", v),
            ConfigError::CrcMismatch { stored, computed } => write!(
                f,
                "CRC mismatch (stored 0x{:08X}, computed 0x{:08X})",
                stored, computed
            ),
            ConfigError::InvalidMode(m) => write!(f, "unknown mode {}", m),
        }
    }
}

/// エンコード済み設定レコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredConfig {
    bytes: [u8; RECORD_LEN],
}

impl StoredConfig {
    /// `config` をシリアライズしてCRCを付加
    pub fn encode(config: &DeviceConfig, crc: &mut impl ConfigCrc) -> Self {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0..4].copy_from_slice(&CONFIG_MAGIC.to_le_bytes());
        bytes[4..6].copy_from_slice(&CONFIG_VERSION.to_le_bytes());
        bytes[6] = config.debug_level;

        let mut flags = 0u8;
        if config.can_output_enable {
            flags |= FLAG_CAN_OUTPUT;
        }
        if config.watchdog_enable {
            flags |= FLAG_WATCHDOG;
        }
        if config.override_latch {
            flags |= FLAG_OVERRIDE_LATCH;
        }
        if config.validation_required {
            flags |= FLAG_VALIDATION_REQUIRED;
        }
        bytes[7] = flags;
        bytes[8] = config.mode.into();
        bytes[10..12].copy_from_slice(&config.override_threshold.to_le_bytes());
        bytes[12..14].copy_from_slice(&config.vss_can_id.to_le_bytes());

        for (offset, range) in CHANNEL_OFFSETS.iter().zip(config.ranges.iter()) {
            if let Some(range) = range {
                let ch = &mut bytes[*offset..*offset + 8];
                ch[0] = 1;
                ch[1..3].copy_from_slice(&range.center_or_max.to_le_bytes());
                ch[3..5].copy_from_slice(&range.unused_or_min.to_le_bytes());
                ch[5..7].copy_from_slice(&range.tolerance.to_le_bytes());
                ch[7] = range.enabled as u8;
            }
        }

        let checksum = crc.crc32(&bytes[..CRC_COVERED]);
        bytes[CRC_COVERED..CRC_COVERED + 4].copy_from_slice(&checksum.to_le_bytes());

        Self { bytes }
    }

    /// フラッシュ書き込み用のバイト列
    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.bytes
    }

    /// フラッシュから読み戻したレコードを検証してパース
    pub fn decode(bytes: &[u8], crc: &mut impl ConfigCrc) -> Result<DeviceConfig, ConfigError> {
        let bytes: &[u8; RECORD_LEN] = bytes
            .get(..RECORD_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(ConfigError::InvalidSize(bytes.len()))?;

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != CONFIG_MAGIC {
            return Err(ConfigError::InvalidMagic(magic));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CONFIG_VERSION {
            return Err(ConfigError::VersionMismatch(version));
        }

        let stored = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        let computed = crc.crc32(&bytes[..CRC_COVERED]);
        if stored != computed {
            return Err(ConfigError::CrcMismatch { stored, computed });
        }

        let mode = OperatingMode::try_from(bytes[8]).map_err(|_| ConfigError::InvalidMode(bytes[8]))?;
        let flags = bytes[7];

        let mut ranges = [None, None];
        for (slot, offset) in ranges.iter_mut().zip(CHANNEL_OFFSETS) {
            let ch = &bytes[offset..offset + 8];
            if ch[0] != 0 {
                *slot = Some(ValidationRange {
                    center_or_max: u16::from_le_bytes([ch[1], ch[2]]),
                    unused_or_min: u16::from_le_bytes([ch[3], ch[4]]),
                    tolerance: u16::from_le_bytes([ch[5], ch[6]]),
                    enabled: ch[7] != 0,
                });
            }
        }

        Ok(DeviceConfig {
            debug_level: bytes[6],
            can_output_enable: flags & FLAG_CAN_OUTPUT != 0,
            watchdog_enable: flags & FLAG_WATCHDOG != 0,
            mode,
            override_threshold: u16::from_le_bytes([bytes[10], bytes[11]]),
            override_latch: flags & FLAG_OVERRIDE_LATCH != 0,
            validation_required: flags & FLAG_VALIDATION_REQUIRED != 0,
            vss_can_id: u16::from_le_bytes([bytes[12], bytes[13]]),
            ranges,
        })
    }
}

// フラッシュは8バイト（ダブルワード）単位で書き込み
const _: () = ::core::assert!(RECORD_LEN % 8 == 0, "record must be double-word aligned");

#[cfg(test)]
mod tests {
    use super::*;

    /// ペリフェラルの代わりのソフトウェアCRC-32
    struct SoftCrc;

    impl ConfigCrc for SoftCrc {
        fn crc32(&mut self, data: &[u8]) -> u32 {
            crc32fast::hash(data)
        }
    }

    fn sample() -> DeviceConfig {
        let mut config = DeviceConfig::differential(
            ValidationRange::centered(1538, 125),
            ValidationRange::centered(1579, 100),
        );
        config.debug_level = 1;
        config.override_latch = true;
        config.vss_can_id = 0x1D0;
        config
    }

    #[test]
    fn test_soft_crc_check_value() {
        assert_eq!(SoftCrc.crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_record_preserves_config() {
        let record = StoredConfig::encode(&sample(), &mut SoftCrc);
        let decoded = StoredConfig::decode(record.as_bytes(), &mut SoftCrc).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_uncommitted_channel_survives() {
        let mut config = sample();
        config.ranges[1] = None;
        let record = StoredConfig::encode(&config, &mut SoftCrc);
        let decoded = StoredConfig::decode(record.as_bytes(), &mut SoftCrc).unwrap();
        assert_eq!(decoded.ranges[1], None);
        assert!(decoded.adc_unconfigured());
    }

    #[test]
    fn test_erased_flash_rejected() {
        let erased = [0xFFu8; RECORD_LEN];
        assert_eq!(
            StoredConfig::decode(&erased, &mut SoftCrc),
            Err(ConfigError::InvalidMagic(0xFFFF_FFFF))
        );
    }

    #[test]
    fn test_corruption_rejected() {
        let record = StoredConfig::encode(&sample(), &mut SoftCrc);
        let mut bytes = *record.as_bytes();
        bytes[10] ^= 0x01;
        assert!(matches!(
            StoredConfig::decode(&bytes, &mut SoftCrc),
            Err(ConfigError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert_eq!(
            StoredConfig::decode(&[0u8; 12], &mut SoftCrc),
            Err(ConfigError::InvalidSize(12))
        );
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut config = sample();
        config.mode = OperatingMode::GasPedal;
        let record = StoredConfig::encode(&config, &mut SoftCrc);
        let mut bytes = *record.as_bytes();
        bytes[8] = 7;
        let crc = SoftCrc.crc32(&bytes[..32]);
        bytes[32..36].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(
            StoredConfig::decode(&bytes, &mut SoftCrc),
            Err(ConfigError::InvalidMode(7))
        );
    }
}
