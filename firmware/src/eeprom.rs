//! フラッシュメモリベースの設定読み出し
//!
//! STM32G431VBの最終フラッシュページ（ページ63）に設定ツールが書き込んだ
//! 設定レコードを読み込みます。

use core::fmt;

use embassy_stm32::{
    crc::{Config as CrcConfig, Crc, InputReverseConfig, PolySize},
    flash::{Blocking, Flash},
    Peri,
};
use interceptor_core::config::{
    storage::RECORD_LEN, ConfigCrc, ConfigError, DeviceConfig, StoredConfig,
};

use crate::fmt::*;

/// STM32G431VBのフラッシュページサイズ（2KB）
pub const FLASH_PAGE_SIZE: u32 = 2048;

/// 最終ページ番号（ページ63、0ベース）
pub const LAST_PAGE_NUMBER: u8 = 63;

/// 最終ページのフラッシュ先頭からのオフセット（128KB - 2KB）
pub const LAST_PAGE_OFFSET: u32 = 0x1F800;

/// EEPROM操作のエラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// フラッシュ読み取りエラー
    FlashReadError,

    /// レコード検証エラー（マジック、バージョン、CRC、モード）
    Record(ConfigError),
}

impl fmt::Display for EepromError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EepromError::FlashReadError => f.write_str("flash read failed"),
            EepromError::Record(e) => write!(f, "invalid config record: {}", e),
        }
    }
}

impl From<ConfigError> for EepromError {
    fn from(e: ConfigError) -> Self {
        EepromError::Record(e)
    }
}

/// CRCペリフェラルによるCRC-32（IEEE 802.3）
///
/// 入力バイト反転 + 出力反転 + 最終XORで、設定ツール側の標準CRC-32と一致させる。
pub struct PeripheralCrc {
    crc: Crc<'static>,
}

impl PeripheralCrc {
    pub fn new(peri: Peri<'static, embassy_stm32::peripherals::CRC>) -> Option<Self> {
        let config = CrcConfig::new(
            InputReverseConfig::Byte,
            true, // reverse_out
            PolySize::Width32,
            0xFFFF_FFFF, // crc_init_value
            0x04C1_1DB7, // crc_poly (CRC-32)
        )
        .ok()?;
        Some(Self {
            crc: Crc::new(peri, config),
        })
    }
}

impl ConfigCrc for PeripheralCrc {
    fn crc32(&mut self, data: &[u8]) -> u32 {
        self.crc.reset();
        !self.crc.feed_bytes(data)
    }
}

/// フラッシュメモリから設定を読み込む
///
/// # Returns
/// * `Ok(DeviceConfig)` - 読み込み成功
/// * `Err(EepromError)` - 読み込み失敗（未書き込み、CRCエラー、バージョン不一致など）
pub fn read_config(
    flash: &mut Flash<'_, Blocking>,
    crc: &mut impl ConfigCrc,
) -> Result<DeviceConfig, EepromError> {
    debug!(
        "Reading config from flash page {} (offset 0x{:05X})",
        LAST_PAGE_NUMBER, LAST_PAGE_OFFSET
    );

    let mut buffer = [0u8; RECORD_LEN];
    flash.blocking_read(LAST_PAGE_OFFSET, &mut buffer).map_err(|_e| {
        error!("Flash read failed: {:?}", _e);
        EepromError::FlashReadError
    })?;

    let config = StoredConfig::decode(&buffer, crc)?;
    info!(
        "Config loaded: mode={}, threshold={}, debug={}",
        u8::from(config.mode),
        config.override_threshold,
        config.debug_level
    );
    Ok(config)
}

/// 設定を読み込み、失敗時は未設定状態で起動
///
/// 校正値を推測せず、`FAULT_ADC_UNCONFIGURED` で設定ツールの書き込みを待つ。
pub fn load_or_unconfigured(flash: &mut Flash<'_, Blocking>, crc: &mut impl ConfigCrc) -> DeviceConfig {
    match read_config(flash, crc) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}, running unconfigured", e);
            DeviceConfig::unconfigured()
        }
    }
}

const _: () = ::core::assert!(
    RECORD_LEN as u32 <= FLASH_PAGE_SIZE,
    "config record exceeds one flash page"
);
