#![no_std]
#![no_main]

mod bootloader;
mod eeprom;
mod fmt;
mod hardware;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    can,
    dac::Dac,
    flash::Flash,
    gpio::{Level, Output, Speed},
    usart::{Config as UartConfig, UartTx},
};
use embassy_time::{Duration, Timer};
use interceptor_core::config::{can as can_params, DeviceConfig};

use fmt::*;
use hardware::{ActuatorDac, Irqs, SensorAdc};
use tasks::{can_task, control_task, led_task, telemetry_task};

/// デバッグUARTのボーレート
const TELEMETRY_BAUDRATE: u32 = 115_200;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ブートローダ要求があればペリフェラル初期化前に遷移
    bootloader::check_and_jump();

    // ハードウェア初期化
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("═══════════════════════════════════════════════════════════════════");
    info!("");
    info!("        Torque Interceptor • STM32G431VB @ 170MHz");
    info!("        CAN 0x300 → DAC1 CH1/CH2, status 0x301/0x201");
    info!("");
    info!("═══════════════════════════════════════════════════════════════════");

    // 出力段を先に中立化（リレー開、DAC中点）
    let relay = Output::new(p.PB5, Level::Low, Speed::Low);
    let (dac_ch1, dac_ch2) = Dac::new_blocking(p.DAC1, p.PA4, p.PA5).split();
    let outputs = ActuatorDac::new(dac_ch1, dac_ch2, relay);

    // 設定をフラッシュから読み込み（失敗時は未設定で起動）
    info!("Loading configuration from flash...");
    let device_config = {
        let mut flash = Flash::new_blocking(p.FLASH);
        match eeprom::PeripheralCrc::new(p.CRC) {
            Some(mut crc) => eeprom::load_or_unconfigured(&mut flash, &mut crc),
            None => {
                error!("CRC peripheral configuration rejected, running unconfigured");
                DeviceConfig::unconfigured()
            }
        }
    };

    // ADC初期化（PA0 = ADC1_IN1, PA1 = ADC1_IN2）
    let mut adc1 = Adc::new(p.ADC1);
    adc1.set_sample_time(SampleTime::CYCLES47_5);
    let sensors = SensorAdc::new(adc1, [p.PA0.degrade_adc(), p.PA1.degrade_adc()]);

    // LED初期化＆タスク起動
    let led1 = Output::new(p.PC13, Level::High, Speed::Low);
    let led2 = Output::new(p.PC14, Level::Low, Speed::Low);
    spawner.spawn(led_task(led1, led2)).unwrap();

    // デバッグUART（USART2 TX = PA2）
    if device_config.debug_level > 0 {
        let mut uart_config = UartConfig::default();
        uart_config.baudrate = TELEMETRY_BAUDRATE;
        match UartTx::new_blocking(p.USART2, p.PA2, uart_config) {
            Ok(uart) => spawner.spawn(telemetry_task(uart)).unwrap(),
            Err(_e) => error!("USART2 init failed: {:?}", _e),
        }
    }

    // CAN初期化＆タスク起動
    let mut can_configurator = can::CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);
    can_configurator.properties().set_standard_filter(
        can::filter::StandardFilterSlot::_0,
        can::filter::StandardFilter::accept_all_into_fifo0(),
    );
    can_configurator.set_bitrate(can_params::DEFAULT_BITRATE);
    let can = can_configurator.start(can::OperatingMode::NormalOperationMode);
    spawner.spawn(can_task(can)).unwrap();

    // 制御タスクを起動
    info!("Starting control loop...");
    spawner
        .spawn(control_task(device_config, sensors, outputs))
        .unwrap();

    // メインループ（将来の拡張用）
    loop {
        Timer::after(Duration::from_millis(100)).await;
    }
}
