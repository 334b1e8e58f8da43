//! ハードウェア初期化モジュール
//!
//! クロック設定、割り込みバインド、ADC/DAC/リレーのアダプタを集約します。

use embassy_stm32::{
    adc::{Adc, AnyAdcChannel},
    bind_interrupts, can,
    dac::{DacCh1, DacCh2, Value},
    gpio::Output,
    mode::Blocking,
    peripherals, Config,
};
use interceptor_core::actuation::AnalogOutputs;
use interceptor_core::sensor::SensorInputs;

// CANの割り込みをバインド
bind_interrupts!(pub struct Irqs {
    FDCAN1_IT0 => can::IT0InterruptHandler<peripherals::FDCAN1>;
    FDCAN1_IT1 => can::IT1InterruptHandler<peripherals::FDCAN1>;
});

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux, Fdcansel};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllQDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: Some(PllQDiv::DIV2), // FDCANクロック用
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        clock_mux.fdcansel = Fdcansel::PLL1_Q;
        config.rcc.mux = clock_mux;
    }
    config
}

/// トルクセンサ入力（ADC1、2チャネル）
pub struct SensorAdc {
    adc: Adc<'static, peripherals::ADC1>,
    channels: [AnyAdcChannel<peripherals::ADC1>; 2],
}

impl SensorAdc {
    pub fn new(
        adc: Adc<'static, peripherals::ADC1>,
        channels: [AnyAdcChannel<peripherals::ADC1>; 2],
    ) -> Self {
        Self { adc, channels }
    }
}

impl SensorInputs for SensorAdc {
    fn read_pair(&mut self) -> [u16; 2] {
        let [ch0, ch1] = &mut self.channels;
        [self.adc.blocking_read(ch0), self.adc.blocking_read(ch1)]
    }
}

/// アクチュエータ出力（DAC1 CH1/CH2 + リレー）
///
/// リレーはHighで閉（DAC出力をアクチュエータへ接続）。
pub struct ActuatorDac {
    ch1: DacCh1<'static, peripherals::DAC1, Blocking>,
    ch2: DacCh2<'static, peripherals::DAC1, Blocking>,
    relay: Output<'static>,
}

impl ActuatorDac {
    pub fn new(
        ch1: DacCh1<'static, peripherals::DAC1, Blocking>,
        ch2: DacCh2<'static, peripherals::DAC1, Blocking>,
        relay: Output<'static>,
    ) -> Self {
        Self { ch1, ch2, relay }
    }
}

impl AnalogOutputs for ActuatorDac {
    fn write_dac(&mut self, dac0: u16, dac1: u16) {
        self.ch1.set(Value::Bit12Right(dac0));
        self.ch2.set(Value::Bit12Right(dac1));
    }

    fn set_relay(&mut self, closed: bool) {
        if closed {
            self.relay.set_high();
        } else {
            self.relay.set_low();
        }
    }
}
