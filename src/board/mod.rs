//! ESP32-C3 wiring for an MCP2515 CAN module and a bit-banged two-wire bus.
//!
//! Maps physical hardware to named subsystems so that application code
//! doesn't need to know GPIO numbers or peripheral details.

pub mod pins;

use esp_hal::{
    Blocking,
    delay::Delay,
    gpio::{DriveMode, Flex, Input, InputConfig, Level, Output, OutputConfig, Pull},
    peripherals::Peripherals,
    spi,
    time::Rate,
};

use crate::drivers::bitbang_i2c::BitBangI2cMaster;

pub const SPI_FREQ_MHZ: u32 = 8;
pub const I2C_BAUDRATE: u32 = 100_000;

/// Crystal on the common MCP2515 breakout modules.
pub const CAN_OSCILLATOR_HZ: u32 = 8_000_000;

// Type Aliases
pub type SpiBus = spi::master::Spi<'static, Blocking>;
pub type I2cBus = BitBangI2cMaster<Flex<'static>, Flex<'static>, Delay>;

/// CAN controller hardware: SPI bus plus the chip's own lines.
pub struct CanHw {
    pub spi: SpiBus,
    pub cs: Output<'static>,
    pub int: Input<'static>,
}

pub struct Board {
    pub can: CanHw,
    pub i2c: I2cBus,
}

impl Board {
    pub fn init(p: Peripherals) -> Self {
        let open_drain = OutputConfig::default()
            .with_drive_mode(DriveMode::OpenDrain)
            .with_pull(Pull::Up);

        let mut sda = Flex::new(p.GPIO4);
        sda.apply_output_config(&open_drain);
        sda.set_input_enable(true);
        sda.set_output_enable(true);

        let mut scl = Flex::new(p.GPIO5);
        scl.apply_output_config(&open_drain);
        scl.set_input_enable(true);
        scl.set_output_enable(true);

        let i2c = BitBangI2cMaster::new(scl, sda, Delay::new(), I2C_BAUDRATE);

        let cs = Output::new(p.GPIO21, Level::High, OutputConfig::default());
        let int = Input::new(p.GPIO6, InputConfig::default().with_pull(Pull::Up));

        let spi_cfg =
            spi::master::Config::default().with_frequency(Rate::from_mhz(SPI_FREQ_MHZ));
        let spi = spi::master::Spi::new(p.SPI2, spi_cfg)
            .unwrap()
            .with_sck(p.GPIO8)
            .with_mosi(p.GPIO10)
            .with_miso(p.GPIO7);

        Board {
            can: CanHw { spi, cs, int },
            i2c,
        }
    }
}
