//! GPIO |     Function    |      Notes
//! -----+-----------------+----------------------------------
//!  4   | I2C SDA         | Open drain, external 4.7k pullup
//!  5   | I2C SCL         | Open drain, external 4.7k pullup
//!  6   | CAN INT         | MCP2515 interrupt, active LOW
//!  7   | SPI2 MISO       | MCP2515 SO
//!  8   | SPI2 SCK        | Shared SPI clock
//! 10   | SPI2 MOSI       | MCP2515 SI
//! 21   | CAN CS          | MCP2515 chip select

// ----- Two-wire bus -----
pub const I2C_SDA: u8 = 4;
pub const I2C_SCL: u8 = 5;

// ----- CAN controller -----
pub const CAN_INT: u8 = 6;
pub const CAN_CS: u8 = 21;

// ----- SPI Bus -----
pub const SPI_SCK: u8 = 8;
pub const SPI_MOSI: u8 = 10;
pub const SPI_MISO: u8 = 7;
