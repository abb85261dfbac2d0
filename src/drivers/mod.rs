// Bus protocol engines and chip drivers, board-independent.
//
// Pins, buses, delays and clocks come in as embedded-hal / kernel traits;
// only the wiring (in board/) is board-specific.

pub mod bitbang_i2c;
pub mod can;
pub mod i2c;
pub mod i2c_device;
pub mod mcp2515;
pub mod spi;
