// Cooperative resumable drivers for small microcontrollers
//
// kernel: resumable routines, protothreads, scheduler, timeouts
// drivers: bit-banged two-wire master, MCP2515 CAN controller
// board: ESP32-C3 wiring (riscv32 only)

#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "riscv32")]
pub mod board;
pub mod drivers;
pub mod kernel;
