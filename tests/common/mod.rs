// Host-side stand-ins for the hardware the drivers talk to
//
// I2cSim models two open-drain lines with one slave device on them. The
// slave reacts to line edges the way a real one does: it samples on SCL
// rising, drives ACK and data on SCL falling, and resets on START/STOP.
// ChipSim models enough of an MCP2515 behind SPI for the driver: register
// file, READ/WRITE/BIT MODIFY, status, RX/TX buffer commands and INT.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal::spi::SpiBus;
use resumable_hal::kernel::Clock;

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

pub struct FakeClock(Cell<u32>);

impl FakeClock {
    pub fn new() -> Self {
        Self(Cell::new(0))
    }

    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

// ---------------------------------------------------------------- I2C

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlaveState {
    Idle,
    Receive { bits: u8, byte: u8, address: bool },
    AckOut { read: bool },
    Transmit { bits: u8, byte: u8 },
    AckIn { acked: bool },
    // keeps SDA low until the next falling SCL edge
    Hold,
    // not addressed, wait for START or STOP
    Ignore,
}

pub struct I2cSim {
    pub address: u8,
    pub memory: [u8; 256],
    pub pointer: u8,
    /// Data bytes received in write mode, pointer byte included.
    pub written: Vec<u8>,
    pub starts: u32,
    pub stops: u32,
    /// Something outside holds SDA low.
    pub stuck_sda: bool,
    /// Something outside holds SCL low.
    pub stuck_scl: bool,
    /// Data bytes in write mode are not acknowledged.
    pub nack_data: bool,
    /// After acknowledging a data byte the slave keeps SDA low for one
    /// more clock.
    pub hold_after_write: bool,
    /// A second master starts together with ours and sends zeros.
    pub rival: bool,
    rival_sda: bool,
    master_scl: bool,
    master_sda: bool,
    slave_sda: bool,
    first_data: bool,
    state: SlaveState,
    prev_scl: bool,
    prev_sda: bool,
}

impl I2cSim {
    pub fn new(address: u8) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            address,
            memory: [0; 256],
            pointer: 0,
            written: Vec::new(),
            starts: 0,
            stops: 0,
            stuck_sda: false,
            stuck_scl: false,
            nack_data: false,
            hold_after_write: false,
            rival: false,
            rival_sda: false,
            master_scl: true,
            master_sda: true,
            slave_sda: true,
            first_data: false,
            state: SlaveState::Idle,
            prev_scl: true,
            prev_sda: true,
        }))
    }

    pub fn pins(sim: &Rc<RefCell<Self>>) -> (SimLine, SimLine) {
        (
            SimLine {
                sim: sim.clone(),
                line: Line::Scl,
            },
            SimLine {
                sim: sim.clone(),
                line: Line::Sda,
            },
        )
    }

    pub fn scl(&self) -> bool {
        self.master_scl && !self.stuck_scl
    }

    pub fn sda(&self) -> bool {
        self.master_sda && self.slave_sda && !self.stuck_sda && !self.rival_sda
    }

    /// The master itself drives neither line.
    pub fn master_released(&self) -> bool {
        self.master_scl && self.master_sda
    }

    fn update(&mut self) {
        let scl = self.scl();
        let sda = self.sda();
        if scl && self.prev_scl && sda != self.prev_sda {
            if sda {
                self.stops += 1;
                self.slave_sda = true;
                self.state = SlaveState::Idle;
            } else {
                self.starts += 1;
                self.rival_sda = self.rival;
                self.slave_sda = true;
                self.state = SlaveState::Receive {
                    bits: 0,
                    byte: 0,
                    address: true,
                };
            }
        } else if scl && !self.prev_scl {
            self.rising(sda);
        } else if !scl && self.prev_scl {
            self.falling();
        }
        self.prev_scl = self.scl();
        self.prev_sda = self.sda();
    }

    fn rising(&mut self, sda: bool) {
        match &mut self.state {
            SlaveState::Receive { bits, byte, .. } if *bits < 8 => {
                *byte = (*byte << 1) | u8::from(sda);
                *bits += 1;
            }
            SlaveState::AckIn { acked } => *acked = !sda,
            _ => {}
        }
    }

    fn falling(&mut self) {
        match self.state {
            SlaveState::Receive {
                bits: 8,
                byte,
                address: true,
            } => {
                if byte >> 1 == self.address {
                    self.slave_sda = false;
                    self.first_data = true;
                    self.state = SlaveState::AckOut {
                        read: byte & 1 != 0,
                    };
                } else {
                    self.state = SlaveState::Ignore;
                }
            }
            SlaveState::Receive {
                bits: 8,
                byte,
                address: false,
            } => {
                if self.nack_data {
                    self.state = SlaveState::Ignore;
                    return;
                }
                if self.first_data {
                    self.pointer = byte;
                    self.first_data = false;
                } else {
                    self.memory[usize::from(self.pointer)] = byte;
                    self.pointer = self.pointer.wrapping_add(1);
                }
                self.written.push(byte);
                self.slave_sda = false;
                self.state = SlaveState::AckOut { read: false };
            }
            SlaveState::AckOut { read: false } if self.hold_after_write && !self.first_data => {
                self.state = SlaveState::Hold;
            }
            SlaveState::Hold => {
                self.slave_sda = true;
                self.state = SlaveState::Ignore;
            }
            SlaveState::AckOut { read: false } => {
                self.slave_sda = true;
                self.state = SlaveState::Receive {
                    bits: 0,
                    byte: 0,
                    address: false,
                };
            }
            SlaveState::AckOut { read: true } => self.load_byte(),
            SlaveState::Transmit { bits, byte } => {
                let bits = bits + 1;
                if bits == 8 {
                    self.slave_sda = true;
                    self.state = SlaveState::AckIn { acked: false };
                } else {
                    self.slave_sda = byte & (0x80 >> bits) != 0;
                    self.state = SlaveState::Transmit { bits, byte };
                }
            }
            SlaveState::AckIn { acked: true } => self.load_byte(),
            SlaveState::AckIn { acked: false } => {
                self.slave_sda = true;
                self.state = SlaveState::Ignore;
            }
            _ => {}
        }
    }

    fn load_byte(&mut self) {
        let byte = self.memory[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        self.slave_sda = byte & 0x80 != 0;
        self.state = SlaveState::Transmit { bits: 0, byte };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Scl,
    Sda,
}

/// One open-drain line as seen by the master.
pub struct SimLine {
    sim: Rc<RefCell<I2cSim>>,
    line: Line,
}

impl SimLine {
    fn drive(&mut self, high: bool) {
        let mut sim = self.sim.borrow_mut();
        match self.line {
            Line::Scl => sim.master_scl = high,
            Line::Sda => sim.master_sda = high,
        }
        sim.update();
    }
}

impl ErrorType for SimLine {
    type Error = Infallible;
}

impl OutputPin for SimLine {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.drive(true);
        Ok(())
    }
}

impl InputPin for SimLine {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        let sim = self.sim.borrow();
        Ok(match self.line {
            Line::Scl => sim.scl(),
            Line::Sda => sim.sda(),
        })
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

// ---------------------------------------------------------------- MCP2515

const CANSTAT: usize = 0x0e;
const CANCTRL: usize = 0x0f;
const CANINTE: usize = 0x2b;
const CANINTF: usize = 0x2c;
const TXREQ: u8 = 0x08;
const TX_CTRL: [usize; 3] = [0x30, 0x40, 0x50];
const RX_CTRL: [usize; 2] = [0x60, 0x70];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Command,
    ReadAddress,
    Read(usize),
    WriteAddress,
    Write(usize),
    Modify { step: u8, address: usize, mask: u8 },
    Status,
    ReadRx(usize),
    LoadTx(usize),
    Done,
}

pub struct ChipSim {
    pub regs: [u8; 128],
    pub resets: u32,
    /// Registers that ignore writes.
    pub read_only: Vec<u8>,
    /// CANSTAT does not follow CANCTRL.
    pub mode_locked: bool,
    /// TX buffer contents captured at request-to-send: SIDH..D7.
    pub sent: Vec<[u8; 13]>,
    selected: bool,
    frame: Frame,
    // flag cleared when the current READ RX frame ends
    rx_clear: Option<u8>,
}

impl ChipSim {
    pub fn new() -> Rc<RefCell<Self>> {
        let mut chip = Self {
            regs: [0; 128],
            resets: 0,
            read_only: Vec::new(),
            mode_locked: false,
            sent: Vec::new(),
            selected: false,
            frame: Frame::Done,
            rx_clear: None,
        };
        chip.power_on();
        Rc::new(RefCell::new(chip))
    }

    pub fn parts(chip: &Rc<RefCell<Self>>) -> (SimSpi, SimCs, SimInt) {
        (
            SimSpi { chip: chip.clone() },
            SimCs { chip: chip.clone() },
            SimInt { chip: chip.clone() },
        )
    }

    pub fn reg(&self, address: u8) -> u8 {
        self.regs[usize::from(address)]
    }

    /// Put a frame into receive buffer `n` and raise its flag.
    pub fn inject(&mut self, n: usize, id: [u8; 4], dlc: u8, data: &[u8]) {
        let base = RX_CTRL[n] + 1;
        self.regs[base..base + 4].copy_from_slice(&id);
        self.regs[base + 4] = dlc;
        self.regs[base + 5..base + 5 + data.len()].copy_from_slice(data);
        self.regs[CANINTF] |= 1 << n;
    }

    /// Finish every pending transmission.
    pub fn complete_tx(&mut self) {
        for ctrl in TX_CTRL {
            self.regs[ctrl] &= !TXREQ;
        }
    }

    pub fn txreq(&self, n: usize) -> bool {
        self.regs[TX_CTRL[n]] & TXREQ != 0
    }

    fn power_on(&mut self) {
        self.regs = [0; 128];
        self.regs[CANSTAT] = 0x80;
        self.regs[CANCTRL] = 0x87;
    }

    fn interrupt(&self) -> bool {
        self.regs[CANINTF] & self.regs[CANINTE] != 0
    }

    fn status(&self) -> u8 {
        let intf = self.regs[CANINTF];
        let mut status = intf & 0x03;
        for (n, ctrl) in TX_CTRL.iter().enumerate() {
            if self.regs[*ctrl] & TXREQ != 0 {
                status |= 1 << (2 + 2 * n);
            }
        }
        status
    }

    fn write(&mut self, address: usize, value: u8) {
        if address >= self.regs.len() || self.read_only.contains(&(address as u8)) {
            return;
        }
        self.regs[address] = value;
        if address == CANCTRL && !self.mode_locked {
            self.regs[CANSTAT] = (self.regs[CANSTAT] & !0xe0) | (value & 0xe0);
        }
    }

    fn select(&mut self) {
        self.selected = true;
        self.frame = Frame::Command;
    }

    fn deselect(&mut self) {
        if let Some(flag) = self.rx_clear.take() {
            self.regs[CANINTF] &= !flag;
        }
        self.selected = false;
        self.frame = Frame::Done;
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        if !self.selected {
            return 0xff;
        }
        match self.frame {
            Frame::Command => {
                self.frame = match byte {
                    0xc0 => {
                        self.resets += 1;
                        self.power_on();
                        Frame::Done
                    }
                    0x03 => Frame::ReadAddress,
                    0x02 => Frame::WriteAddress,
                    0x05 => Frame::Modify {
                        step: 0,
                        address: 0,
                        mask: 0,
                    },
                    0xa0 => Frame::Status,
                    b if b & 0xf9 == 0x90 => {
                        let n = usize::from((b >> 2) & 1);
                        self.rx_clear = Some(1 << n);
                        Frame::ReadRx(RX_CTRL[n] + 1)
                    }
                    b if b & 0xf8 == 0x40 => Frame::LoadTx(TX_CTRL[usize::from((b >> 1) & 3)] + 1),
                    b if b & 0xf8 == 0x80 => {
                        for (n, ctrl) in TX_CTRL.iter().enumerate() {
                            if b & (1 << n) != 0 {
                                self.regs[*ctrl] |= TXREQ;
                                let mut raw = [0u8; 13];
                                raw.copy_from_slice(&self.regs[ctrl + 1..ctrl + 14]);
                                self.sent.push(raw);
                            }
                        }
                        Frame::Done
                    }
                    _ => Frame::Done,
                };
                0xff
            }
            Frame::ReadAddress => {
                self.frame = Frame::Read(usize::from(byte));
                0xff
            }
            Frame::Read(address) => {
                self.frame = Frame::Read(address + 1);
                self.regs.get(address).copied().unwrap_or(0xff)
            }
            Frame::WriteAddress => {
                self.frame = Frame::Write(usize::from(byte));
                0xff
            }
            Frame::Write(address) => {
                self.write(address, byte);
                self.frame = Frame::Write(address + 1);
                0xff
            }
            Frame::Modify { step, address, mask } => {
                self.frame = match step {
                    0 => Frame::Modify {
                        step: 1,
                        address: usize::from(byte),
                        mask,
                    },
                    1 => Frame::Modify {
                        step: 2,
                        address,
                        mask: byte,
                    },
                    _ => {
                        let value = (self.regs[address] & !mask) | (byte & mask);
                        self.write(address, value);
                        Frame::Done
                    }
                };
                0xff
            }
            Frame::Status => self.status(),
            Frame::ReadRx(address) => {
                self.frame = Frame::ReadRx(address + 1);
                self.regs[address]
            }
            Frame::LoadTx(address) => {
                self.regs[address] = byte;
                self.frame = Frame::LoadTx(address + 1);
                0xff
            }
            Frame::Done => 0xff,
        }
    }
}

pub struct SimSpi {
    chip: Rc<RefCell<ChipSim>>,
}

impl embedded_hal::spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiBus<u8> for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        for word in words {
            *word = chip.exchange(0xff);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        for &word in words {
            chip.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        for i in 0..read.len().max(write.len()) {
            let out = chip.exchange(write.get(i).copied().unwrap_or(0));
            if let Some(r) = read.get_mut(i) {
                *r = out;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        for word in words {
            *word = chip.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

pub struct SimCs {
    chip: Rc<RefCell<ChipSim>>,
}

impl ErrorType for SimCs {
    type Error = Infallible;
}

impl OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        if !chip.selected {
            chip.select();
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        if chip.selected {
            chip.deselect();
        }
        Ok(())
    }
}

pub struct SimInt {
    chip: Rc<RefCell<ChipSim>>,
}

impl ErrorType for SimInt {
    type Error = Infallible;
}

impl InputPin for SimInt {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.chip.borrow().interrupt())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.chip.borrow().interrupt())
    }
}
