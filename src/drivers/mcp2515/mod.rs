// MCP2515 stand-alone CAN controller on a shared SPI bus
//
// All chip access is resumable: every register access waits for the bus
// lease instead of blocking, the reset delay and mode changes are polled
// against the clock. update() is meant to be driven once per scheduler
// tick; it moves at most one frame each way between the chip and the
// software queues.
//
// Routine nesting is at most three deep: set_filters -> set_mode ->
// register access.

pub mod definitions;
pub mod timing;

pub use timing::{BitTiming, TimingError};

use core::fmt;

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiBus;
use log::{debug, info, warn};

use self::definitions::*;
use super::can::{MAX_DATA_LENGTH, Message, SIDL_SRR, decode_identifier, encode_identifier};
use super::spi::SharedSpiBus;
use crate::kernel::clock::Clock;
use crate::kernel::queue::BoundedQueue;
use crate::kernel::resumable::{Context, CoroutineResult, Resumable};
use crate::kernel::timer::Timeout;
use crate::{await_call, begin_routine};

// the chip needs 128 oscillator cycles after reset; this is generous
const RESET_WAIT_MS: u32 = 30;
const MODE_TIMEOUT_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// SPI transfer failed
    Bus,
    /// A register read back something else than written
    Readback { expected: u8, actual: u8 },
    /// Chip did not enter the requested mode in time
    ModeTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bus => write!(f, "spi transfer failed"),
            Error::Readback { expected, actual } => {
                write!(f, "readback {:#04x}, expected {:#04x}", actual, expected)
            }
            Error::ModeTimeout => write!(f, "mode change timed out"),
        }
    }
}

impl core::error::Error for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Sleep,
    Loopback,
    ListenOnly,
    Configuration,
}

impl Mode {
    pub const fn bits(self) -> u8 {
        match self {
            Mode::Normal => 0,
            Mode::Sleep => REQOP0,
            Mode::Loopback => REQOP1,
            Mode::ListenOnly => REQOP1 | REQOP0,
            Mode::Configuration => REQOP2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub identifier: u32,
    pub extended: bool,
}

impl Filter {
    pub const fn standard(identifier: u32) -> Self {
        Self {
            identifier,
            extended: false,
        }
    }

    pub const fn extended(identifier: u32) -> Self {
        Self {
            identifier,
            extended: true,
        }
    }

    const fn raw(&self) -> [u8; 4] {
        encode_identifier(self.identifier, self.extended)
    }
}

/// Acceptance filters RXF0..RXF5 and masks RXM0, RXM1. RXF0/RXF1 belong
/// to receive buffer 0, the rest to buffer 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    pub filters: [Filter; 6],
    pub masks: [Filter; 2],
}

impl FilterConfig {
    /// Zero masks: every frame passes.
    pub const fn accept_all() -> Self {
        Self {
            filters: [Filter::standard(0); 6],
            masks: [Filter::standard(0); 2],
        }
    }

    // three consecutive filters as laid out from RXFnSIDH
    fn filter_block(&self, first: usize) -> [u8; 12] {
        let mut out = [0u8; 12];
        for (chunk, filter) in out.chunks_exact_mut(4).zip(&self.filters[first..first + 3]) {
            chunk.copy_from_slice(&filter.raw());
        }
        out
    }

    fn mask_block(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        for (chunk, mask) in out.chunks_exact_mut(4).zip(&self.masks) {
            chunk.copy_from_slice(&mask.raw());
        }
        out
    }
}

mod routine {
    pub const INITIALIZE: u8 = 1;
    pub const UPDATE: u8 = 2;
    pub const SET_MODE: u8 = 3;
    pub const SET_FILTERS: u8 = 4;
    pub const RESET: u8 = 5;
    pub const READ_REGISTER: u8 = 6;
    pub const WRITE_REGISTERS: u8 = 7;
    pub const BIT_MODIFY: u8 = 8;
    pub const READ_STATUS: u8 = 9;
    pub const RECEIVE: u8 = 10;
    pub const TRANSMIT: u8 = 11;
}

mod init {
    pub const RESET: u8 = 0;
    pub const WAIT: u8 = 1;
    pub const TIMING: u8 = 2;
    pub const PINS: u8 = 3;
    pub const VERIFY: u8 = 4;
    pub const NORMAL: u8 = 5;
    pub const POLL: u8 = 6;
}

mod update {
    pub const STATUS: u8 = 0;
    pub const CHECK_RX: u8 = 1;
    pub const RECEIVE: u8 = 2;
    pub const CHECK_TX: u8 = 3;
    pub const TRANSMIT: u8 = 4;
}

mod mode_change {
    pub const REQUEST: u8 = 0;
    pub const POLL: u8 = 1;
}

mod filters {
    pub const CONFIG: u8 = 0;
    pub const RXB0: u8 = 1;
    pub const RXB1: u8 = 2;
    pub const LOW: u8 = 3;
    pub const HIGH: u8 = 4;
    pub const MASKS: u8 = 5;
    pub const NORMAL: u8 = 6;
}

pub struct Mcp2515<'a, SPI, CS, INT, C, const RX: usize = 16, const TX: usize = 16> {
    bus: &'a SharedSpiBus<SPI>,
    cs: CS,
    int: INT,
    clock: C,
    // lease identity on the shared bus
    id: Context,
    rf: Resumable<3>,
    rx_queue: BoundedQueue<Message, RX>,
    tx_queue: BoundedQueue<Message, TX>,
    timeout: Timeout,
    status: u8,
    rx_offset: u8,
    tx_buffer: usize,
    last_error: Option<Error>,
    tx_overflows: u32,
    rx_overflows: u32,
}

impl<'a, SPI, CS, INT, C, const RX: usize, const TX: usize> Mcp2515<'a, SPI, CS, INT, C, RX, TX>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    INT: InputPin,
    C: Clock,
{
    pub fn new(bus: &'a SharedSpiBus<SPI>, cs: CS, int: INT, clock: C, id: Context) -> Self {
        let mut driver = Self {
            bus,
            cs,
            int,
            clock,
            id,
            rf: Resumable::new(),
            rx_queue: BoundedQueue::new(),
            tx_queue: BoundedQueue::new(),
            timeout: Timeout::new(),
            status: 0,
            rx_offset: 0,
            tx_buffer: 0,
            last_error: None,
            tx_overflows: 0,
            rx_overflows: 0,
        };
        driver.deselect();
        driver
    }

    /// Reset and configure the chip for `BITRATE` with a `CLOCK` Hz
    /// oscillator. Fails to compile when no bit timing within
    /// `TOLERANCE` per mille exists.
    pub fn initialize<const CLOCK: u32, const BITRATE: u32, const TOLERANCE: u16>(
        &mut self,
        ctx: Context,
    ) -> CoroutineResult<Result<(), Error>> {
        let timing = const { BitTiming::checked::<CLOCK, BITRATE, TOLERANCE>() };
        self.initialize_with_timing(ctx, timing)
    }

    pub fn initialize_with_timing(
        &mut self,
        ctx: Context,
        timing: BitTiming,
    ) -> CoroutineResult<Result<(), Error>> {
        let mut point = begin_routine!(self.rf, ctx, routine::INITIALIZE);
        let [cnf1, cnf2, cnf3] = timing.registers();
        loop {
            match point {
                init::RESET => {
                    self.rf.mark(init::RESET);
                    let result = await_call!(self.rf, self.reset_device(ctx));
                    if let Err(e) = result {
                        return self.fail(e);
                    }
                    self.timeout.start(&self.clock, RESET_WAIT_MS);
                    point = init::WAIT;
                }
                init::WAIT => {
                    let expired = self.timeout.is_expired(&self.clock);
                    if let Some(r) = self.rf.wait_until(init::WAIT, expired) {
                        return r;
                    }
                    point = init::TIMING;
                }
                init::TIMING => {
                    self.rf.mark(init::TIMING);
                    let result = await_call!(
                        self.rf,
                        self.write_registers(ctx, reg::CNF3, &[cnf3, cnf2, cnf1, RX1IE | RX0IE])
                    );
                    if let Err(e) = result {
                        return self.fail(e);
                    }
                    point = init::PINS;
                }
                init::PINS => {
                    // BFPCTRL and TXRTSCTRL are adjacent
                    self.rf.mark(init::PINS);
                    let result =
                        await_call!(self.rf, self.write_registers(ctx, reg::BFPCTRL, &[0, 0]));
                    if let Err(e) = result {
                        return self.fail(e);
                    }
                    point = init::VERIFY;
                }
                init::VERIFY => {
                    self.rf.mark(init::VERIFY);
                    let actual = match await_call!(self.rf, self.read_register(ctx, reg::CNF2)) {
                        Ok(value) => value,
                        Err(e) => return self.fail(e),
                    };
                    if actual != cnf2 {
                        return self.fail(Error::Readback {
                            expected: cnf2,
                            actual,
                        });
                    }
                    point = init::NORMAL;
                }
                init::NORMAL => {
                    self.rf.mark(init::NORMAL);
                    let result =
                        await_call!(self.rf, self.write_registers(ctx, reg::CANCTRL, &[0]));
                    if let Err(e) = result {
                        return self.fail(e);
                    }
                    self.timeout.start(&self.clock, MODE_TIMEOUT_MS);
                    point = init::POLL;
                }
                init::POLL => {
                    self.rf.mark(init::POLL);
                    let stat = match await_call!(self.rf, self.read_register(ctx, reg::CANSTAT)) {
                        Ok(value) => value,
                        Err(e) => return self.fail(e),
                    };
                    if stat & REQOP_MASK == 0 {
                        info!("mcp2515: up, cnf {:02x} {:02x} {:02x}", cnf1, cnf2, cnf3);
                        self.last_error = None;
                        return self.rf.finish(Ok(()));
                    }
                    if self.timeout.is_expired(&self.clock) {
                        return self.fail(Error::ModeTimeout);
                    }
                    return self.rf.suspend(init::POLL);
                }
                _ => return self.rf.wrong_state(),
            }
        }
    }

    /// Request an operation mode and wait until the chip reports it.
    pub fn set_mode(&mut self, ctx: Context, mode: Mode) -> CoroutineResult<Result<(), Error>> {
        let mut point = begin_routine!(self.rf, ctx, routine::SET_MODE);
        loop {
            match point {
                mode_change::REQUEST => {
                    self.rf.mark(mode_change::REQUEST);
                    let result = await_call!(
                        self.rf,
                        self.bit_modify(ctx, reg::CANCTRL, REQOP_MASK, mode.bits())
                    );
                    if let Err(e) = result {
                        return self.fail(e);
                    }
                    self.timeout.start(&self.clock, MODE_TIMEOUT_MS);
                    point = mode_change::POLL;
                }
                mode_change::POLL => {
                    self.rf.mark(mode_change::POLL);
                    let stat = match await_call!(self.rf, self.read_register(ctx, reg::CANSTAT)) {
                        Ok(value) => value,
                        Err(e) => return self.fail(e),
                    };
                    if stat & REQOP_MASK == mode.bits() {
                        debug!("mcp2515: mode {:?}", mode);
                        return self.rf.finish(Ok(()));
                    }
                    if self.timeout.is_expired(&self.clock) {
                        return self.fail(Error::ModeTimeout);
                    }
                    return self.rf.suspend(mode_change::POLL);
                }
                _ => return self.rf.wrong_state(),
            }
        }
    }

    /// Program acceptance filters and masks, then return to normal mode.
    /// Receive buffer 0 rolls over into buffer 1 when full.
    pub fn set_filters(
        &mut self,
        ctx: Context,
        config: &FilterConfig,
    ) -> CoroutineResult<Result<(), Error>> {
        let mut point = begin_routine!(self.rf, ctx, routine::SET_FILTERS);
        loop {
            self.rf.mark(point);
            let result = match point {
                filters::CONFIG => await_call!(self.rf, self.set_mode(ctx, Mode::Configuration)),
                filters::RXB0 => {
                    await_call!(self.rf, self.write_registers(ctx, reg::RXB0CTRL, &[BUKT]))
                }
                filters::RXB1 => {
                    await_call!(self.rf, self.write_registers(ctx, reg::RXB1CTRL, &[0]))
                }
                filters::LOW => await_call!(
                    self.rf,
                    self.write_registers(ctx, reg::RXF0SIDH, &config.filter_block(0))
                ),
                filters::HIGH => await_call!(
                    self.rf,
                    self.write_registers(ctx, reg::RXF3SIDH, &config.filter_block(3))
                ),
                filters::MASKS => await_call!(
                    self.rf,
                    self.write_registers(ctx, reg::RXM0SIDH, &config.mask_block())
                ),
                filters::NORMAL => await_call!(self.rf, self.set_mode(ctx, Mode::Normal)),
                _ => return self.rf.wrong_state(),
            };
            if let Err(e) = result {
                return self.fail(e);
            }
            if point == filters::NORMAL {
                return self.rf.finish(Ok(()));
            }
            point += 1;
        }
    }

    /// One exchange with the chip: fetch a pending frame into the receive
    /// queue and hand at most one queued frame to a free transmit buffer.
    pub fn update(&mut self, ctx: Context) -> CoroutineResult<Result<(), Error>> {
        let mut point = begin_routine!(self.rf, ctx, routine::UPDATE);
        loop {
            match point {
                update::STATUS => {
                    self.rf.mark(update::STATUS);
                    self.status = match await_call!(self.rf, self.read_status(ctx)) {
                        Ok(status) => status,
                        Err(e) => return self.fail(e),
                    };
                    point = update::CHECK_RX;
                }
                update::CHECK_RX => {
                    point = update::CHECK_TX;
                    if self.interrupt_asserted() {
                        let pending = RX_BUFFERS.iter().find(|(flag, _)| self.status & flag != 0);
                        if let Some(&(_, offset)) = pending {
                            self.rx_offset = offset;
                            point = update::RECEIVE;
                        }
                    }
                }
                update::RECEIVE => {
                    self.rf.mark(update::RECEIVE);
                    let offset = self.rx_offset;
                    let message = match await_call!(self.rf, self.receive_frame(ctx, offset)) {
                        Ok(message) => message,
                        Err(e) => return self.fail(e),
                    };
                    debug!("mcp2515: rx {}", message);
                    if self.rx_queue.push(message).is_err() {
                        self.rx_overflows = self.rx_overflows.wrapping_add(1);
                        warn!("mcp2515: rx queue full, frame dropped");
                    }
                    point = update::CHECK_TX;
                }
                update::CHECK_TX => {
                    if self.tx_queue.is_empty() {
                        return self.rf.finish(Ok(()));
                    }
                    let free = TX_BUFFERS
                        .iter()
                        .position(|(txreq, _, _)| self.status & txreq == 0);
                    match free {
                        Some(index) => {
                            self.tx_buffer = index;
                            point = update::TRANSMIT;
                        }
                        None => return self.rf.finish(Ok(())),
                    }
                }
                update::TRANSMIT => {
                    let message = match self.tx_queue.peek() {
                        Some(message) => *message,
                        None => return self.rf.finish(Ok(())),
                    };
                    self.rf.mark(update::TRANSMIT);
                    let result = await_call!(
                        self.rf,
                        self.transmit_frame(ctx, &message, self.tx_buffer)
                    );
                    if let Err(e) = result {
                        return self.fail(e);
                    }
                    debug!("mcp2515: tx {}", message);
                    self.tx_queue.pop();
                    return self.rf.finish(Ok(()));
                }
                _ => return self.rf.wrong_state(),
            }
        }
    }

    /// Queue a frame for transmission. False when the queue is full; the
    /// frame is then dropped and counted. Frames with an identifier or
    /// length out of range are refused without touching the queue.
    pub fn send_message(&mut self, message: &Message) -> bool {
        if !message.is_valid() {
            warn!("mcp2515: malformed frame {}", message);
            return false;
        }
        match self.tx_queue.push(*message) {
            Ok(()) => true,
            Err(_) => {
                self.tx_overflows = self.tx_overflows.wrapping_add(1);
                false
            }
        }
    }

    pub fn get_message(&mut self) -> Option<Message> {
        self.rx_queue.pop()
    }

    pub fn is_message_available(&self) -> bool {
        !self.rx_queue.is_empty()
    }

    pub fn is_ready_to_send(&self) -> bool {
        !self.tx_queue.is_full()
    }

    pub fn pending_transmissions(&self) -> usize {
        self.tx_queue.len()
    }

    pub fn tx_overflows(&self) -> u32 {
        self.tx_overflows
    }

    pub fn rx_overflows(&self) -> u32 {
        self.rx_overflows
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn is_running(&self) -> bool {
        self.rf.is_running()
    }

    /// Abandon every routine in flight, give the bus back and deselect
    /// the chip.
    pub fn force_stop(&mut self) {
        self.rf.force_stop();
        self.bus.force_release(self.id);
        self.deselect();
    }

    fn fail<T>(&mut self, error: Error) -> CoroutineResult<Result<T, Error>> {
        warn!("mcp2515: {}", error);
        self.last_error = Some(error);
        self.rf.finish(Err(error))
    }

    fn reset_device(&mut self, ctx: Context) -> CoroutineResult<Result<(), Error>> {
        self.spi_routine(ctx, routine::RESET, |d| d.send(&[cmd::RESET]))
    }

    fn read_register(&mut self, ctx: Context, address: u8) -> CoroutineResult<Result<u8, Error>> {
        self.spi_routine(ctx, routine::READ_REGISTER, |d| {
            d.send(&[cmd::READ, address])?;
            d.exchange(0xff)
        })
    }

    fn write_registers(
        &mut self,
        ctx: Context,
        address: u8,
        values: &[u8],
    ) -> CoroutineResult<Result<(), Error>> {
        self.spi_routine(ctx, routine::WRITE_REGISTERS, |d| {
            d.send(&[cmd::WRITE, address])?;
            d.send(values)
        })
    }

    fn bit_modify(
        &mut self,
        ctx: Context,
        address: u8,
        mask: u8,
        value: u8,
    ) -> CoroutineResult<Result<(), Error>> {
        self.spi_routine(ctx, routine::BIT_MODIFY, |d| {
            d.send(&[cmd::BIT_MODIFY, address, mask, value])
        })
    }

    fn read_status(&mut self, ctx: Context) -> CoroutineResult<Result<u8, Error>> {
        self.spi_routine(ctx, routine::READ_STATUS, |d| {
            d.send(&[cmd::READ_STATUS])?;
            d.exchange(0xff)
        })
    }

    // READ RX BUFFER clears the receive flag when CS goes high
    fn receive_frame(
        &mut self,
        ctx: Context,
        offset: u8,
    ) -> CoroutineResult<Result<Message, Error>> {
        self.spi_routine(ctx, routine::RECEIVE, |d| {
            d.send(&[cmd::READ_RX | offset])?;
            let mut raw = [0u8; 4];
            for byte in &mut raw {
                *byte = d.exchange(0xff)?;
            }
            let (identifier, extended) = decode_identifier(raw);
            let dlc = d.exchange(0xff)?;
            let mut message = Message::new(identifier);
            message.flags.extended = extended;
            message.flags.rtr = if extended {
                dlc & DLC_RTR != 0
            } else {
                raw[1] & SIDL_SRR != 0
            };
            message.length = (dlc & DLC_MASK).min(MAX_DATA_LENGTH);
            for byte in &mut message.data[..usize::from(message.length)] {
                *byte = d.exchange(0xff)?;
            }
            Ok(message)
        })
    }

    fn transmit_frame(
        &mut self,
        ctx: Context,
        message: &Message,
        buffer: usize,
    ) -> CoroutineResult<Result<(), Error>> {
        let Some(&(_, offset, rts)) = TX_BUFFERS.get(buffer) else {
            return CoroutineResult::Stop(Err(Error::Bus));
        };
        self.spi_routine(ctx, routine::TRANSMIT, |d| {
            d.send(&[cmd::LOAD_TX | offset])?;
            d.send(&encode_identifier(message.identifier, message.flags.extended))?;
            if message.flags.rtr {
                d.send(&[DLC_RTR | message.length])?;
            } else {
                d.send(&[message.length])?;
                d.send(message.payload())?;
            }
            // request-to-send is its own command frame
            d.deselect();
            d.select();
            d.send(&[cmd::RTS | rts])
        })
    }

    // single chip-select frame; suspends while the bus is leased elsewhere
    fn spi_routine<T>(
        &mut self,
        ctx: Context,
        routine: u8,
        body: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> CoroutineResult<Result<T, Error>> {
        begin_routine!(self.rf, ctx, routine);
        if !self.bus.acquire(self.id) {
            return self.rf.suspend(0);
        }
        self.select();
        let result = body(self);
        self.end_frame();
        self.rf.finish(result)
    }

    fn end_frame(&mut self) {
        if self.bus.flush().is_err() {
            warn!("mcp2515: spi flush failed");
        }
        match self.bus.release(self.id) {
            Ok(true) => self.deselect(),
            Ok(false) => {}
            Err(e) => {
                warn!("mcp2515: {}", e);
                self.deselect();
            }
        }
    }

    fn exchange(&mut self, byte: u8) -> Result<u8, Error> {
        self.bus.transfer(byte).map_err(|e| {
            warn!("mcp2515: spi {:?}", e);
            Error::Bus
        })
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for &byte in bytes {
            self.exchange(byte)?;
        }
        Ok(())
    }

    fn interrupt_asserted(&mut self) -> bool {
        matches!(self.int.is_low(), Ok(true))
    }

    fn select(&mut self) {
        let _ = self.cs.set_low();
    }

    fn deselect(&mut self) {
        let _ = self.cs.set_high();
    }
}
