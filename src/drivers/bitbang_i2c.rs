// Software two-wire bus master on two open-drain lines
//
// set_high() releases a line, set_low() pulls it down; reading a line
// returns the wired-AND of everyone on the bus. A transfer is a resumable
// routine that runs one bus phase (address, write block, read block) per
// drive and yields in between, so a long transfer spreads over several
// scheduler ticks. Single bits still busy-wait a quarter clock period.
//
// Master owns the scratch state of the transfer in flight; a second
// context gets WrongContext until the owner's transfer stopped.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, warn};

use super::i2c::{
    DetachCause, Error, I2cMaster, OperationAfterRead, OperationAfterStart, OperationAfterWrite,
    Transaction,
};
use crate::begin_routine;
use crate::kernel::resumable::{Context, CoroutineResult, Refusal, Resumable};

// half clock cycles to wait for a stretched SCL
const MAX_CLOCK_STRETCH: u16 = 250;

// bus recovery clocks out at most one byte plus ACK
const RECOVERY_CLOCKS: u8 = 9;

const TRANSFER: u8 = 1;

mod point {
    pub const ATTACH: u8 = 0;
    pub const ADDRESS: u8 = 1;
    pub const OPERATE: u8 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Stop,
    Restart,
    Write,
    Read,
}

impl From<OperationAfterStart> for Next {
    fn from(op: OperationAfterStart) -> Self {
        match op {
            OperationAfterStart::Stop => Next::Stop,
            OperationAfterStart::Write => Next::Write,
            OperationAfterStart::Read => Next::Read,
        }
    }
}

impl From<OperationAfterWrite> for Next {
    fn from(op: OperationAfterWrite) -> Self {
        match op {
            OperationAfterWrite::Stop => Next::Stop,
            OperationAfterWrite::Restart => Next::Restart,
            OperationAfterWrite::Write => Next::Write,
        }
    }
}

impl From<OperationAfterRead> for Next {
    fn from(op: OperationAfterRead) -> Self {
        match op {
            OperationAfterRead::Stop => Next::Stop,
            OperationAfterRead::Restart => Next::Restart,
        }
    }
}

// delegates are told apart by address; a stale address is ruled out by
// asking the delegate whether it still considers itself attached
fn identity(transaction: &mut dyn Transaction) -> usize {
    core::ptr::from_mut(transaction).cast::<()>() as usize
}

pub struct BitBangI2cMaster<SCL, SDA, D> {
    scl: SCL,
    sda: SDA,
    delay: D,
    quarter_ns: u32,
    rf: Resumable<1>,
    error: Error,
    next: Next,
    attached: Option<usize>,
    // delegate dropped by reset(), detached on its next attach
    orphan: Option<usize>,
}

impl<SCL, SDA, D> BitBangI2cMaster<SCL, SDA, D>
where
    SCL: InputPin + OutputPin,
    SDA: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(scl: SCL, sda: SDA, delay: D, baudrate: u32) -> Self {
        let mut master = Self {
            scl,
            sda,
            delay,
            quarter_ns: (250_000_000 / baudrate.max(1)).max(1),
            rf: Resumable::new(),
            error: Error::NoError,
            next: Next::Stop,
            attached: None,
            orphan: None,
        };
        master.release_lines();
        master
    }

    pub fn is_busy(&self) -> bool {
        self.rf.is_running()
    }

    /// Free a slave that holds SDA low after an interrupted transfer:
    /// clock until SDA floats, then STOP. Refused while a transfer runs.
    pub fn recover_bus(&mut self) -> Result<(), Error> {
        if self.rf.is_running() {
            return Err(Error::BusBusy);
        }
        self.release_sda();
        for _ in 0..RECOVERY_CLOCKS {
            if self.sda_is_high() {
                break;
            }
            self.pull_scl();
            self.delay2();
            if !self.release_scl_and_wait() {
                return Err(Error::BusCondition);
            }
            self.delay2();
        }
        self.pull_scl();
        self.delay2();
        self.stop_condition()
    }

    fn run_transfer(
        &mut self,
        ctx: Context,
        transaction: &mut dyn Transaction,
    ) -> CoroutineResult<bool> {
        let id = identity(transaction);
        let mut point = begin_routine!(self.rf, ctx, TRANSFER);
        if point != point::ATTACH && self.attached != Some(id) {
            return self.rf.refuse(Refusal::WrongState);
        }
        loop {
            match point {
                point::ATTACH => {
                    if self.orphan == Some(id) {
                        self.orphan = None;
                        if transaction.is_attached() {
                            transaction.detaching(DetachCause::SoftwareReset);
                            return self.rf.finish(false);
                        }
                    }
                    if !transaction.attaching() {
                        return self.rf.finish(false);
                    }
                    self.attached = Some(id);
                    self.error = Error::NoError;
                    point = point::ADDRESS;
                }
                point::ADDRESS => {
                    if let Err(e) = self.start_condition() {
                        return self.abort(e, transaction);
                    }
                    let starting = transaction.starting();
                    let read = starting.next == OperationAfterStart::Read;
                    let address = (starting.address & 0xfe) | u8::from(read);
                    debug!("i2c: start {:#04x}", address);
                    if let Err(e) = self.write_byte(address, true) {
                        return self.abort(e, transaction);
                    }
                    self.next = starting.next.into();
                    point = point::OPERATE;
                }
                point::OPERATE => match self.next {
                    Next::Write => {
                        let writing = transaction.writing();
                        let next = writing.next;
                        let result = self.write_block(writing.buffer);
                        if let Err(e) = result {
                            return self.abort(e, transaction);
                        }
                        self.next = next.into();
                        return self.rf.suspend(point::OPERATE);
                    }
                    Next::Read => {
                        let reading = transaction.reading();
                        let next = reading.next;
                        let result = self.read_block(reading.buffer);
                        if let Err(e) = result {
                            return self.abort(e, transaction);
                        }
                        self.next = next.into();
                        return self.rf.suspend(point::OPERATE);
                    }
                    Next::Restart => point = point::ADDRESS,
                    Next::Stop => {
                        if let Err(e) = self.stop_condition() {
                            return self.abort(e, transaction);
                        }
                        debug!("i2c: stop");
                        self.attached = None;
                        transaction.detaching(DetachCause::NormalStop);
                        return self.rf.finish(true);
                    }
                },
                _ => return self.rf.wrong_state(),
            }
        }
    }

    fn abort(&mut self, error: Error, transaction: &mut dyn Transaction) -> CoroutineResult<bool> {
        warn!("i2c: {}", error);
        if !matches!(error, Error::BusBusy | Error::BusCondition) {
            self.pull_scl();
            self.delay2();
            let _ = self.stop_condition();
        }
        self.release_lines();
        self.error = error;
        self.attached = None;
        transaction.detaching(DetachCause::ErrorCondition);
        self.rf.finish(false)
    }

    fn start_condition(&mut self) -> Result<(), Error> {
        self.release_sda();
        self.delay2();
        if !self.sda_is_high() {
            return Err(Error::BusBusy);
        }
        if !self.release_scl_and_wait() {
            return Err(Error::BusCondition);
        }
        self.delay4();
        self.pull_sda();
        self.delay2();
        self.pull_scl();
        self.delay2();
        Ok(())
    }

    fn stop_condition(&mut self) -> Result<(), Error> {
        self.pull_sda();
        self.delay2();
        if !self.release_scl_and_wait() {
            return Err(Error::BusCondition);
        }
        self.delay4();
        self.release_sda();
        self.delay2();
        if !self.sda_is_high() {
            return Err(Error::BusCondition);
        }
        self.delay2();
        Ok(())
    }

    fn write_block(&mut self, bytes: &[u8]) -> Result<(), Error> {
        bytes.iter().try_for_each(|&byte| self.write_byte(byte, false))
    }

    // every byte but the last is acknowledged
    fn read_block(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let len = buffer.len();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.read_byte(i + 1 < len)?;
        }
        Ok(())
    }

    fn write_byte(&mut self, byte: u8, address: bool) -> Result<(), Error> {
        for bit in (0..8).rev() {
            self.write_bit(byte & (1 << bit) != 0)?;
        }
        self.release_sda();
        let nack = self.read_bit()?;
        match (nack, address) {
            (false, _) => Ok(()),
            (true, true) => Err(Error::AddressNack),
            (true, false) => Err(Error::DataNack),
        }
    }

    fn read_byte(&mut self, ack: bool) -> Result<u8, Error> {
        self.release_sda();
        let mut value = 0u8;
        for _ in 0..8 {
            value = (value << 1) | u8::from(self.read_bit()?);
        }
        // ACK pulls SDA low, NACK leaves it released
        self.write_bit(!ack)?;
        Ok(value)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Error> {
        if bit {
            self.release_sda();
        } else {
            self.pull_sda();
        }
        self.delay2();
        if !self.release_scl_and_wait() {
            return Err(Error::BusCondition);
        }
        if self.sda_is_high() != bit {
            return Err(Error::ArbitrationLost);
        }
        self.delay2();
        self.pull_scl();
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Error> {
        self.delay2();
        if !self.release_scl_and_wait() {
            return Err(Error::BusCondition);
        }
        let bit = self.sda_is_high();
        self.delay2();
        self.pull_scl();
        Ok(bit)
    }

    fn release_scl_and_wait(&mut self) -> bool {
        let _ = self.scl.set_high();
        for _ in 0..MAX_CLOCK_STRETCH {
            if matches!(self.scl.is_high(), Ok(true)) {
                return true;
            }
            self.delay2();
        }
        false
    }

    fn release_lines(&mut self) {
        let _ = self.scl.set_high();
        let _ = self.sda.set_high();
    }

    fn pull_scl(&mut self) {
        let _ = self.scl.set_low();
    }

    fn release_sda(&mut self) {
        let _ = self.sda.set_high();
    }

    fn pull_sda(&mut self) {
        let _ = self.sda.set_low();
    }

    fn sda_is_high(&mut self) -> bool {
        matches!(self.sda.is_high(), Ok(true))
    }

    fn delay2(&mut self) {
        self.delay.delay_ns(self.quarter_ns * 2);
    }

    fn delay4(&mut self) {
        self.delay.delay_ns(self.quarter_ns);
    }
}

impl<SCL, SDA, D> I2cMaster for BitBangI2cMaster<SCL, SDA, D>
where
    SCL: InputPin + OutputPin,
    SDA: InputPin + OutputPin,
    D: DelayNs,
{
    fn transfer(
        &mut self,
        ctx: Context,
        transaction: &mut dyn Transaction,
    ) -> CoroutineResult<bool> {
        self.run_transfer(ctx, transaction)
    }

    fn error(&self) -> Error {
        self.error
    }

    fn reset(&mut self) {
        warn!("i2c: software reset");
        self.error = Error::SoftwareReset;
        self.release_lines();
        self.rf.force_stop();
        self.orphan = self.attached.take();
    }
}
