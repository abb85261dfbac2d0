//! Two-wire (I²C) transaction contract.
//!
//! A bus master does not know what a device wants to transfer. It attaches
//! a [`Transaction`] and asks it, phase by phase, what to do next: which
//! address to talk to, which bytes to write or where to put the bytes it
//! reads, and whether to continue with a repeated start or stop.

use core::fmt;

use crate::kernel::resumable::{Context, CoroutineResult};

/// Sticky error state of a bus master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NoError,
    /// Master was reset in software while a transfer was running
    SoftwareReset,
    /// SDA held low by someone else before START
    BusBusy,
    /// SCL stuck low or STOP could not be generated
    BusCondition,
    /// Another master won the bus
    ArbitrationLost,
    /// Nobody acknowledged the address byte
    AddressNack,
    /// A data byte was not acknowledged
    DataNack,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoError => write!(f, "no error"),
            Error::SoftwareReset => write!(f, "software reset"),
            Error::BusBusy => write!(f, "bus busy"),
            Error::BusCondition => write!(f, "bus condition fault"),
            Error::ArbitrationLost => write!(f, "arbitration lost"),
            Error::AddressNack => write!(f, "address not acknowledged"),
            Error::DataNack => write!(f, "data not acknowledged"),
        }
    }
}

impl core::error::Error for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAfterStart {
    Stop,
    Write,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAfterWrite {
    Stop,
    Restart,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAfterRead {
    Stop,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachCause {
    NormalStop,
    ErrorCondition,
    SoftwareReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Starting {
    /// 7-bit address, left aligned; bit 0 is filled in by the master
    pub address: u8,
    pub next: OperationAfterStart,
}

#[derive(Debug)]
pub struct Writing<'a> {
    pub buffer: &'a [u8],
    pub next: OperationAfterWrite,
}

#[derive(Debug)]
pub struct Reading<'a> {
    pub buffer: &'a mut [u8],
    pub next: OperationAfterRead,
}

/// Delegate a bus master consults while it owns the bus.
pub trait Transaction {
    /// Master is about to start. Return false to refuse.
    fn attaching(&mut self) -> bool;

    fn starting(&mut self) -> Starting;

    fn writing(&mut self) -> Writing<'_>;

    fn reading(&mut self) -> Reading<'_>;

    /// Called exactly once per accepted attach.
    fn detaching(&mut self, cause: DetachCause);

    /// True between an accepted attach and its detach.
    fn is_attached(&self) -> bool;
}

/// A bus master that runs transactions as resumable routines.
pub trait I2cMaster {
    /// Drive `transaction` one step. `Stop(true)` after a clean STOP,
    /// `Stop(false)` when refused by the delegate or aborted by an error.
    fn transfer(&mut self, ctx: Context, transaction: &mut dyn Transaction)
    -> CoroutineResult<bool>;

    fn error(&self) -> Error;

    /// Abort whatever is running and release the bus lines.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Busy,
    Error,
}

/// Owned-buffer delegate for ping, write, read and write-then-read.
pub struct WriteReadTransaction<const N: usize> {
    address: u8,
    write_buf: [u8; N],
    write_len: usize,
    read_buf: [u8; N],
    read_len: usize,
    reading: bool,
    state: TransactionState,
    last_cause: Option<DetachCause>,
}

impl<const N: usize> WriteReadTransaction<N> {
    pub const fn new(address: u8) -> Self {
        Self {
            address: address << 1,
            write_buf: [0; N],
            write_len: 0,
            read_buf: [0; N],
            read_len: 0,
            reading: false,
            state: TransactionState::Idle,
            last_cause: None,
        }
    }

    /// 7-bit address.
    pub fn address(&self) -> u8 {
        self.address >> 1
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address << 1;
    }

    pub fn configure_ping(&mut self) -> bool {
        self.configure_write_read(&[], 0)
    }

    pub fn configure_write(&mut self, data: &[u8]) -> bool {
        self.configure_write_read(data, 0)
    }

    pub fn configure_read(&mut self, len: usize) -> bool {
        self.configure_write_read(&[], len)
    }

    /// Refused while a transfer is in flight or when the buffers are too small.
    pub fn configure_write_read(&mut self, data: &[u8], read_len: usize) -> bool {
        if self.state == TransactionState::Busy || data.len() > N || read_len > N {
            return false;
        }
        self.write_buf[..data.len()].copy_from_slice(data);
        self.write_len = data.len();
        self.read_len = read_len;
        true
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state == TransactionState::Busy
    }

    pub fn last_cause(&self) -> Option<DetachCause> {
        self.last_cause
    }

    /// Bytes received by the last read phase.
    pub fn read_data(&self) -> &[u8] {
        &self.read_buf[..self.read_len]
    }
}

impl<const N: usize> Transaction for WriteReadTransaction<N> {
    fn attaching(&mut self) -> bool {
        if self.state == TransactionState::Busy {
            return false;
        }
        self.state = TransactionState::Busy;
        self.reading = self.write_len == 0;
        true
    }

    fn starting(&mut self) -> Starting {
        let next = if self.reading {
            if self.read_len > 0 {
                OperationAfterStart::Read
            } else {
                OperationAfterStart::Stop
            }
        } else if self.write_len > 0 {
            OperationAfterStart::Write
        } else {
            OperationAfterStart::Stop
        };
        Starting {
            address: self.address,
            next,
        }
    }

    fn writing(&mut self) -> Writing<'_> {
        self.reading = self.read_len > 0;
        Writing {
            buffer: &self.write_buf[..self.write_len],
            next: if self.reading {
                OperationAfterWrite::Restart
            } else {
                OperationAfterWrite::Stop
            },
        }
    }

    fn reading(&mut self) -> Reading<'_> {
        Reading {
            buffer: &mut self.read_buf[..self.read_len],
            next: OperationAfterRead::Stop,
        }
    }

    fn detaching(&mut self, cause: DetachCause) {
        self.state = match cause {
            DetachCause::NormalStop => TransactionState::Idle,
            _ => TransactionState::Error,
        };
        self.last_cause = Some(cause);
    }

    fn is_attached(&self) -> bool {
        self.state == TransactionState::Busy
    }
}
