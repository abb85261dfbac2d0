// Two-wire device running its transfers through a shared bus master
//
// Each routine configures the owned transaction once, then keeps handing
// it to the master until the master stops. While another device owns the
// master the call just reports Running.

use super::i2c::{I2cMaster, TransactionState, WriteReadTransaction};
use crate::kernel::resumable::{Context, CoroutineResult, Resumable};
use crate::{await_call, begin_routine};

const PING: u8 = 1;
const WRITE: u8 = 2;
const READ: u8 = 3;
const WRITE_READ: u8 = 4;

mod point {
    pub const CONFIGURE: u8 = 0;
    pub const TRANSFER: u8 = 1;
}

pub struct I2cDevice<const N: usize> {
    transaction: WriteReadTransaction<N>,
    rf: Resumable<1>,
}

impl<const N: usize> I2cDevice<N> {
    pub const fn new(address: u8) -> Self {
        Self {
            transaction: WriteReadTransaction::new(address),
            rf: Resumable::new(),
        }
    }

    pub fn address(&self) -> u8 {
        self.transaction.address()
    }

    pub fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// Bytes received by the last read or write-read.
    pub fn read_data(&self) -> &[u8] {
        self.transaction.read_data()
    }

    pub fn is_running(&self) -> bool {
        self.rf.is_running()
    }

    /// True when something acknowledged the address.
    pub fn ping<M: I2cMaster + ?Sized>(
        &mut self,
        ctx: Context,
        master: &mut M,
    ) -> CoroutineResult<bool> {
        let point = begin_routine!(self.rf, ctx, PING);
        self.run(ctx, master, point, |t| t.configure_ping())
    }

    pub fn write<M: I2cMaster + ?Sized>(
        &mut self,
        ctx: Context,
        master: &mut M,
        data: &[u8],
    ) -> CoroutineResult<bool> {
        let point = begin_routine!(self.rf, ctx, WRITE);
        self.run(ctx, master, point, |t| t.configure_write(data))
    }

    pub fn read<M: I2cMaster + ?Sized>(
        &mut self,
        ctx: Context,
        master: &mut M,
        len: usize,
    ) -> CoroutineResult<bool> {
        let point = begin_routine!(self.rf, ctx, READ);
        self.run(ctx, master, point, |t| t.configure_read(len))
    }

    /// Write `data`, then read `len` bytes after a repeated start.
    pub fn write_read<M: I2cMaster + ?Sized>(
        &mut self,
        ctx: Context,
        master: &mut M,
        data: &[u8],
        len: usize,
    ) -> CoroutineResult<bool> {
        let point = begin_routine!(self.rf, ctx, WRITE_READ);
        self.run(ctx, master, point, |t| t.configure_write_read(data, len))
    }

    fn run<M, F>(
        &mut self,
        ctx: Context,
        master: &mut M,
        point: u8,
        configure: F,
    ) -> CoroutineResult<bool>
    where
        M: I2cMaster + ?Sized,
        F: FnOnce(&mut WriteReadTransaction<N>) -> bool,
    {
        match point {
            point::CONFIGURE => {
                if !configure(&mut self.transaction) {
                    return self.rf.finish(false);
                }
                self.rf.mark(point::TRANSFER);
                self.transfer(ctx, master)
            }
            point::TRANSFER => self.transfer(ctx, master),
            _ => self.rf.wrong_state(),
        }
    }

    fn transfer<M: I2cMaster + ?Sized>(
        &mut self,
        ctx: Context,
        master: &mut M,
    ) -> CoroutineResult<bool> {
        let done = await_call!(self.rf, master.transfer(ctx, &mut self.transaction));
        self.rf.finish(done)
    }
}
