// SPI bus shared by several chip-select devices
//
// A device leases the bus for one logical transfer: acquire() until it
// succeeds, pull its chip select, exchange bytes, release(). The lease
// nests for the same owner. Lease state and the bus sit behind
// critical-section mutexes so the bus can be reached from scheduler
// tasks and the main loop alike.

use core::cell::{Cell, RefCell};
use core::fmt;

use critical_section::Mutex;
use embedded_hal::spi::SpiBus;

use crate::kernel::resumable::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// Bus is leased to somebody else
    NotOwner,
    /// Nobody holds the bus
    NotAcquired,
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseError::NotOwner => write!(f, "bus leased to another device"),
            ReleaseError::NotAcquired => write!(f, "bus not acquired"),
        }
    }
}

impl core::error::Error for ReleaseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lease {
    owner: Option<Context>,
    count: u8,
}

pub struct SharedSpiBus<SPI> {
    bus: Mutex<RefCell<SPI>>,
    lease: Mutex<Cell<Lease>>,
}

impl<SPI: SpiBus<u8>> SharedSpiBus<SPI> {
    pub const fn new(bus: SPI) -> Self {
        Self {
            bus: Mutex::new(RefCell::new(bus)),
            lease: Mutex::new(Cell::new(Lease {
                owner: None,
                count: 0,
            })),
        }
    }

    /// Take or re-enter the lease. False while another device holds it.
    pub fn acquire(&self, device: Context) -> bool {
        critical_section::with(|cs| {
            let cell = self.lease.borrow(cs);
            let lease = cell.get();
            match lease.owner {
                Some(owner) if owner != device => false,
                _ => {
                    cell.set(Lease {
                        owner: Some(device),
                        count: lease.count.saturating_add(1),
                    });
                    true
                }
            }
        })
    }

    /// Drop one level of the lease. `Ok(true)` once fully released.
    pub fn release(&self, device: Context) -> Result<bool, ReleaseError> {
        critical_section::with(|cs| {
            let cell = self.lease.borrow(cs);
            let lease = cell.get();
            match lease.owner {
                None => Err(ReleaseError::NotAcquired),
                Some(owner) if owner != device => Err(ReleaseError::NotOwner),
                Some(_) => {
                    let count = lease.count.saturating_sub(1);
                    let owner = if count == 0 { None } else { lease.owner };
                    cell.set(Lease { owner, count });
                    Ok(count == 0)
                }
            }
        })
    }

    pub fn owner(&self) -> Option<Context> {
        critical_section::with(|cs| self.lease.borrow(cs).get().owner)
    }

    /// Drop the lease unconditionally if `device` holds it.
    pub fn force_release(&self, device: Context) {
        critical_section::with(|cs| {
            let cell = self.lease.borrow(cs);
            if cell.get().owner == Some(device) {
                cell.set(Lease {
                    owner: None,
                    count: 0,
                });
            }
        });
    }

    /// Exchange one byte.
    pub fn transfer(&self, byte: u8) -> Result<u8, SPI::Error> {
        critical_section::with(|cs| {
            let mut buf = [byte];
            self.bus.borrow_ref_mut(cs).transfer_in_place(&mut buf)?;
            Ok(buf[0])
        })
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), SPI::Error> {
        critical_section::with(|cs| self.bus.borrow_ref_mut(cs).write(bytes))
    }

    pub fn flush(&self) -> Result<(), SPI::Error> {
        critical_section::with(|cs| self.bus.borrow_ref_mut(cs).flush())
    }
}
