// Free-running millisecond time base
//
// The tick ISR advances a TickClock; drivers only see the Clock trait.
// Critical section guards riscv32imc (no atomic RMW).

use core::cell::Cell;

use critical_section::Mutex;

pub trait Clock {
    /// Milliseconds since some arbitrary origin; wraps around.
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

pub struct TickClock {
    millis: Mutex<Cell<u32>>,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            millis: Mutex::new(Cell::new(0)),
        }
    }

    /// Called from the tick interrupt.
    pub fn advance(&self, ms: u32) {
        critical_section::with(|cs| {
            let millis = self.millis.borrow(cs);
            millis.set(millis.get().wrapping_add(ms));
        });
    }
}

impl Clock for TickClock {
    fn now_ms(&self) -> u32 {
        critical_section::with(|cs| self.millis.borrow(cs).get())
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "riscv32")]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack));
    }

    #[cfg(not(target_arch = "riscv32"))]
    core::hint::spin_loop();
}
