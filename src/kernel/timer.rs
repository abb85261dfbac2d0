// Cooperative timeouts polled against a Clock
//
// Deadlines compare with wrapping arithmetic, so a u32 millisecond
// clock can roll over without false expiries as long as no single
// interval exceeds ~24 days.

use super::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Stopped,
    Armed,
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    deadline: u32,
    state: TimeoutState,
}

impl Timeout {
    pub const fn new() -> Self {
        Self {
            deadline: 0,
            state: TimeoutState::Stopped,
        }
    }

    pub fn start(&mut self, clock: &impl Clock, ms: u32) {
        self.deadline = clock.now_ms().wrapping_add(ms);
        self.state = TimeoutState::Armed;
    }

    pub fn stop(&mut self) {
        self.state = TimeoutState::Stopped;
    }

    /// Latches once the deadline has passed. A stopped timeout never expires.
    pub fn is_expired(&mut self, clock: &impl Clock) -> bool {
        if self.state == TimeoutState::Armed && reached(clock.now_ms(), self.deadline) {
            self.state = TimeoutState::Expired;
        }
        self.state == TimeoutState::Expired
    }

    pub fn is_armed(&self) -> bool {
        self.state == TimeoutState::Armed
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    pub fn remaining(&self, clock: &impl Clock) -> u32 {
        match self.state {
            TimeoutState::Armed => {
                let now = clock.now_ms();
                if reached(now, self.deadline) {
                    0
                } else {
                    self.deadline.wrapping_sub(now)
                }
            }
            _ => 0,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires once per period; missed periods are skipped, not replayed.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    period: u32,
    next: u32,
}

impl PeriodicTimer {
    pub fn new(clock: &impl Clock, period_ms: u32) -> Self {
        Self {
            period: period_ms,
            next: clock.now_ms().wrapping_add(period_ms),
        }
    }

    pub fn restart(&mut self, clock: &impl Clock, period_ms: u32) {
        *self = Self::new(clock, period_ms);
    }

    pub fn execute(&mut self, clock: &impl Clock) -> bool {
        let now = clock.now_ms();
        if !reached(now, self.next) {
            return false;
        }
        self.next = self.next.wrapping_add(self.period);
        if reached(now, self.next) {
            self.next = now.wrapping_add(self.period);
        }
        true
    }

    pub fn period(&self) -> u32 {
        self.period
    }
}

fn reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) as i32 >= 0
}
