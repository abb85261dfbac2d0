// Protothreads: one stored position per thread, no nesting
//
// A thread type embeds a Protothread and implements Thread::run() as a
// match over pt.point(). Every path out of run() either records the next
// position (returns true) or ends the thread (returns false). Threads call
// into resumable engines with their own Context; engines never call back.

use super::resumable::CoroutineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protothread {
    point: Option<u16>,
}

impl Protothread {
    /// A new thread starts running at position 0.
    pub const fn new() -> Self {
        Self { point: Some(0) }
    }

    pub fn restart(&mut self) {
        self.point = Some(0);
    }

    pub fn stop(&mut self) {
        self.point = None;
    }

    pub fn is_running(&self) -> bool {
        self.point.is_some()
    }

    /// Position to continue at; `None` once stopped.
    pub fn point(&self) -> Option<u16> {
        self.point
    }

    /// Give up the processor, continue at `point` next time.
    pub fn yield_at(&mut self, point: u16) -> bool {
        self.point = Some(point);
        true
    }

    /// `Some(true)` when the caller must return from run().
    pub fn wait_until(&mut self, point: u16, condition: bool) -> Option<bool> {
        (!condition).then(|| self.yield_at(point))
    }

    pub fn wait_while(&mut self, point: u16, condition: bool) -> Option<bool> {
        self.wait_until(point, !condition)
    }

    /// Wait for a child thread to finish.
    pub fn wait_thread<T: Thread + ?Sized>(&mut self, point: u16, child: &mut T) -> Option<bool> {
        let alive = child.run();
        self.wait_while(point, alive)
    }

    /// Drive a resumable call until it stops. `Err` carries the value
    /// run() must return.
    pub fn wait_call<T>(&mut self, point: u16, result: CoroutineResult<T>) -> Result<T, bool> {
        match result {
            CoroutineResult::Stop(value) => Ok(value),
            CoroutineResult::NestingError => Err(self.exit()),
            _ => Err(self.yield_at(point)),
        }
    }

    /// End the thread.
    pub fn exit(&mut self) -> bool {
        self.stop();
        false
    }
}

impl Default for Protothread {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Thread {
    /// Resume at the stored position. Returns false once finished.
    fn run(&mut self) -> bool;

    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blinker {
        pt: Protothread,
        ticks: u8,
        toggles: u8,
    }

    impl Thread for Blinker {
        fn run(&mut self) -> bool {
            loop {
                match self.pt.point() {
                    Some(0) => {
                        self.ticks = 0;
                        self.pt.yield_at(1);
                    }
                    Some(1) => {
                        self.ticks += 1;
                        if let Some(r) = self.pt.wait_until(1, self.ticks >= 2) {
                            return r;
                        }
                        self.toggles += 1;
                        if self.toggles == 3 {
                            return self.pt.exit();
                        }
                        self.pt.yield_at(0);
                        return true;
                    }
                    _ => return false,
                }
            }
        }

        fn is_running(&self) -> bool {
            self.pt.is_running()
        }
    }

    struct Parent {
        pt: Protothread,
        child: Blinker,
        finished: bool,
    }

    impl Thread for Parent {
        fn run(&mut self) -> bool {
            loop {
                match self.pt.point() {
                    Some(0) => {
                        self.child.pt.restart();
                        self.pt.yield_at(1);
                    }
                    Some(1) => {
                        if let Some(r) = self.pt.wait_thread(1, &mut self.child) {
                            return r;
                        }
                        self.finished = true;
                        return self.pt.exit();
                    }
                    _ => return false,
                }
            }
        }

        fn is_running(&self) -> bool {
            self.pt.is_running()
        }
    }

    fn blinker() -> Blinker {
        Blinker {
            pt: Protothread::new(),
            ticks: 0,
            toggles: 0,
        }
    }

    #[test]
    fn runs_until_exit() {
        let mut b = blinker();
        let mut runs = 0;
        while b.run() {
            runs += 1;
        }
        assert_eq!(b.toggles, 3);
        assert_eq!(runs, 5);
        assert!(!b.is_running());
        assert!(!b.run());
    }

    #[test]
    fn restart_begins_again() {
        let mut b = blinker();
        assert!(b.run());
        b.pt.stop();
        assert!(!b.run());
        b.pt.restart();
        assert_eq!(b.pt.point(), Some(0));
        assert!(b.run());
    }

    #[test]
    fn parent_waits_for_child() {
        let mut p = Parent {
            pt: Protothread::new(),
            child: blinker(),
            finished: false,
        };
        assert!(p.run());
        assert!(!p.finished);
        while p.run() {}
        assert!(p.finished);
        assert_eq!(p.child.toggles, 3);
    }

    #[test]
    fn wait_call_yields_while_pending() {
        let mut pt = Protothread::new();
        assert_eq!(pt.wait_call::<u8>(4, CoroutineResult::Running), Err(true));
        assert_eq!(pt.point(), Some(4));
        assert_eq!(pt.wait_call::<u8>(4, CoroutineResult::WrongContext), Err(true));
        assert_eq!(pt.wait_call(4, CoroutineResult::Stop(7u8)), Ok(7));
        assert_eq!(pt.wait_call::<u8>(4, CoroutineResult::NestingError), Err(false));
        assert!(!pt.is_running());
    }
}
