// Stackless resumable routines
//
// A driver embeds one Resumable<LEVELS> and writes each multi-step
// operation as a method that calls begin(), matches the returned resume
// point and leaves through suspend() or finish(). Nested calls to other
// routines of the same object push a level; calls into routines of
// another object go through await_call!, which turns inner suspension
// into outer suspension.
//
// One context owns the object from the first begin() until the
// outermost routine stops. Everything else is refused without touching
// the stored state.

use core::fmt;

/// Identity of whoever drives a resumable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context(u16);

impl Context {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Outcome of driving a resumable routine once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineResult<T> {
    /// Routine ran to completion with a value.
    Stop(T),
    /// Too many nested routines for the configured depth.
    NestingError,
    /// Another context owns this object.
    WrongContext,
    /// A different routine is suspended at this nesting level.
    WrongState,
    /// Suspended; drive again to continue.
    Running,
}

impl<T> CoroutineResult<T> {
    pub fn is_running(&self) -> bool {
        matches!(self, CoroutineResult::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, CoroutineResult::Stop(_))
    }

    pub fn stopped(self) -> Option<T> {
        match self {
            CoroutineResult::Stop(value) => Some(value),
            _ => None,
        }
    }

    /// True for every result that means "not finished, try again later".
    /// A refusal by a foreign context or routine counts as waiting.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            CoroutineResult::Running | CoroutineResult::WrongContext | CoroutineResult::WrongState
        )
    }

    /// Adapter for callers outside any routine: `nb::block!(x.into_nb())`
    /// spins until the routine stops.
    pub fn into_nb(self) -> nb::Result<T, Refusal> {
        match self {
            CoroutineResult::Stop(value) => Ok(value),
            CoroutineResult::NestingError => Err(nb::Error::Other(Refusal::NestingError)),
            CoroutineResult::Running
            | CoroutineResult::WrongContext
            | CoroutineResult::WrongState => Err(nb::Error::WouldBlock),
        }
    }
}

/// Reasons `begin` can refuse to enter a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NestingError,
    WrongContext,
    WrongState,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::NestingError => write!(f, "nesting depth exceeded"),
            Refusal::WrongContext => write!(f, "owned by another context"),
            Refusal::WrongState => write!(f, "another routine is in flight"),
        }
    }
}

impl core::error::Error for Refusal {}

impl<T> From<Refusal> for CoroutineResult<T> {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::NestingError => CoroutineResult::NestingError,
            Refusal::WrongContext => CoroutineResult::WrongContext,
            Refusal::WrongState => CoroutineResult::WrongState,
        }
    }
}

/// Stored position of one nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    Stopped,
    Suspended { routine: u8, point: u8 },
}

pub struct Resumable<const LEVELS: usize> {
    states: [ResumeState; LEVELS],
    level: usize,
    owner: Option<Context>,
}

impl<const LEVELS: usize> Resumable<LEVELS> {
    pub const fn new() -> Self {
        const { assert!(LEVELS > 0, "a resumable needs at least one level") };
        Self {
            states: [ResumeState::Stopped; LEVELS],
            level: 0,
            owner: None,
        }
    }

    /// Enter `routine` on behalf of `ctx`. Returns the point to resume at,
    /// 0 on a fresh start.
    pub fn begin(&mut self, ctx: Context, routine: u8) -> Result<u8, Refusal> {
        if let Some(owner) = self.owner {
            if owner != ctx {
                return Err(Refusal::WrongContext);
            }
        }
        if self.level >= LEVELS {
            return Err(Refusal::NestingError);
        }
        let point = match self.states[self.level] {
            ResumeState::Stopped => 0,
            ResumeState::Suspended { routine: r, point } if r == routine => point,
            ResumeState::Suspended { .. } => return Err(Refusal::WrongState),
        };
        self.states[self.level] = ResumeState::Suspended { routine, point };
        self.owner = Some(ctx);
        self.level += 1;
        Ok(point)
    }

    /// Record `point` as the place to resume the current routine at.
    /// Used right before a call that may suspend.
    pub fn mark(&mut self, point: u8) {
        if let Some(ResumeState::Suspended { point: p, .. }) = self.current_mut() {
            *p = point;
        }
    }

    /// Leave the current routine, resuming at `point` next time.
    pub fn suspend<T>(&mut self, point: u8) -> CoroutineResult<T> {
        self.mark(point);
        self.pop();
        CoroutineResult::Running
    }

    /// Stop the current routine with `value`.
    pub fn finish<T>(&mut self, value: T) -> CoroutineResult<T> {
        self.stop_current();
        CoroutineResult::Stop(value)
    }

    /// Suspend at `point` while `condition` holds. `None` means go on.
    pub fn wait_while<T>(&mut self, point: u8, condition: bool) -> Option<CoroutineResult<T>> {
        condition.then(|| self.suspend(point))
    }

    pub fn wait_until<T>(&mut self, point: u8, condition: bool) -> Option<CoroutineResult<T>> {
        self.wait_while(point, !condition)
    }

    /// Fold the result of an inner call into the current routine.
    ///
    /// `Ok` carries the inner return value. `Err` carries what the current
    /// routine must return right away: `Running` while the inner call is
    /// pending (including refusals by another object's owner), or
    /// `NestingError` after stopping the current level.
    pub fn resolve<U, T>(&mut self, inner: CoroutineResult<U>) -> Result<U, CoroutineResult<T>> {
        match inner {
            CoroutineResult::Stop(value) => Ok(value),
            CoroutineResult::NestingError => {
                self.stop_current();
                Err(CoroutineResult::NestingError)
            }
            CoroutineResult::Running
            | CoroutineResult::WrongContext
            | CoroutineResult::WrongState => {
                self.pop();
                Err(CoroutineResult::Running)
            }
        }
    }

    /// Leave without touching the stored point and report `refusal`.
    pub fn refuse<T>(&mut self, refusal: Refusal) -> CoroutineResult<T> {
        self.pop();
        refusal.into()
    }

    /// Exit for a resume point the routine does not know about.
    pub fn wrong_state<T>(&mut self) -> CoroutineResult<T> {
        self.stop_current();
        CoroutineResult::WrongState
    }

    /// Stop every routine from the current level down.
    pub fn force_stop(&mut self) {
        for state in &mut self.states[self.level..] {
            *state = ResumeState::Stopped;
        }
        if self.level == 0 {
            self.owner = None;
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.states.get(self.level),
            Some(ResumeState::Suspended { .. })
        )
    }

    /// Nesting depth of the routine executing right now, -1 outside any.
    pub fn depth(&self) -> i8 {
        self.level as i8 - 1
    }

    pub fn owner(&self) -> Option<Context> {
        self.owner
    }

    pub fn state(&self, level: usize) -> Option<ResumeState> {
        self.states.get(level).copied()
    }

    fn current_mut(&mut self) -> Option<&mut ResumeState> {
        let level = self.level.checked_sub(1)?;
        self.states.get_mut(level)
    }

    fn pop(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    fn stop_current(&mut self) {
        if let Some(state) = self.current_mut() {
            *state = ResumeState::Stopped;
        }
        self.pop();
        if self.level == 0 {
            self.owner = None;
        }
    }
}

impl<const LEVELS: usize> Default for Resumable<LEVELS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Call a resumable routine from inside another one.
///
/// Evaluates `$call`, hands its value to the body once it stopped, and
/// returns from the enclosing routine while it is still pending. Mark the
/// resume point with `Resumable::mark` before using it.
#[macro_export]
macro_rules! await_call {
    ($rf:expr, $call:expr) => {{
        let result = $call;
        match $rf.resolve(result) {
            Ok(value) => value,
            Err(pending) => return pending,
        }
    }};
}

/// Enter a routine or return the refusal.
#[macro_export]
macro_rules! begin_routine {
    ($rf:expr, $ctx:expr, $routine:expr) => {
        match $rf.begin($ctx, $routine) {
            Ok(point) => point,
            Err(refusal) => return refusal.into(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Context = Context::new(1);
    const B: Context = Context::new(2);

    const OUTER: u8 = 1;
    const INNER: u8 = 2;
    const OTHER: u8 = 3;

    struct Counter {
        rf: Resumable<2>,
        polls: u8,
        ready_after: u8,
    }

    impl Counter {
        fn new(ready_after: u8) -> Self {
            Self {
                rf: Resumable::new(),
                polls: 0,
                ready_after,
            }
        }

        // waits until polled `ready_after` times, then returns the count
        fn inner(&mut self, ctx: Context) -> CoroutineResult<u8> {
            let point = begin_routine!(self.rf, ctx, INNER);
            match point {
                0 => {
                    self.polls += 1;
                    if let Some(r) = self.rf.wait_until(0, self.polls >= self.ready_after) {
                        return r;
                    }
                    let polls = self.polls;
                    self.rf.finish(polls)
                }
                _ => self.rf.wrong_state(),
            }
        }

        fn outer(&mut self, ctx: Context) -> CoroutineResult<u16> {
            let point = begin_routine!(self.rf, ctx, OUTER);
            match point {
                0 | 1 => {
                    self.rf.mark(1);
                    let polls = await_call!(self.rf, self.inner(ctx));
                    self.rf.finish(u16::from(polls) * 10)
                }
                _ => self.rf.wrong_state(),
            }
        }

        fn other(&mut self, ctx: Context) -> CoroutineResult<()> {
            let point = begin_routine!(self.rf, ctx, OTHER);
            match point {
                0 => self.rf.suspend(1),
                _ => self.rf.finish(()),
            }
        }
    }

    // recurses into itself until the depth runs out
    struct Deep {
        rf: Resumable<3>,
        reached: u8,
    }

    impl Deep {
        fn descend(&mut self, ctx: Context, remaining: u8) -> CoroutineResult<u8> {
            let point = begin_routine!(self.rf, ctx, OUTER);
            match point {
                0 => {
                    self.reached += 1;
                    if remaining == 0 {
                        return self.rf.finish(self.reached);
                    }
                    let reached = await_call!(self.rf, self.descend(ctx, remaining - 1));
                    self.rf.finish(reached)
                }
                _ => self.rf.wrong_state(),
            }
        }
    }

    #[test]
    fn suspension_propagates_to_outer_routine() {
        let mut c = Counter::new(3);
        assert_eq!(c.outer(A), CoroutineResult::Running);
        assert!(c.rf.is_running());
        assert_eq!(c.outer(A), CoroutineResult::Running);
        assert_eq!(c.outer(A), CoroutineResult::Stop(30));
        assert!(!c.rf.is_running());
        assert_eq!(c.rf.owner(), None);
        assert_eq!(c.rf.depth(), -1);
    }

    #[test]
    fn foreign_context_is_refused_until_stop() {
        let mut c = Counter::new(2);
        assert_eq!(c.outer(A), CoroutineResult::Running);
        assert_eq!(c.outer(B), CoroutineResult::WrongContext);
        // refusal left A's progress intact
        assert_eq!(c.polls, 1);
        assert_eq!(c.outer(A), CoroutineResult::Stop(20));
        c.polls = 0;
        assert_eq!(c.outer(B), CoroutineResult::Running);
        assert_eq!(c.rf.owner(), Some(B));
    }

    #[test]
    fn second_routine_at_same_level_is_wrong_state() {
        let mut c = Counter::new(5);
        assert_eq!(c.outer(A), CoroutineResult::Running);
        assert_eq!(c.other(A), CoroutineResult::WrongState);
        c.rf.force_stop();
        assert_eq!(c.other(A), CoroutineResult::Running);
        assert_eq!(c.other(A), CoroutineResult::Stop(()));
    }

    #[test]
    fn nesting_within_depth_succeeds() {
        let mut d = Deep {
            rf: Resumable::new(),
            reached: 0,
        };
        // three levels: the outer call plus two nested ones
        assert_eq!(d.descend(A, 2), CoroutineResult::Stop(3));
        assert_eq!(d.rf.owner(), None);
    }

    #[test]
    fn nesting_beyond_depth_reaches_the_caller() {
        let mut d = Deep {
            rf: Resumable::new(),
            reached: 0,
        };
        assert_eq!(d.descend(A, 3), CoroutineResult::NestingError);
        assert_eq!(d.reached, 3);
        assert!(!d.rf.is_running());
        assert_eq!(d.rf.owner(), None);
        assert_eq!(d.rf.depth(), -1);
    }

    #[test]
    fn force_stop_releases_owner() {
        let mut c = Counter::new(9);
        assert_eq!(c.outer(A), CoroutineResult::Running);
        c.rf.force_stop();
        assert!(!c.rf.is_running());
        assert_eq!(c.rf.state(1), Some(ResumeState::Stopped));
        assert_eq!(c.outer(B), CoroutineResult::Running);
    }

    #[test]
    fn nb_adapter_blocks_until_stop() {
        let mut c = Counter::new(4);
        let value = nb::block!(c.outer(A).into_nb());
        assert_eq!(value, Ok(40));
        assert_eq!(
            CoroutineResult::<()>::NestingError.into_nb(),
            Err(nb::Error::Other(Refusal::NestingError))
        );
    }
}
