// Tick-driven priority scheduler for run-to-completion tasks
// NOTE: No dynamic allocation; tasks live in a fixed slot array
//
// tick() is meant to be called from a periodic interrupt. It readies every
// task whose period elapsed, then runs ready tasks whose priority is
// strictly above the one currently executing. Bodies run outside the
// critical section, so a nested tick from a higher priority interrupt can
// start more urgent work; equal or lower priority work waits for the
// interrupted task to return.
use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use log::debug;

/// A run-to-completion unit of work.
pub trait Task {
    fn run(&mut self);
}

/// Higher value is more urgent.
pub type Priority = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u8);

impl TaskId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// Every slot is taken
    Full,
    /// A task with period 0 would never run
    ZeroPeriod,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::Full => write!(f, "no free task slot"),
            ScheduleError::ZeroPeriod => write!(f, "period must be at least one tick"),
        }
    }
}

impl core::error::Error for ScheduleError {}

type Body<'a> = &'a mut (dyn Task + Send);

struct Slot<'a> {
    // None while the body executes
    body: Option<Body<'a>>,
    period: u16,
    remaining: u16,
    priority: Priority,
    state: TaskState,
    next_task: Option<u8>,
    next_ready: Option<u8>,
}

struct Lists<'a, const N: usize> {
    slots: [Option<Slot<'a>>; N],
    len: u8,
    task_head: Option<u8>,
    ready_head: Option<u8>,
    // priority of the task executing right now, None when idle
    ceiling: Option<Priority>,
}

impl<'a, const N: usize> Lists<'a, N> {
    const fn new() -> Self {
        Self {
            slots: [const { None }; N],
            len: 0,
            task_head: None,
            ready_head: None,
            ceiling: None,
        }
    }

    fn slot(&mut self, index: u8) -> Option<&mut Slot<'a>> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    fn priority(&self, index: u8) -> Priority {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.priority)
    }

    fn next_ready(&self, index: u8) -> Option<u8> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .and_then(|slot| slot.next_ready)
    }

    // count down every task; ready the ones whose period elapsed
    fn count_down(&mut self) {
        let mut cursor = self.task_head;
        while let Some(index) = cursor {
            let mut expired = false;
            if let Some(slot) = self.slot(index) {
                cursor = slot.next_task;
                slot.remaining = slot.remaining.saturating_sub(1);
                if slot.remaining == 0 {
                    slot.remaining = slot.period;
                    expired = slot.state != TaskState::Ready;
                }
            } else {
                cursor = None;
            }
            if expired {
                self.insert_ready(index);
            }
        }
    }

    // after every entry of greater or equal priority
    fn insert_ready(&mut self, index: u8) {
        let priority = self.priority(index);
        let mut prev: Option<u8> = None;
        let mut cursor = self.ready_head;
        while let Some(i) = cursor {
            if self.priority(i) < priority {
                break;
            }
            prev = Some(i);
            cursor = self.next_ready(i);
        }
        if let Some(slot) = self.slot(index) {
            slot.state = TaskState::Ready;
            slot.next_ready = cursor;
        }
        match prev.and_then(|p| self.slot(p)) {
            Some(p) => p.next_ready = Some(index),
            None => self.ready_head = Some(index),
        }
    }

    // pop the ready head if it may preempt whatever is executing
    fn take_runnable(&mut self) -> Option<Dispatch<'a>> {
        let index = self.ready_head?;
        let priority = self.priority(index);
        if self.ceiling.is_some_and(|c| priority <= c) {
            return None;
        }
        let previous = self.ceiling;
        let slot = self.slot(index)?;
        let body = slot.body.take();
        slot.state = TaskState::Running;
        let next = slot.next_ready.take();
        self.ready_head = next;
        self.ceiling = Some(priority);
        Some(Dispatch {
            index,
            priority,
            previous,
            body,
        })
    }

    fn complete(&mut self, dispatch: Dispatch<'a>) {
        self.ceiling = dispatch.previous;
        if let Some(slot) = self.slot(dispatch.index) {
            slot.body = dispatch.body;
            // may have been readied again while it ran
            if slot.state == TaskState::Running {
                slot.state = TaskState::Waiting;
            }
        }
    }
}

struct Dispatch<'a> {
    index: u8,
    priority: Priority,
    previous: Option<Priority>,
    body: Option<Body<'a>>,
}

pub struct Scheduler<'a, const N: usize> {
    lists: Mutex<RefCell<Lists<'a, N>>>,
}

impl<'a, const N: usize> Scheduler<'a, N> {
    pub const fn new() -> Self {
        const { assert!(N > 0 && N <= u8::MAX as usize, "slot count must fit a u8") };
        Self {
            lists: Mutex::new(RefCell::new(Lists::new())),
        }
    }

    /// Register `task` to run every `period` ticks. The first run happens
    /// `period` ticks from now.
    pub fn schedule(
        &self,
        task: &'a mut (dyn Task + Send),
        period: u16,
        priority: Priority,
    ) -> Result<TaskId, ScheduleError> {
        if period == 0 {
            return Err(ScheduleError::ZeroPeriod);
        }
        critical_section::with(|cs| {
            let mut lists = self.lists.borrow_ref_mut(cs);
            let index = lists.len;
            let head = lists.task_head;
            let slot = lists
                .slots
                .get_mut(index as usize)
                .ok_or(ScheduleError::Full)?;
            *slot = Some(Slot {
                body: Some(task),
                period,
                remaining: period,
                priority,
                state: TaskState::Waiting,
                next_task: head,
                next_ready: None,
            });
            lists.task_head = Some(index);
            lists.len += 1;
            Ok(TaskId(index))
        })
    }

    /// Advance time by one tick and run whatever became runnable.
    pub fn tick(&self) {
        critical_section::with(|cs| self.lists.borrow_ref_mut(cs).count_down());

        while let Some(mut dispatch) =
            critical_section::with(|cs| self.lists.borrow_ref_mut(cs).take_runnable())
        {
            debug!("sched: run task#{} prio {}", dispatch.index, dispatch.priority);
            if let Some(body) = dispatch.body.as_mut() {
                body.run();
            }
            critical_section::with(|cs| self.lists.borrow_ref_mut(cs).complete(dispatch));
        }
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        critical_section::with(|cs| {
            self.lists
                .borrow_ref(cs)
                .slots
                .get(id.index())
                .and_then(Option::as_ref)
                .map(|slot| slot.state)
        })
    }

    /// Priority of the task executing right now.
    pub fn ceiling(&self) -> Option<Priority> {
        critical_section::with(|cs| self.lists.borrow_ref(cs).ceiling)
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.lists.borrow_ref(cs).len as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for Scheduler<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
