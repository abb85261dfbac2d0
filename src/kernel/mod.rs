// Cooperative execution: resumable routines, protothreads and a
// tick-driven priority scheduler. Single core, no per-task stacks.
//
// Everything waits by returning; nothing here blocks except for the
// byte-sized bus primitives the drivers build on top of it.

pub mod clock;
pub mod protothread;
pub mod queue;
pub mod resumable;
pub mod scheduler;
pub mod timer;

pub use clock::{Clock, TickClock};
pub use protothread::{Protothread, Thread};
pub use queue::BoundedQueue;
pub use resumable::{Context, CoroutineResult, Refusal, Resumable};
pub use scheduler::{Scheduler, Task};
pub use timer::{PeriodicTimer, Timeout};
