//! Host-side collaborators of the animation engine: frame clock, background
//! executor, and display sink.

pub mod clock;
pub mod executor;
pub mod sink;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use clock::{FrameClock, IntervalClock, ManualClock, SubscriptionToken, TickCallback};
pub use executor::{Executor, InlineExecutor, Job, SpawnError, WorkerPool};
pub use sink::{DisplaySink, FrameLog, FrameRecorder, PresentedFrame};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
