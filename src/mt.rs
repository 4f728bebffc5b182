//! Thread and blocking primitives the scheduler is built on.

mod event;
mod semaphore;
mod task;

pub use event::Event;
pub use semaphore::Semaphore;
pub use task::Task;
