pub mod actions;
pub mod item;
pub mod multi;
pub mod queue;

pub use actions::{ActionContext, StateMachineAction, StateMachineActionQueue};
pub use item::{JobContext, JobItem, JobOutcome, Processor};
pub use multi::{MultipleEntityWork, MultipleEntityWorkManager, WorkCompletion};
pub use queue::JobQueueManager;
