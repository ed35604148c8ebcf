pub mod completion;
pub mod dispatcher;
pub mod planner;
pub mod recovery;

pub use completion::{CompletionDetector, CompletionVerdict};
pub use dispatcher::{BatchDispatcher, DispatchReport};
pub use planner::plan_schedule;
pub use recovery::{RecoveryJanitor, RecoveryReport};
