pub mod clock;
pub mod scheduler;
pub mod service;

pub use clock::{Clock, SystemClock};
pub use scheduler::GracePeriodScheduler;
pub use service::{GraceCheckSummary, GracePeriodService};
