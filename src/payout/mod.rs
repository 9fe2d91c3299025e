pub mod models;
pub mod orchestrator;

pub use models::PayoutStep;
pub use orchestrator::PayoutOrchestrator;
