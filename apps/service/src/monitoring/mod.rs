/// Monitoring engine module - probes checks and tracks their state
///
/// This module is responsible for:
/// - Validating raw check records
/// - Executing HTTP/HTTPS probes against a deadline
/// - Evaluating outcomes into up/down transitions
/// - Persisting results and sending alerts
/// - Scheduling the periodic cycles that tie these together
pub mod checker;
pub mod evaluator;
pub mod executor;
pub mod scheduler;
pub mod sink;
pub mod types;
pub mod validation;


pub use checker::HttpChecker;
pub use executor::ProbeExecutor;
pub use scheduler::{CheckScheduler, SchedulerConfig};
pub use sink::ResultSink;
