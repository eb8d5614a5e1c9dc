pub mod perf;
pub mod retry;

pub use perf::{PerformanceStats, TimingTracker};
pub use retry::{call_with_retry, within_budget, CancelToken, RetryPolicy};
