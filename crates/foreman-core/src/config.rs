//! Engine configuration.
//!
//! All knobs live here; the CLI resolves them from its config file and
//! environment, tests override them directly. The retry bounds are policy
//! constants chosen to prevent oscillation, not deep configuration.

use std::time::Duration;

/// How often the engine tails the worker log for realtime display.
pub const REALTIME_INTERVAL: Duration = Duration::from_secs(2);

/// How often a supervisor check is scheduled against a running worker.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1800);

/// How many times the engine asks the orchestrator to resolve failed
/// tasks before giving up and handing the problem to the operator.
pub const MAX_FAILED_RETRIES: u32 = 3;

/// Grace period between SIGINT and SIGKILL when terminating a worker group.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Default pricing used to estimate cost from token counts when an
/// invocation died without emitting a result event (USD per million tokens).
pub const DEFAULT_INPUT_PRICE_PER_MTOK: f64 = 3.0;
pub const DEFAULT_OUTPUT_PRICE_PER_MTOK: f64 = 15.0;

/// Configuration for an engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name or path of the agent CLI binary.
    pub agent_cmd: String,
    /// Interval between realtime log polls.
    pub realtime_interval: Duration,
    /// Interval between supervisor checks.
    pub check_interval: Duration,
    /// Upper bound on consecutive failed-task orchestration rounds.
    pub max_failed_retries: u32,
    /// Stop after this many tasks, if set.
    pub max_tasks: Option<u32>,
    /// Suppress realtime event output.
    pub quiet: bool,
    /// Estimation price for input tokens, USD per million.
    pub input_price_per_mtok: f64,
    /// Estimation price for output tokens, USD per million.
    pub output_price_per_mtok: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_cmd: crate::agent::DEFAULT_AGENT_CMD.to_string(),
            realtime_interval: REALTIME_INTERVAL,
            check_interval: CHECK_INTERVAL,
            max_failed_retries: MAX_FAILED_RETRIES,
            max_tasks: None,
            quiet: false,
            input_price_per_mtok: DEFAULT_INPUT_PRICE_PER_MTOK,
            output_price_per_mtok: DEFAULT_OUTPUT_PRICE_PER_MTOK,
        }
    }
}
