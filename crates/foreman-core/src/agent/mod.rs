//! The agent layer: a thin, uniform facade over the external agent CLI.
//!
//! Everything the engine knows about the agent goes through here:
//!
//! - [`runner`] spawns the CLI (foreground with streamed events, or
//!   detached background with output redirected to a log file)
//! - [`events`] decodes the CLI's stream-json output line by line
//! - [`log`] parses worker log files, both whole and incrementally
//!
//! The agent itself is opaque: the only state carried across invocations
//! is its session id, an agent-issued string re-supplied on `--resume`.

pub mod events;
pub mod log;
pub mod runner;

pub use events::{AgentEvent, summarize_tool_input, truncate_for_display};
pub use log::{LogCursor, ParsedLog, parse_log_file};
pub use runner::{
    AgentChild, AgentOutcome, AgentRunner, DEFAULT_AGENT_CMD, EventSink, NullSink, RunOptions,
};
