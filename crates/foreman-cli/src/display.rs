//! Shared terminal output for interactive agent calls.

use foreman_core::agent::{AgentEvent, EventSink, truncate_for_display};

/// Sink that narrates an agent invocation to stdout, used by the
/// planning and learn flows where the user is watching.
pub struct PrinterSink {
    quiet: bool,
}

impl PrinterSink {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl EventSink for PrinterSink {
    fn on_event(&mut self, event: &AgentEvent) {
        if self.quiet {
            return;
        }
        match event {
            AgentEvent::AssistantText { content } => {
                println!("   ~ {}", truncate_for_display(content, 100));
            }
            AgentEvent::ToolUse { name, input_summary } => {
                if input_summary.is_empty() {
                    println!("   > {name}");
                } else {
                    println!("   > {name}: {input_summary}");
                }
            }
            AgentEvent::Result { cost_usd, .. } => {
                println!("   cost: ${cost_usd:.4}");
            }
            _ => {}
        }
    }
}
