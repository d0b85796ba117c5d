pub mod ask;
pub mod schema;
pub mod sessions;

use colored::Colorize;
use insight_core::trace::{TraceKind, TraceStep};

/// Prints trace entries, one line each, colored by kind.
pub fn print_trace(trace: &[TraceStep]) {
    for step in trace {
        let time = step.timestamp.format("%H:%M:%S%.3f");
        let label = format!("[{}]", step.kind);
        let label = match step.kind {
            TraceKind::Error => label.red(),
            TraceKind::Sql => label.cyan(),
            TraceKind::Prompt | TraceKind::Response => label.dimmed(),
            TraceKind::Info => label.normal(),
        };
        println!("  {} {} {}", time.to_string().dimmed(), label, step.text);
    }
}
