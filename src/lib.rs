pub mod analyzer;
pub mod defs;
pub mod error;
pub mod extract;
pub mod parse;
pub mod rank;
pub mod read;
pub mod render;
pub mod shell;
pub mod sink;
pub mod trace;
pub mod write;

use tracing::Level;

/// Logs to stderr so that command output on stdout stays clean.
pub fn init_tracing(level: Level) {
    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_level(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level)),
        )
        .init();
}
