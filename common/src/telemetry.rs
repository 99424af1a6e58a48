//! Provides helper functions for initializing log collection in test binaries.
use anyhow::Result;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{writer::BoxMakeWriter, TestWriter},
    prelude::*,
    EnvFilter, Registry,
};

/// Initialize tracing with a compact logger writing to stdout.
///
/// The filter is read from `RUST_LOG` and defaults to INFO.
pub fn init() -> Result<()> {
    let collector = collector(true, BoxMakeWriter::new(std::io::stdout))?;
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

/// Initialize tracing for test processes.
///
/// Output goes through the libtest capture. Many tests share one process, so only
/// the first call installs the collector and later calls are no-ops.
pub fn init_for_tests() {
    if let Ok(collector) = collector(false, BoxMakeWriter::new(TestWriter::new())) {
        let _ = tracing::subscriber::set_global_default(collector);
    }
}

fn collector(
    ansi: bool,
    writer: BoxMakeWriter,
) -> Result<impl tracing::Subscriber + Send + Sync> {
    // Default to INFO if no env is specified
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let logger = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer)
        .compact()
        .with_filter(log_filter);

    Ok(Registry::default().with(logger))
}
