use std::fmt::Display;
use std::time::Instant;

use console::Style;
use indicatif::{ProgressStyle, style::TemplateError};

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

pub(crate) fn get_style_batch() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

/// Installs a global `tracing` subscriber that keeps log lines from tearing
/// through batch progress bars. The filter is read from `RUST_LOG` and
/// defaults to `info`.
///
/// Only one subscriber can be installed per process, calling this twice is an
/// error.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), crate::error::LoggingError> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()
        .map_err(|e| crate::error::LoggingError::Install(e.to_string()))
}
