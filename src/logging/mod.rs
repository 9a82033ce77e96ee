//! # Process-wide `tracing` setup.
//!
//! Only the binary calls [`init`]; library code publishes events on the
//! [`Bus`](crate::Bus) and [`LogWriter`](crate::LogWriter) renders them.
//!
//! - level from `log.level`, overridable with `RUST_LOG`
//! - `console` (human readable) or `json` lines
//! - `enable_caller` adds source file and line
//! - stdout always; a size-rotated [`RollingFile`] when `log.file` is set

mod rolling;

use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::MakeWriter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogConfig, LogFormat};
use crate::error::ConfigError;

pub use rolling::RollingFile;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn logging_err(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Logging {
        reason: e.to_string(),
    }
}

fn fmt_layer<W>(cfg: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .with_file(cfg.enable_caller)
        .with_line_number(cfg.enable_caller);
    match cfg.format {
        LogFormat::Console => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(cfg: &LogConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(logging_err)?;

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(cfg, std::io::stdout, true)];
    if let Some(file) = &cfg.file {
        let rolling = RollingFile::open(
            &file.filename,
            file.max_size.saturating_mul(1024 * 1024),
            file.max_backups,
        )
        .and_then(|f| f.with_compression(file.compress).with_max_age(file.max_age()))
        .map_err(|e| logging_err(format!("{}: {e}", file.filename.display())))?;
        layers.push(fmt_layer(cfg, move || rolling.clone(), false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(logging_err)
}
