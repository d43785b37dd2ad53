//! Ambient logging setup shared by the `rekord` binaries.
//!
//! Sets up a [`tracing`] subscriber writing compact, level-filtered output to
//! stderr, plus an indicatif-backed progress layer so long `put`/`get` runs
//! can show live progress bars without fighting with log lines.

use lazy_static::lazy_static;
use tracing::Level;
use tracing_indicatif::{filter::IndicatifFilter, IndicatifLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

lazy_static! {
    pub static ref PB_PROGRESS_STYLE: indicatif::ProgressStyle =
        indicatif::ProgressStyle::with_template(
            "{span_child_prefix}{bar:30} {wide_msg} [{elapsed_precise}]  {pos:>7}/{len:7}"
        )
        .expect("invalid progress template");
    pub static ref PB_SPINNER_STYLE: indicatif::ProgressStyle =
        indicatif::ProgressStyle::with_template(
            "{span_child_prefix}{spinner} {wide_msg} [{elapsed_precise}]"
        )
        .expect("invalid progress template");
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for the process-wide tracing subscriber.
pub struct TracingBuilder {
    level: Level,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder { level: Level::INFO }
    }
}

impl TracingBuilder {
    /// Sets the default log level for the stderr layer. `RUST_LOG` still
    /// takes priority when set.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Installs the subscriber as the global default. Must be called once,
    /// near the start of `main`.
    pub fn build(self) -> Result<(), Error> {
        let indicatif_layer = IndicatifLayer::new().with_progress_style(PB_SPINNER_STYLE.clone());

        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(self.level.into())
                    .from_env()
                    .expect("invalid RUST_LOG"),
            )
            .with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(indicatif_layer.get_stderr_writer())
                    .compact(),
            )
            .with(indicatif_layer.with_filter(IndicatifFilter::new(false)))
            .try_init()?;

        Ok(())
    }
}
