//! Structured logging configuration.
//!
//! Mirrors the teacher's `TracingConfig`/`WriterConfig` split: a `WriterConfig`
//! picks where logs go, `install_global` sets the process-wide subscriber
//! (used by the demo binaries), `install_thread_local` sets a per-thread
//! subscriber (used by tests so parallel tests don't fight over one sink).

use tracing::dispatcher;
use tracing_core::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt};

/// Where to send formatted log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayTarget {
    Stdout,
    Stderr,
}

/// How to configure tracing output: display only, file only, both, or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterConfig {
    None,
    Display(DisplayTarget),
    File(String),
    DisplayAndFile(DisplayTarget, String),
}

/// Top-level logging configuration for a binary or a test.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub writer_config: WriterConfig,
    pub level_filter: LevelFilter,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            writer_config: WriterConfig::Display(DisplayTarget::Stderr),
            level_filter: LevelFilter::INFO,
        }
    }
}

type DynLayer<S> = dyn Layer<S> + Send + Sync + 'static;

impl TracingConfig {
    /// Installs this configuration as the thread-local tracing subscriber.
    ///
    /// Drop the returned guard to restore the previous subscriber for this
    /// thread. Intended for tests, where each test may want its own sink.
    ///
    /// # Errors
    ///
    /// Returns an error if a file writer was requested and the path could not
    /// be opened.
    pub fn install_thread_local(self) -> miette::Result<dispatcher::DefaultGuard> {
        let layers = try_create_layers(&self)?;
        Ok(tracing_subscriber::registry().with(layers).set_default())
    }

    /// Installs this configuration as the process-wide global subscriber.
    ///
    /// Can only be called once per process; a second call returns an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a file writer was requested and the path could not
    /// be opened, or if a global subscriber was already installed.
    pub fn install_global(self) -> miette::Result<()> {
        let layers = try_create_layers(&self)?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| miette::miette!("tracing subscriber already installed: {e}"))
    }
}

fn try_create_layers(
    config: &TracingConfig,
) -> miette::Result<Vec<Box<DynLayer<tracing_subscriber::Registry>>>> {
    let mut layers: Vec<Box<DynLayer<tracing_subscriber::Registry>>> = vec![];

    match &config.writer_config {
        WriterConfig::None => {}
        WriterConfig::Display(target) => {
            layers.push(make_display_layer(target, config.level_filter));
        }
        WriterConfig::File(path_prefix) => {
            layers.push(make_file_layer(path_prefix, config.level_filter)?);
        }
        WriterConfig::DisplayAndFile(target, path_prefix) => {
            layers.push(make_display_layer(target, config.level_filter));
            layers.push(make_file_layer(path_prefix, config.level_filter)?);
        }
    }

    Ok(layers)
}

fn make_display_layer<S>(target: &DisplayTarget, level_filter: LevelFilter) -> Box<DynLayer<S>>
where
    S: tracing_core::Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    match target {
        DisplayTarget::Stdout => Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(level_filter),
        ),
        DisplayTarget::Stderr => Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(level_filter),
        ),
    }
}

fn make_file_layer<S>(
    path_prefix: &str,
    level_filter: LevelFilter,
) -> miette::Result<Box<DynLayer<S>>>
where
    S: tracing_core::Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let (dir, prefix) = match path_prefix.rsplit_once('/') {
        Some((dir, prefix)) => (dir.to_string(), prefix.to_string()),
        None => (".".to_string(), path_prefix.to_string()),
    };
    let appender = tracing_appender::rolling::never(dir, prefix);
    Ok(Box::new(
        tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_filter(level_filter),
    ))
}
