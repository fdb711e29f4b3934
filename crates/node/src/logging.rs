//! Logging Configuration
//!
//! Structured logging for the sable node: an env filter, a stdout layer and an
//! optional daily rolling file.

use serde::Deserialize;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_FILE_PREFIX: &str = "sable.log";

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,

    /// Log format: "json" or "pretty"
    #[serde(default)]
    pub format: LogFormat,

    /// Log outputs
    #[serde(default = "default_outputs")]
    pub outputs: Vec<LogOutput>,

    /// Log directory (required if outputs contains File)
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_outputs() -> Vec<LogOutput> {
    vec![LogOutput::Stdout]
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl AsRef<str> for LogFormat {
    fn as_ref(&self) -> &str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File,
}

impl AsRef<str> for LogOutput {
    fn as_ref(&self) -> &str {
        match self {
            LogOutput::Stdout => "stdout",
            LogOutput::File => "file",
        }
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

impl LoggingConfig {
    pub fn new() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            outputs: default_outputs(),
            file_path: None,
        }
    }

    /// Initialize the logging system
    ///
    /// Returns a WorkerGuard that must be kept alive for the duration of the program
    /// when file output is enabled.
    pub fn init(&self) -> Result<Option<WorkerGuard>, anyhow::Error> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.level));

        let mut layers = Vec::new();
        let mut guard = None;

        if self.outputs.contains(&LogOutput::Stdout) {
            layers.push(self.fmt_layer(std::io::stdout));
        }

        if self.outputs.contains(&LogOutput::File) {
            let file_path = self
                .file_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("File output requires file_path"))?;

            let file_appender = tracing_appender::rolling::daily(file_path, LOG_FILE_PREFIX);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);
            layers.push(self.fmt_layer(non_blocking));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))?;

        Ok(guard)
    }

    fn fmt_layer<S, W>(&self, writer: W) -> BoxedLayer<S>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + 'static,
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        match self.format {
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .boxed(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new()
    }
}
