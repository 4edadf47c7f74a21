//! Process-wide log setup for binaries built on this crate.
//!
//! Streaming work runs inside spans (`chunk_stream` keyed by `stream_id` for
//! subscriptions, `stream_object` for callback reads), so every reader and
//! subscription event carries the stream it belongs to.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_FILTER: &str = "warn,cores_stream=info,cores=info";
const DEFAULT_LOG_FILE: &str = "cores.logs.jsonl";

static INIT: OnceCell<bool> = OnceCell::new();

/// Where log lines are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr, keeping stdout for command output.
    Console,
    /// One JSON object per line appended to the given file, with the active
    /// stream span attached.
    JsonFile(PathBuf),
}

/// Log settings resolved before the global subscriber is installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// `EnvFilter` directives, for example `debug` or `cores_stream=trace`.
    pub filter: Option<String>,
    pub output: LogOutput,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: None,
            output: LogOutput::Console,
        }
    }
}

impl ObservabilityConfig {
    /// Reads `CORES_LOG` (`off` disables logging), `CORES_LOG_LEVEL` and
    /// `CORES_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let enabled = !matches!(
            value("CORES_LOG").map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("0" | "off" | "false" | "none")
        );
        Self {
            enabled,
            filter: value("CORES_LOG_LEVEL"),
            output: value("CORES_JSON_LOG_PATH")
                .map(|path| LogOutput::JsonFile(PathBuf::from(path)))
                .unwrap_or(LogOutput::Console),
        }
    }

    /// Overrides the filter, e.g. from a `--log-level` flag.
    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    /// Explicit filter first, then `RUST_LOG`, then the crate default.
    /// Invalid directives fall through to the next source.
    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }

    /// Installs the global subscriber once per process.
    ///
    /// Returns whether this call installed it; later calls are no-ops.
    pub fn init(self) -> bool {
        let mut installed = false;
        INIT.get_or_init(|| {
            installed = self.install();
            installed
        });
        installed
    }

    fn install(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let filter = self.env_filter();
        match &self.output {
            LogOutput::Console => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
                    .is_ok()
            }
            LogOutput::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                if std::fs::create_dir_all(&dir).is_err() {
                    return false;
                }
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
                    .is_ok()
            }
        }
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs logging configured from the environment.
pub fn init_observability() -> bool {
    ObservabilityConfig::from_env().init()
}
