//! Tracing setup for test binaries.
//!
//! Call [`init_test_logging`] once per test binary, typically from a
//! constructor hook:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     agentwatch::testing::init_test_logging();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `AGENTWATCH_TEST_LOG_LEVEL`: filter directive (default: `info`). Either a
//!   bare level (`debug`) or a full `EnvFilter` directive.
//! - `AGENTWATCH_TEST_LOG_FILE`: when set, events are also written to this
//!   path as JSONL.

use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static GLOBAL_LOGGING_INIT: Once = Once::new();

const LEVEL_VAR: &str = "AGENTWATCH_TEST_LOG_LEVEL";
const FILE_VAR: &str = "AGENTWATCH_TEST_LOG_FILE";

/// Install the global test subscriber. Safe to call multiple times; only
/// the first call has an effect, and an already-installed subscriber from
/// elsewhere is left alone.
pub fn init_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = std::env::var(FILE_VAR)
            .ok()
            .and_then(|path| create_log_file(Path::new(&path)))
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_span_events(FmtSpan::CLOSE)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
            });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var(LEVEL_VAR).unwrap_or_else(|_| "info".to_string());

        let subscriber = tracing_subscriber::registry()
            .with(filter_for(&level))
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Build the filter for a level string, falling back to `info` for
/// anything `EnvFilter` cannot parse.
fn filter_for(level: &str) -> EnvFilter {
    let level = level.trim();
    let directive = if is_bare_level(level) {
        format!("agentwatch={level}")
    } else {
        level.to_string()
    };
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn is_bare_level(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    )
}

fn create_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::File::create(path).ok()
}
