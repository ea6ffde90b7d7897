//! Logging setup for relay using `tracing` + `tracing-subscriber`.
//!
//! Log levels:
//! - ERROR: a workflow failed fatally
//! - WARN: a task failed, or a runner rejected a message
//! - INFO: workflow lifecycle (submitted, started, finished, optimized)
//! - DEBUG: scheduling decisions, allocations, config loading
//! - TRACE: every runner message
//!
//! Output goes to `~/.relay/relay.log`, truncated on startup. Debug mode can
//! be enabled with `--debug` or `RELAY_DEBUG=1`; `RELAY_LOG` takes a full
//! `EnvFilter` directive and overrides both.

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging to ~/.relay/relay.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Falls back to stderr when the log file cannot be created. Calling this
/// more than once keeps the first subscriber.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug(std::env::var("RELAY_DEBUG").ok().as_deref());
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = std::env::var("RELAY_LOG")
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(debug_enabled)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let file = Config::log_path().ok().and_then(|path| {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok()?;
        }
        File::create(&path).ok()
    });
    let _ = match file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug(value: Option<&str>) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "relay=debug"
    } else {
        "relay=info"
    }
}
