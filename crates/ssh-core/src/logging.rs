use std::sync::atomic::{AtomicI32, Ordering};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, reload};

static RELOAD: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();
static CURRENT_IDX: AtomicI32 = AtomicI32::new(2); // 0=error,1=warn,2=info,3=debug,4=trace

const LEVELS: [LevelFilter; 5] = [
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

/// Target used for the per-connection app-log lines requested through `log-message`.
pub const APP_LOG_TARGET: &str = "app_log";
/// Target used for gauge updates.
pub const METRICS_TARGET: &str = "metrics";

pub fn set_reload_handle(handle: reload::Handle<EnvFilter, Registry>, initial: LevelFilter) {
    let _ = RELOAD.set(handle);
    CURRENT_IDX.store(level_to_idx(initial), Ordering::Relaxed);
}

/// Apply a level immediately. No-op until a reload handle is installed.
pub fn set_level(level: LevelFilter) {
    CURRENT_IDX.store(level_to_idx(level), Ordering::Relaxed);
    if let Some(handle) = RELOAD.get() {
        let _ = handle.reload(EnvFilter::new(level_to_str(level)));
    }
}

pub fn increase_verbosity() -> Option<LevelFilter> {
    adjust_by(1)
}

pub fn decrease_verbosity() -> Option<LevelFilter> {
    adjust_by(-1)
}

/// Parse a level name, falling back to info for anything unrecognised.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "error" => LevelFilter::ERROR,
        "warn" | "warning" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

fn adjust_by(delta: i32) -> Option<LevelFilter> {
    let handle = RELOAD.get()?;
    let idx = (CURRENT_IDX.load(Ordering::Relaxed) + delta).clamp(0, 4);
    CURRENT_IDX.store(idx, Ordering::Relaxed);
    let level = LEVELS[idx as usize];
    let _ = handle.reload(EnvFilter::new(level_to_str(level)));
    Some(level)
}

fn level_to_idx(level: LevelFilter) -> i32 {
    LEVELS.iter().position(|l| *l == level).map(|i| i as i32).unwrap_or(2)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    }
}
