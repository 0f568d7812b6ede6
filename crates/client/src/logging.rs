//! Cross-platform logging.
//!
//! The `log_*!` macros format their arguments once and hand the line to
//! [`emit`], which writes to `tracing` on native targets and to the browser
//! console on wasm32. Every line is prefixed with the subsystem that
//! produced it so console output stays greppable without a subscriber.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(not(target_arch = "wasm32"))]
pub fn emit(level: Level, target: &str, args: fmt::Arguments<'_>) {
    match level {
        Level::Debug => tracing::debug!(subsystem = target, "{}", args),
        Level::Info => tracing::info!(subsystem = target, "{}", args),
        Level::Warn => tracing::warn!(subsystem = target, "{}", args),
        Level::Error => tracing::error!(subsystem = target, "{}", args),
    }
}

#[cfg(target_arch = "wasm32")]
pub fn emit(level: Level, target: &str, args: fmt::Arguments<'_>) {
    let line = wasm_bindgen::JsValue::from_str(&format!("[{}] {}", target, args));
    match level {
        Level::Debug => web_sys::console::debug_1(&line),
        Level::Info => web_sys::console::log_1(&line),
        Level::Warn => web_sys::console::warn_1(&line),
        Level::Error => web_sys::console::error_1(&line),
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`, falling back to
/// `default_filter`. Safe to call more than once; later calls are ignored.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Debug, module_path!(), format_args!($($arg)*))
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Info, module_path!(), format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Warn, module_path!(), format_args!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Error, module_path!(), format_args!($($arg)*))
    };
}
