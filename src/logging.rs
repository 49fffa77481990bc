//! The two-level log filter: error (default) and debug.
//!
//! The level is process-wide mutable state held by the `log` facade's
//! atomic max-level; the embedder supplies whatever logger implementation
//! it wants.

use log::LevelFilter;

/// Filter logging down to errors only. This is the default.
pub fn set_error_level() {
    log::set_max_level(LevelFilter::Error);
}

/// Open the filter up to debug output.
pub fn set_debug_level() {
    log::set_max_level(LevelFilter::Debug);
}
