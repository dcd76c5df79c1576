//! Internal logging helpers for structured Cereal events.
//!
//! The library only emits through the `log` facade; installing a logger is
//! left to the application.

/// Single logging target for Cereal.
pub(crate) const LOG_TARGET: &str = "cereal";

/// Emits `event=<name> <message>` on the crate target, skipping formatting
/// entirely when the level is disabled.
macro_rules! cereal_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!(target: crate::logging::LOG_TARGET, $level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use cereal_log;
