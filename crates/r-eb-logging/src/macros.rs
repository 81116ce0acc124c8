//! ---
//! eb_section: "03-persistence-logging"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Context enriched logging macros."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! `eb_*` macros accept an optional `context = <LogContext>` prefix.

#[doc(hidden)]
#[macro_export]
macro_rules! __eb_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            activity = ctx.activity.unwrap_or(""),
            workload = ctx.workload.unwrap_or(""),
            slot = ctx.slot.unwrap_or_default(),
            cycle = ctx.cycle.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with activity context.
#[macro_export]
macro_rules! eb_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with activity context.
#[macro_export]
macro_rules! eb_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with activity context.
#[macro_export]
macro_rules! eb_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with activity context.
#[macro_export]
macro_rules! eb_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eb_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
