//! Logging macros. Every call both writes a `tracing` event (for operators
//! tailing the process) and emits an [`crate::events::EventType`] (for the
//! library consumer) — mirroring the teacher's `info!`/`warn!`/`error!`
//! pattern of logging and notifying through the same call.

#[macro_export]
macro_rules! info {
    ($events:expr, $msg:expr) => {
        $crate::info!($events, $msg,)
    };
    ($events:expr, $msg:expr, $($args:expr),* $(,)?) => {
        let formatted = format!($msg, $($args),*);
        tracing::info!("{}", formatted);
        $crate::emit_event!($events, $crate::events::EventType::Info(formatted));
    };
}

#[macro_export]
macro_rules! warn {
    ($events:expr, $msg:expr) => {
        $crate::warn!($events, $msg,)
    };
    ($events:expr, $msg:expr, $($args:expr),* $(,)?) => {
        let formatted = format!($msg, $($args),*);
        tracing::warn!("{}", formatted);
        $crate::emit_event!($events, $crate::events::EventType::Warning(formatted));
    };
}

#[macro_export]
macro_rules! error {
    ($events:expr, $msg:expr) => {
        $crate::error!($events, $msg,)
    };
    ($events:expr, $msg:expr, $($args:expr),* $(,)?) => {
        let formatted = format!($msg, $($args),*);
        tracing::error!("{}", formatted);
        $crate::emit_event!($events, $crate::events::EventType::Error(formatted));
    };
}

#[macro_export]
macro_rules! emit_event {
    ($events:expr, $event:expr) => {
        $events.emit($event);
    };
}
