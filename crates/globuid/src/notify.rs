use crate::Error;

/// Receives every error the engine swallows on its way to a fallback.
///
/// Connection failures, query timeouts, evictions, and tolerated increment
/// drift never reach the caller directly. They are reported here instead, so
/// the host application can forward them to its error tracker.
///
/// Any `Fn(&Error) + Send + Sync` closure is a notifier.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use globuid::{Error, Notifier};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let notifier = move |err: &Error| sink.lock().unwrap().push(err.kind());
///
/// notifier.report(&Error::NotConnected { server: "id_server_1".into() });
/// assert_eq!(*seen.lock().unwrap(), vec!["NotConnected"]);
/// ```
pub trait Notifier: Send + Sync {
    /// Reports a single error.
    fn report(&self, error: &Error);
}

impl<F> Notifier for F
where
    F: Fn(&Error) + Send + Sync,
{
    fn report(&self, error: &Error) {
        self(error)
    }
}

/// The default [`Notifier`]: logs each error through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn report(&self, error: &Error) {
        tracing::error!(kind = error.kind(), "GlobalUID error: {error}");
    }
}
