//! Navigation side effects (sign-in redirect, full reload).

use std::sync::Mutex;

/// Fire-and-forget router seam.
pub trait Navigator: Send + Sync {
    fn redirect_to_sign_in(&self, path: &str);

    /// Reload every tenant-scoped view of this tab.
    fn reload(&self);
}

/// Navigator for headless runs: it only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn redirect_to_sign_in(&self, path: &str) {
        tracing::info!(path, "navigate to sign-in");
    }

    fn reload(&self) {
        tracing::info!("reload tenant-scoped views");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    SignIn(String),
    Reload,
}

/// Keeps every navigation request, in order.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> Vec<Navigation> {
        self.visits.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn record(&self, nav: Navigation) {
        if let Ok(mut visits) = self.visits.lock() {
            visits.push(nav);
        }
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_sign_in(&self, path: &str) {
        self.record(Navigation::SignIn(path.to_string()));
    }

    fn reload(&self) {
        self.record(Navigation::Reload);
    }
}
