//! Where the session goes when authentication cannot be recovered.
//!
//! In the browser this was a route change (login) or a full page load (root).
//! Here a [`Navigator`] receives the same two requests; [`SessionNavigator`]
//! logs them and keeps a record the caller can inspect afterwards.

use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::config::NavigationConfig;

/// A navigation issued by the client after a terminal auth failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Client-side redirect to the login route.
    Login { url: String },
    /// Hard navigation to the application root, dropping all in-memory state.
    Reload { url: String },
}

pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
    fn reload_to_root(&self);
}

/// Joins the configured base path with the root route: `""` -> `/`, `/atms/` -> `/atms/`.
pub fn root_url(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        format!("{}/", trimmed)
    } else {
        format!("/{}/", trimmed)
    }
}

/// Records every navigation and reports it through tracing.
pub struct SessionNavigator {
    root: String,
    history: Mutex<Vec<Navigation>>,
}

impl SessionNavigator {
    pub fn new(config: &NavigationConfig) -> Self {
        SessionNavigator {
            root: root_url(&config.base_path),
            history: Mutex::new(Vec::new()),
        }
    }

    /// All navigations so far, oldest first.
    pub fn history(&self) -> Vec<Navigation> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<Navigation> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    fn record(&self, navigation: Navigation) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(navigation);
    }
}

impl Navigator for SessionNavigator {
    fn redirect_to_login(&self) {
        warn!(target_url = %self.root, "Session ended; redirecting to login");
        self.record(Navigation::Login {
            url: self.root.clone(),
        });
    }

    fn reload_to_root(&self) {
        warn!(target_url = %self.root, "Refresh attempts exhausted; reloading application root");
        self.record(Navigation::Reload {
            url: self.root.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_url_respects_base_path() {
        assert_eq!(root_url(""), "/");
        assert_eq!(root_url("/"), "/");
        assert_eq!(root_url("/atms"), "/atms/");
        assert_eq!(root_url("atms/"), "/atms/");
    }

    #[test]
    fn test_navigations_are_recorded_in_order() {
        let navigator = SessionNavigator::new(&NavigationConfig {
            base_path: "/training".to_string(),
        });
        assert_eq!(navigator.last(), None);

        navigator.redirect_to_login();
        navigator.reload_to_root();

        assert_eq!(
            navigator.history(),
            vec![
                Navigation::Login {
                    url: "/training/".to_string()
                },
                Navigation::Reload {
                    url: "/training/".to_string()
                },
            ]
        );
    }
}
