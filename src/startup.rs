//! Client assembly.
//!
//! Builds the token store, navigator and transport described by the
//! configuration and wires them into an [`AuthClient`].

use std::sync::Arc;

use tracing::info;

use crate::client::{AuthClient, ReqwestTransport};
use crate::config::ConfigV1;
use crate::error::ClientError;
use crate::navigation::SessionNavigator;
use crate::store::create_store;

/// A ready-to-use client plus the navigator it reports to.
pub struct Session {
    pub client: AuthClient,
    pub navigator: Arc<SessionNavigator>,
}

/// Initializes the client from the loaded configuration.
///
/// # Errors
///
/// Returns an error if the token store cannot be opened or the HTTP client
/// cannot be built.
pub async fn build_session(config: &ConfigV1) -> Result<Session, ClientError> {
    let store = create_store(&config.store).await?;
    let navigator = Arc::new(SessionNavigator::new(&config.navigation));
    let transport = Arc::new(ReqwestTransport::from_config(&config.client)?);

    info!(
        "Using backend '{}' (timeout {} ms, refresh ceiling {})",
        config.client.base_url, config.client.timeout_in_ms, config.client.refresh_attempt_ceiling
    );

    let client = AuthClient::new(transport, store, navigator.clone(), config.client.clone());
    Ok(Session { client, navigator })
}
