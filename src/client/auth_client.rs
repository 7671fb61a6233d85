//! The authenticated HTTP client and its token-refresh protocol.
//!
//! Every request is decorated with the access token currently in the store.
//! When the backend answers 401/403 for a non-auth endpoint, the first request
//! to notice becomes the refresh owner: it exchanges the refresh token for a new
//! pair, then replays itself. Requests failing while that refresh is in flight
//! park in a FIFO queue and replay once it settles. A refresh failure ends the
//! session (store cleared, redirect to login); once the attempt ceiling is
//! reached the application is reset to its root instead of refreshing again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::queue::{RefreshOutcome, RefreshState};
use super::request::{ApiResponse, OutboundRequest};
use super::transport::Transport;
use crate::config::ClientConfig;
use crate::error::{ClientError, RefreshError};
use crate::models::token::{self, TokenPair, TokenStatus};
use crate::models::User;
use crate::navigation::Navigator;
use crate::store::{StoreKey, TokenStore};
use crate::utils::LogThrottle;

const EXPIRY_LOG_WINDOW: Duration = Duration::from_secs(30);
const EXPIRED_LOG_KEY: &str = "access_token.expired";
const EXPIRING_LOG_KEY: &str = "access_token.expiring";

/// How a recovery attempt ended for the request that triggered it.
#[derive(Debug)]
pub enum Recovery {
    /// The request was replayed with fresh credentials and succeeded.
    Recovered(ApiResponse),
    /// The request could not be recovered; this is the error the caller sees.
    Failed(ClientError),
}

impl Recovery {
    pub fn into_result(self) -> Result<ApiResponse, ClientError> {
        match self {
            Recovery::Recovered(response) => Ok(response),
            Recovery::Failed(error) => Err(error),
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<Value>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Both tokens must be present and non-empty.
fn token_pair(access: Option<String>, refresh: Option<String>) -> Result<TokenPair, String> {
    match (access, refresh) {
        (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
            Ok(TokenPair::new(access, refresh))
        }
        (Some(access), _) if !access.is_empty() => Err("missing refresh_token".to_string()),
        _ => Err("missing access_token".to_string()),
    }
}

/// Which part a request plays once it has decided to recover.
enum RecoveryRole {
    Owner { attempt: u32, epoch: u64 },
    Waiter { ticket: u64, receiver: oneshot::Receiver<RefreshOutcome> },
    Exhausted,
}

/// Ends a refresh cycle. If the owning future is dropped before settling,
/// the drop releases the lock and tells the waiters the refresh was abandoned.
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        RefreshGuard {
            state,
            settled: false,
        }
    }

    fn settle(mut self, outcome: &RefreshOutcome) -> Vec<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.is_refreshing = false;
        if outcome.is_ok() {
            state.refresh_attempts = 0;
        }
        self.settled = true;
        state.queue.settle(outcome)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.is_refreshing = false;
        let abandoned = state.queue.settle(&Err(RefreshError::Abandoned));
        warn!(
            waiters = abandoned.len(),
            "Refresh owner went away before the refresh settled"
        );
    }
}

/// HTTP client that attaches the session's bearer token and recovers from
/// expired access tokens.
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    config: ClientConfig,
    state: Mutex<RefreshState>,
    expiry_logs: LogThrottle,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        config: ClientConfig,
    ) -> Self {
        info!(
            "Creating auth client for '{}' with store '{}'",
            config.base_url,
            store.get_name()
        );
        AuthClient {
            transport,
            store,
            navigator,
            config,
            state: Mutex::new(RefreshState::default()),
            expiry_logs: LogThrottle::new(EXPIRY_LOG_WINDOW),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Refreshes started since the last successful refresh.
    pub fn refresh_attempts(&self) -> u32 {
        self.lock_state().refresh_attempts
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_state().is_refreshing
    }

    /// Requests currently parked behind an in-flight refresh.
    pub fn pending_requests(&self) -> usize {
        self.lock_state().queue.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(OutboundRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(OutboundRequest::delete(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, ClientError> {
        self.send(OutboundRequest::post(path).with_json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, ClientError> {
        self.send(OutboundRequest::put(path).with_json(body)?).await
    }

    /// Sends `request`, transparently recovering from an expired access token
    /// when possible. Non-2xx answers are returned as [`ClientError::Status`].
    pub async fn send(&self, mut request: OutboundRequest) -> Result<ApiResponse, ClientError> {
        match self.dispatch(&mut request).await {
            Ok(response) => Ok(response),
            Err(error) if self.qualifies_for_refresh(&request, &error) => {
                self.recover(request, error).await.into_result()
            }
            Err(error) => {
                self.enforce_ceiling(&request, &error).await;
                Err(error)
            }
        }
    }

    fn is_recoverable_failure(&self, request: &OutboundRequest, error: &ClientError) -> bool {
        error.is_auth_failure() && !request.targets(&self.config.auth_path_marker)
    }

    fn qualifies_for_refresh(&self, request: &OutboundRequest, error: &ClientError) -> bool {
        self.is_recoverable_failure(request, error)
            && !request.is_retried()
            && self.refresh_attempts() < self.config.refresh_attempt_ceiling
    }

    /// A 401/403 arriving once the ceiling is reached resets the application.
    async fn enforce_ceiling(&self, request: &OutboundRequest, error: &ClientError) {
        if self.is_recoverable_failure(request, error)
            && self.refresh_attempts() >= self.config.refresh_attempt_ceiling
        {
            self.reset_after_ceiling().await;
        }
    }

    /// Recovers `request` from the auth failure `error`, either by running the
    /// refresh itself or by waiting for the one already in flight.
    pub async fn recover(&self, mut request: OutboundRequest, error: ClientError) -> Recovery {
        request.mark_retried();

        let role = {
            let mut state = self.lock_state();
            if state.is_refreshing {
                let (ticket, receiver) = state.queue.push(request.id());
                RecoveryRole::Waiter { ticket, receiver }
            } else if state.refresh_attempts >= self.config.refresh_attempt_ceiling {
                RecoveryRole::Exhausted
            } else {
                state.is_refreshing = true;
                state.refresh_attempts += 1;
                RecoveryRole::Owner {
                    attempt: state.refresh_attempts,
                    epoch: state.session_epoch,
                }
            }
        };

        match role {
            RecoveryRole::Owner { attempt, epoch } => {
                self.refresh_and_replay(request, attempt, epoch).await
            }
            RecoveryRole::Waiter { ticket, receiver } => {
                debug!(
                    request_id = %request.id(),
                    ticket,
                    "Refresh already in flight; queueing request"
                );
                match receiver.await {
                    Ok(Ok(access_token)) => match self.replay(request, &access_token).await {
                        Ok(response) => Recovery::Recovered(response),
                        Err(error) => Recovery::Failed(error),
                    },
                    Ok(Err(refresh_error)) => Recovery::Failed(refresh_error.into()),
                    Err(_) => Recovery::Failed(RefreshError::Abandoned.into()),
                }
            }
            RecoveryRole::Exhausted => {
                self.reset_after_ceiling().await;
                Recovery::Failed(error)
            }
        }
    }

    async fn refresh_and_replay(
        &self,
        request: OutboundRequest,
        attempt: u32,
        epoch: u64,
    ) -> Recovery {
        let guard = RefreshGuard::new(&self.state);
        info!(
            request_id = %request.id(),
            attempt,
            ceiling = self.config.refresh_attempt_ceiling,
            "Access token rejected; refreshing session"
        );

        match self.refresh_tokens(epoch).await {
            Ok(tokens) => {
                let order = guard.settle(&Ok(tokens.access_token.clone()));
                info!(queued = order.len(), "Session refreshed");
                if !order.is_empty() {
                    debug!(?order, "Released queued requests with the new access token");
                }
                self.expiry_logs.reset(EXPIRED_LOG_KEY);
                self.expiry_logs.reset(EXPIRING_LOG_KEY);

                match self.replay(request, &tokens.access_token).await {
                    Ok(response) => Recovery::Recovered(response),
                    Err(error) => {
                        if error.status() == Some(StatusCode::FORBIDDEN) {
                            warn!("Replay still forbidden with fresh credentials; ending session");
                            self.end_session().await;
                        }
                        Recovery::Failed(error)
                    }
                }
            }
            Err(RefreshError::SessionReset) => {
                let order = guard.settle(&Err(RefreshError::SessionReset));
                info!(
                    rejected = order.len(),
                    "Session was reset during the refresh; discarding issued tokens"
                );
                Recovery::Failed(RefreshError::SessionReset.into())
            }
            Err(refresh_error) => {
                let order = guard.settle(&Err(refresh_error.clone()));
                warn!(
                    rejected = order.len(),
                    "Token refresh failed: {}", refresh_error
                );
                self.end_session().await;
                Recovery::Failed(refresh_error.into())
            }
        }
    }

    /// Exchanges the stored refresh token for a new pair and persists it,
    /// unless the session was cleared after `epoch` was taken.
    async fn refresh_tokens(&self, epoch: u64) -> Result<TokenPair, RefreshError> {
        let refresh_token = self
            .store
            .get(StoreKey::RefreshToken)
            .await
            .map_err(|e| RefreshError::Store(e.to_string()))?
            .ok_or(RefreshError::MissingRefreshToken)?;

        // Only a readable `exp` in the past short-circuits; opaque tokens go to the server.
        let now = Utc::now().timestamp();
        if token::inspect(&refresh_token, now, 0) == TokenStatus::Expired {
            return Err(RefreshError::RefreshTokenExpired);
        }

        let request = OutboundRequest::post(&self.config.refresh_path)
            .with_json_value(json!({ "refresh_token": refresh_token }));
        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(|e| match e {
                ClientError::Network { message, .. } => RefreshError::Network(message),
                other => RefreshError::Network(other.to_string()),
            })?;

        if !response.is_success() {
            return Err(RefreshError::Status {
                status: response.status,
                body: response.text(),
            });
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        let tokens =
            token_pair(body.access_token, body.refresh_token).map_err(RefreshError::Malformed)?;

        if self.session_epoch() != epoch {
            return Err(RefreshError::SessionReset);
        }
        self.store
            .store_tokens(&tokens)
            .await
            .map_err(|e| RefreshError::Store(e.to_string()))?;
        // A reset may have cleared the store while the write was pending.
        if self.session_epoch() != epoch {
            self.clear_store().await;
            return Err(RefreshError::SessionReset);
        }
        Ok(tokens)
    }

    /// Decorates `request` with the stored access token and sends it.
    async fn dispatch(&self, request: &mut OutboundRequest) -> Result<ApiResponse, ClientError> {
        let access_token = match self.store.get(StoreKey::AccessToken).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not read access token, sending unauthenticated: {}", e);
                None
            }
        };
        if let Some(token) = &access_token {
            self.log_expiry(token);
        }
        request.set_bearer(access_token);
        self.execute(request).await
    }

    /// Sends the request again with `access_token`. Replays never start another
    /// refresh, they only honour the attempt ceiling.
    async fn replay(
        &self,
        mut request: OutboundRequest,
        access_token: &str,
    ) -> Result<ApiResponse, ClientError> {
        debug!(request_id = %request.id(), "Replaying request with refreshed token");
        request.set_bearer(Some(access_token.to_string()));
        let result = self.execute(&request).await;
        if let Err(error) = &result {
            self.enforce_ceiling(&request, error).await;
        }
        result
    }

    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, ClientError> {
        debug!(
            request_id = %request.id(),
            method = %request.method(),
            authenticated = request.bearer().is_some(),
            "Sending request to '{}'",
            request.path()
        );
        self.transport
            .execute(request)
            .await?
            .into_result(request.path())
    }

    /// Informational only: an expired token is still sent, the server decides.
    fn log_expiry(&self, access_token: &str) {
        let now = Utc::now().timestamp();
        match token::inspect(access_token, now, self.config.expiry_warning_seconds) {
            status @ (TokenStatus::Expired | TokenStatus::Malformed) => {
                if let Some(suppressed) = self.expiry_logs.should_emit(EXPIRED_LOG_KEY) {
                    warn!(
                        ?status,
                        suppressed, "Access token has expired; expecting a refresh"
                    );
                }
            }
            TokenStatus::ExpiringSoon { expires_in } => {
                if let Some(suppressed) = self.expiry_logs.should_emit(EXPIRING_LOG_KEY) {
                    info!(expires_in, suppressed, "Access token expires soon");
                }
            }
            TokenStatus::Valid { expires_in } => {
                debug!(expires_in, "Access token valid");
            }
        }
    }

    fn session_epoch(&self) -> u64 {
        self.lock_state().session_epoch
    }

    /// Invalidates any refresh in flight; its tokens belong to the old session.
    fn bump_session_epoch(&self) {
        self.lock_state().session_epoch += 1;
    }

    async fn clear_store(&self) {
        self.bump_session_epoch();
        if let Err(e) = self.store.clear_session().await {
            error!("Failed to clear session from token store: {}", e);
        }
    }

    async fn end_session(&self) {
        self.clear_store().await;
        self.navigator.redirect_to_login();
    }

    async fn reset_after_ceiling(&self) {
        warn!(
            attempts = self.refresh_attempts(),
            ceiling = self.config.refresh_attempt_ceiling,
            "Refresh attempt ceiling reached; resetting application"
        );
        self.clear_store().await;
        self.navigator.reload_to_root();
    }

    /// Signs in and stores the issued tokens and user record.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>, ClientError> {
        let request = OutboundRequest::post(&self.config.login_path)
            .with_json(&LoginRequest { username, password })?;
        let response = self.send(request).await?;

        let body: LoginResponse = response.json()?;
        let tokens = token_pair(body.access_token, body.refresh_token)
            .map_err(|e| ClientError::Decode(format!("login response: {}", e)))?;
        self.store.store_tokens(&tokens).await?;

        let user = match body.user {
            Some(raw) => {
                self.store.set(StoreKey::User, &raw.to_string()).await?;
                serde_json::from_value::<User>(raw)
                    .map_err(|e| warn!("Login response carries an unexpected user record: {}", e))
                    .ok()
            }
            None => {
                self.store.remove(StoreKey::User).await?;
                None
            }
        };

        // A new session starts with a fresh refresh budget.
        self.lock_state().refresh_attempts = 0;
        info!("Signed in as '{}'", username);
        Ok(user)
    }

    /// Drops the local session and sends the user back to login.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.bump_session_epoch();
        self.store.clear_session().await?;
        info!("Signed out");
        self.navigator.redirect_to_login();
        Ok(())
    }

    /// The user record saved at login, if any.
    pub async fn current_user(&self) -> Result<Option<User>, ClientError> {
        match self.store.get(StoreKey::User).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ClientError::Decode(format!("stored user record: {}", e))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pair_requires_both_tokens() {
        assert_eq!(
            token_pair(Some("a".into()), Some("r".into())),
            Ok(TokenPair::new("a", "r"))
        );
        assert_eq!(
            token_pair(Some("a".into()), None),
            Err("missing refresh_token".to_string())
        );
        assert_eq!(
            token_pair(Some("a".into()), Some(String::new())),
            Err("missing refresh_token".to_string())
        );
        assert_eq!(
            token_pair(None, Some("r".into())),
            Err("missing access_token".to_string())
        );
    }

    #[test]
    fn test_dropped_guard_releases_waiters() {
        let state = Mutex::new(RefreshState {
            is_refreshing: true,
            refresh_attempts: 1,
            ..RefreshState::default()
        });
        let (_, mut receiver) = state.lock().unwrap().queue.push(uuid::Uuid::new_v4());

        drop(RefreshGuard::new(&state));

        let state = state.lock().unwrap();
        assert!(!state.is_refreshing);
        assert_eq!(state.refresh_attempts, 1);
        assert!(state.queue.is_empty());
        assert_eq!(receiver.try_recv().unwrap(), Err(RefreshError::Abandoned));
    }

    #[test]
    fn test_settled_guard_resets_attempts_on_success_only() {
        let state = Mutex::new(RefreshState {
            is_refreshing: true,
            refresh_attempts: 2,
            ..RefreshState::default()
        });
        RefreshGuard::new(&state).settle(&Err(RefreshError::MissingRefreshToken));
        assert_eq!(state.lock().unwrap().refresh_attempts, 2);

        state.lock().unwrap().is_refreshing = true;
        RefreshGuard::new(&state).settle(&Ok("t".to_string()));
        let state = state.lock().unwrap();
        assert_eq!(state.refresh_attempts, 0);
        assert!(!state.is_refreshing);
    }
}
