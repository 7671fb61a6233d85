#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atms_client::client::{ApiResponse, AuthClient, OutboundRequest, ReqwestTransport, Transport};
use atms_client::config::{ClientConfig, NavigationConfig};
use atms_client::error::ClientError;
use atms_client::models::TokenPair;
use atms_client::navigation::SessionNavigator;
use atms_client::store::{MemoryStore, StoreKey, TokenStore};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    sub: &'a str,
    exp: i64,
}

/// A signed JWT for `sub` that expires `exp_offset` seconds from now.
pub fn mint_token(sub: &str, exp_offset: i64) -> String {
    token_expiring_at(sub, Utc::now().timestamp() + exp_offset)
}

/// A signed JWT for `sub` with exactly `exp` as its expiry claim.
pub fn token_expiring_at(sub: &str, exp: i64) -> String {
    let claims = Claims { sub, exp };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"atms-test-secret"),
    )
    .expect("Failed to create token")
}

pub fn navigator() -> Arc<SessionNavigator> {
    Arc::new(SessionNavigator::new(&NavigationConfig::default()))
}

/// A memory store already holding `access` and `refresh` (when given).
pub async fn store_with(access: Option<&str>, refresh: Option<&str>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    if let Some(access) = access {
        store.set(StoreKey::AccessToken, access).await.unwrap();
    }
    if let Some(refresh) = refresh {
        store.set(StoreKey::RefreshToken, refresh).await.unwrap();
    }
    store
        .set(StoreKey::User, r#"{"id": 1, "username": "trainer.one", "role": "TRAINER"}"#)
        .await
        .unwrap();
    store
}

pub async fn assert_store_empty(store: &MemoryStore) {
    for key in StoreKey::ALL {
        assert_eq!(store.get(key).await.unwrap(), None, "'{}' was not cleared", key);
    }
}

/// A client talking to a real HTTP server (mockito) with default settings.
pub fn http_client(
    base_url: &str,
    store: Arc<MemoryStore>,
    navigator: Arc<SessionNavigator>,
) -> AuthClient {
    let config = ClientConfig::new(base_url);
    let transport = Arc::new(ReqwestTransport::from_config(&config).expect("transport builds"));
    AuthClient::new(transport, store, navigator, config)
}

/// How the scripted backend answers `/auth/refresh`.
#[derive(Debug, Clone)]
pub enum RefreshReply {
    Issue(TokenPair),
    Fail(StatusCode),
    Body(Value),
    /// The refresh never gets an HTTP answer (connection reset, timeout).
    Unreachable,
}

/// An in-process backend. Resource paths succeed only with the currently valid
/// access token; refresh calls can be held until the test releases them.
pub struct ScriptedBackend {
    valid_access: Mutex<String>,
    reply: RefreshReply,
    hold_refresh: bool,
    gate: Notify,
    refresh_calls: AtomicUsize,
    log: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedBackend {
    pub fn new(valid_access: &str, reply: RefreshReply, hold_refresh: bool) -> Arc<Self> {
        Arc::new(ScriptedBackend {
            valid_access: Mutex::new(valid_access.to_string()),
            reply,
            hold_refresh,
            gate: Notify::new(),
            refresh_calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn release_refresh(&self) {
        self.gate.notify_one();
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every request seen, as (path, bearer), in arrival order.
    pub fn log(&self) -> Vec<(String, Option<String>)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedBackend {
    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, ClientError> {
        self.log.lock().unwrap().push((
            request.path().to_string(),
            request.bearer().map(str::to_string),
        ));

        if request.path() == "/auth/refresh" {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.hold_refresh {
                self.gate.notified().await;
            }
            return Ok(match &self.reply {
                RefreshReply::Issue(pair) => {
                    *self.valid_access.lock().unwrap() = pair.access_token.clone();
                    ApiResponse::new(
                        StatusCode::OK,
                        json!({
                            "access_token": pair.access_token,
                            "refresh_token": pair.refresh_token,
                        })
                        .to_string(),
                    )
                }
                RefreshReply::Fail(status) => ApiResponse::new(*status, "refresh exploded"),
                RefreshReply::Body(body) => ApiResponse::new(StatusCode::OK, body.to_string()),
                RefreshReply::Unreachable => {
                    return Err(ClientError::Network {
                        path: request.path().to_string(),
                        message: "timed out: operation timed out".to_string(),
                    })
                }
            });
        }

        let valid = self.valid_access.lock().unwrap().clone();
        if request.bearer() == Some(valid.as_str()) {
            Ok(ApiResponse::new(
                StatusCode::OK,
                json!({ "path": request.path() }).to_string(),
            ))
        } else {
            Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, "token expired"))
        }
    }
}

pub fn scripted_client(
    backend: Arc<ScriptedBackend>,
    store: Arc<MemoryStore>,
    navigator: Arc<SessionNavigator>,
) -> AuthClient {
    AuthClient::new(
        backend,
        store,
        navigator,
        ClientConfig::new("http://scripted.invalid"),
    )
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
