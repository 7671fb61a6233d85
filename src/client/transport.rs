use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::request::{ApiResponse, OutboundRequest};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Puts a request on the wire. Any HTTP answer, whatever its status, is `Ok`;
/// only failures to get an answer (connect, timeout, body read) are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, ClientError>;
}

/// The production transport, backed by a shared reqwest client.
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestTransport {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(
            &config.base_url,
            Duration::from_millis(config.timeout_in_ms),
        )
    }

    /// Paths are appended verbatim so a base URL like `https://host/api` keeps its prefix.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn network_error(path: &str, error: reqwest::Error) -> ClientError {
    let message = if error.is_timeout() {
        format!("timed out: {}", error)
    } else {
        error.to_string()
    };
    ClientError::Network {
        path: path.to_string(),
        message,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<ApiResponse, ClientError> {
        let url = self.url_for(request.path());
        let mut builder = self.http.request(request.method().clone(), &url);

        if !request.query().is_empty() {
            builder = builder.query(request.query());
        }
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = request.bearer() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| network_error(request.path(), e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(request.path(), e))?;
        debug!(
            request_id = %request.id(),
            status = status.as_u16(),
            "Received response from {}",
            url
        );

        Ok(ApiResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_sends_query_headers_bearer_and_body() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/enrollments")
            .match_query(Matcher::UrlEncoded("course".into(), "B737".into()))
            .match_header("authorization", "Bearer abc")
            .match_header("x-trace", "1")
            .match_body(Matcher::Json(json!({"trainee": 7})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 99}"#)
            .create_async()
            .await;

        let transport =
            ReqwestTransport::new(&format!("{}/api/", server.url()), Duration::from_secs(5))
                .unwrap();
        let mut request = OutboundRequest::post("/enrollments")
            .with_query("course", "B737")
            .with_header("x-trace", "1")
            .with_json_value(json!({"trainee": 7}));
        request.set_bearer(Some("abc".to_string()));

        let response = transport.execute(&request).await.expect("server answered");
        m.assert_async().await;
        assert_eq!(response.status, reqwest::StatusCode::CREATED);
        assert_eq!(response.json::<serde_json::Value>().unwrap()["id"], 99);
    }

    #[tokio::test]
    async fn test_error_status_is_still_a_response() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/reports")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        let response = transport
            .execute(&OutboundRequest::get("/reports"))
            .await
            .expect("a 401 is an answer");
        m.assert_async().await;
        assert_eq!(response.status, reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Port 9 (discard) is essentially never listening.
        let transport =
            ReqwestTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = transport
            .execute(&OutboundRequest::get("/courses"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_silent_backend_times_out_as_network_error() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport =
            ReqwestTransport::new(&format!("http://{}", address), Duration::from_millis(200))
                .unwrap();
        let err = transport
            .execute(&OutboundRequest::post("/auth/refresh"))
            .await
            .unwrap_err();
        silent.abort();

        match err {
            ClientError::Network { path, message } => {
                assert_eq!(path, "/auth/refresh");
                assert!(message.starts_with("timed out"), "{}", message);
            }
            other => panic!("expected a network error, got {:?}", other),
        }
    }
}
