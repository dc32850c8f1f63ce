//! Relay transport: the HTTP contract with the AIRC relay/registry.
//!
//! [`RelayTransport`] is the seam between the client core and the network;
//! [`HttpRelay`] is the production implementation over `reqwest`. Every
//! call carries a timeout, and HTTP statuses are folded into [`AircError`]
//! so callers can tell fatal, transient, and protocol failures apart.

use crate::keystore::Identity;
use airc_types::config::ClientConfig;
use airc_types::serde_compat::encode_b64;
use airc_types::{AircError, AircResult};
use airc_wire::message::{
    ErrorBody, HeartbeatRequest, HeartbeatResponse, IdentityResponse, PollRequest, PollResponse,
    RegisterRequest, RegisterResponse, SendRequest, SendResponse, PROTOCOL_VERSION,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Header naming the signing agent when request signing is on.
pub const IDENTITY_HEADER: &str = "X-AIRC-Identity";
/// Header carrying the base64 signature over the request body.
pub const SIGNATURE_HEADER: &str = "X-AIRC-Signature";
/// Header advertising the client's protocol version.
pub const VERSION_HEADER: &str = "X-AIRC-Version";

/// Relay operations used by the client.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// `POST /register`.
    async fn register(&self, request: RegisterRequest) -> AircResult<RegisterResponse>;

    /// `POST /heartbeat`.
    async fn heartbeat(&self, request: HeartbeatRequest) -> AircResult<HeartbeatResponse>;

    /// `POST /send`.
    async fn send(&self, request: SendRequest) -> AircResult<SendResponse>;

    /// `GET /poll`.
    async fn poll(&self, request: PollRequest) -> AircResult<PollResponse>;

    /// `GET /identity/{agent_name}`; `None` when the relay does not know the name.
    async fn lookup_identity(&self, agent_name: &str) -> AircResult<Option<IdentityResponse>>;
}

/// Which relay endpoint produced a status; 401/403 mean different things.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Register,
    Heartbeat,
    Send,
    Poll,
    Identity,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Register => "register",
            Endpoint::Heartbeat => "heartbeat",
            Endpoint::Send => "send",
            Endpoint::Poll => "poll",
            Endpoint::Identity => "identity",
        }
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn map_status(endpoint: Endpoint, status: u16, message: String) -> AircError {
    match (endpoint, status) {
        (_, 409) => AircError::NameConflict(message),
        (Endpoint::Register, 401 | 403) => AircError::InvalidKeyProof(message),
        (_, 401) => AircError::SessionExpired,
        (_, 408 | 429) | (_, 500..=599) => {
            AircError::RelayUnreachable(format!("{} returned {status}: {message}", endpoint.path()))
        }
        _ => AircError::Relay { status, message },
    }
}

fn map_transport(endpoint: Endpoint, err: reqwest::Error) -> AircError {
    if err.is_timeout() {
        AircError::Timeout(format!("{}: {err}", endpoint.path()))
    } else if err.is_decode() {
        AircError::Serialization(format!("{} response: {err}", endpoint.path()))
    } else {
        AircError::RelayUnreachable(format!("{}: {err}", endpoint.path()))
    }
}

/// HTTP relay client.
pub struct HttpRelay {
    base_url: String,
    client: reqwest::Client,
    signer: Option<Arc<Identity>>,
}

impl HttpRelay {
    /// Relay at `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> AircResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("airc-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AircError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            signer: None,
        })
    }

    /// Relay configured from `config`; `identity` signs requests when
    /// `sign_requests` is set.
    pub fn from_config(config: &ClientConfig, identity: Arc<Identity>) -> AircResult<Self> {
        let relay = Self::new(
            &config.registry_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(if config.sign_requests {
            relay.with_request_signing(identity)
        } else {
            relay
        })
    }

    /// Sign every POST body with `identity`.
    pub fn with_request_signing(mut self, identity: Arc<Identity>) -> Self {
        self.signer = Some(identity);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post<B, R>(&self, endpoint: Endpoint, body: &B) -> AircResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(body)?;
        let mut request = self
            .client
            .post(self.url(endpoint.path()))
            .header(VERSION_HEADER, PROTOCOL_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(identity) = &self.signer {
            let (name, signature) = sign_body(identity, &bytes);
            request = request
                .header(IDENTITY_HEADER, name)
                .header(SIGNATURE_HEADER, signature);
        }
        debug!(endpoint = endpoint.path(), bytes = bytes.len(), "Relay POST");
        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|e| map_transport(endpoint, e))?;
        read_json(endpoint, response).await
    }
}

/// Request-signing header values for `body`.
pub fn sign_body(identity: &Identity, body: &[u8]) -> (String, String) {
    (
        identity.agent_name().to_string(),
        encode_b64(&identity.sign(body).to_bytes()),
    )
}

async fn read_json<R: DeserializeOwned>(
    endpoint: Endpoint,
    response: reqwest::Response,
) -> AircResult<R> {
    let status = response.status().as_u16();
    if !response.status().is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(text);
        return Err(map_status(endpoint, status, message));
    }
    response.json().await.map_err(|e| map_transport(endpoint, e))
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn register(&self, request: RegisterRequest) -> AircResult<RegisterResponse> {
        self.post(Endpoint::Register, &request).await
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> AircResult<HeartbeatResponse> {
        self.post(Endpoint::Heartbeat, &request).await
    }

    async fn send(&self, request: SendRequest) -> AircResult<SendResponse> {
        self.post(Endpoint::Send, &request).await
    }

    async fn poll(&self, request: PollRequest) -> AircResult<PollResponse> {
        let response = self
            .client
            .get(self.url(Endpoint::Poll.path()))
            .header(VERSION_HEADER, PROTOCOL_VERSION)
            .query(&request)
            .send()
            .await
            .map_err(|e| map_transport(Endpoint::Poll, e))?;
        read_json(Endpoint::Poll, response).await
    }

    async fn lookup_identity(&self, agent_name: &str) -> AircResult<Option<IdentityResponse>> {
        let response = self
            .client
            .get(self.url(&format!("identity/{agent_name}")))
            .header(VERSION_HEADER, PROTOCOL_VERSION)
            .send()
            .await
            .map_err(|e| map_transport(Endpoint::Identity, e))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        read_json(Endpoint::Identity, response).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airc_types::serde_compat::decode_b64;
    use airc_types::signing::verify_detached;

    #[test]
    fn test_conflict_maps_to_name_conflict() {
        let err = map_status(Endpoint::Register, 409, "scout".into());
        assert!(matches!(err, AircError::NameConflict(_)));
    }

    #[test]
    fn test_register_auth_failure_is_fatal() {
        for status in [401, 403] {
            let err = map_status(Endpoint::Register, status, "bad proof".into());
            assert!(matches!(err, AircError::InvalidKeyProof(_)));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn test_unauthorized_elsewhere_is_session_expiry() {
        for endpoint in [Endpoint::Heartbeat, Endpoint::Send, Endpoint::Poll] {
            assert!(matches!(
                map_status(endpoint, 401, String::new()),
                AircError::SessionExpired
            ));
        }
    }

    #[test]
    fn test_transient_statuses_retryable() {
        for status in [408, 429, 500, 502, 503] {
            let err = map_status(Endpoint::Poll, status, "busy".into());
            assert!(matches!(err, AircError::RelayUnreachable(_)), "{status}");
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_other_status_is_relay_error() {
        match map_status(Endpoint::Send, 400, "bad envelope".into()) {
            AircError::Relay { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad envelope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_url_join() {
        let relay = HttpRelay::new("https://relay.example/", Duration::from_secs(5)).unwrap();
        assert_eq!(relay.base_url(), "https://relay.example");
        assert_eq!(relay.url("/poll"), "https://relay.example/poll");
        assert_eq!(relay.url("identity/bob"), "https://relay.example/identity/bob");
    }

    #[test]
    fn test_signed_body_verifies() {
        let identity = Identity::ephemeral("scout");
        let body = br#"{"session_token":"t"}"#;
        let (name, sig) = sign_body(&identity, body);
        assert_eq!(name, "scout");
        let sig = decode_b64(&sig).unwrap();
        assert!(verify_detached(&identity.public_key(), body, &sig).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transient() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let relay = HttpRelay::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = relay
            .heartbeat(HeartbeatRequest {
                session_token: "t".into(),
                status: "available".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
