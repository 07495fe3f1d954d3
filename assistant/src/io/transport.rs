//! Transport to the remote backend.
//!
//! The connection manager talks to the backend only through [`Transport`], so
//! tests can script failures without a server.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::session::Session;
use crate::error::AssistantError;
use crate::io::context::ConfigContext;
use crate::io::settings::Settings;

pub const CSRF_HEADER: &str = "x-csrf-token";

pub trait Transport: Send + Sync {
    /// Establish (or verify) the connection using the session credentials.
    fn open(&self, session: &Session) -> impl Future<Output = Result<(), AssistantError>> + Send;

    /// Send one JSON request to `path` and return the JSON reply.
    fn send(
        &self,
        session: &Session,
        path: &str,
        body: &Value,
    ) -> impl Future<Output = Result<Value, AssistantError>> + Send;
}

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    base: Url,
    health_path: String,
}

impl HttpTransport {
    pub fn from_settings(settings: &Settings) -> Result<Self, AssistantError> {
        let base = Url::parse(&settings.server_url).map_err(|err| {
            AssistantError::ConfigurationInvalid(format!("serverUrl {}: {err}", settings.server_url))
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout))
            .build()
            .map_err(|err| AssistantError::Internal(err.into()))?;
        Ok(Self {
            http,
            base,
            health_path: settings.health_path.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, AssistantError> {
        self.base
            .join(path)
            .map_err(|err| AssistantError::ConfigurationInvalid(format!("request path {path}: {err}")))
    }
}

impl Transport for HttpTransport {
    #[instrument(skip_all, fields(base = %self.base))]
    async fn open(&self, session: &Session) -> Result<(), AssistantError> {
        let url = self.url(&self.health_path)?;
        let response = self
            .http
            .get(url)
            .headers(session_headers(session)?)
            .send()
            .await
            .map_err(|err| AssistantError::TransportFailure(err.to_string()))?;
        let status = response.status();
        debug!(status = status.as_u16(), "health probe answered");
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn send(&self, session: &Session, path: &str, body: &Value) -> Result<Value, AssistantError> {
        let url = self.url(path)?;
        let response = self
            .http
            .post(url)
            .headers(session_headers(session)?)
            .json(body)
            .send()
            .await
            .map_err(|err| AssistantError::TransportFailure(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let text = response
            .text()
            .await
            .map_err(|err| AssistantError::TransportFailure(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|err| AssistantError::TransportFailure(format!("invalid JSON reply: {err}")))
    }
}

/// Settings that shape an [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    server_url: String,
    health_path: String,
    request_timeout: u64,
}

impl Endpoint {
    fn of(settings: &Settings) -> Self {
        Self {
            server_url: settings.server_url.clone(),
            health_path: settings.health_path.clone(),
            request_timeout: settings.request_timeout,
        }
    }
}

/// [`HttpTransport`] that follows settings reloads.
///
/// Every request reads the current snapshot and rebuilds the client when
/// `serverUrl`, `healthPath` or `requestTimeout` changed.
pub struct ReloadingTransport {
    ctx: Arc<ConfigContext>,
    current: Mutex<(Endpoint, HttpTransport)>,
}

impl ReloadingTransport {
    /// Fails when the settings the context starts with are unusable.
    pub fn new(ctx: Arc<ConfigContext>) -> Result<Self, AssistantError> {
        let snapshot = ctx.snapshot();
        let settings = snapshot.settings()?;
        let current = (Endpoint::of(settings), HttpTransport::from_settings(settings)?);
        Ok(Self {
            ctx,
            current: Mutex::new(current),
        })
    }

    fn transport(&self) -> Result<HttpTransport, AssistantError> {
        let snapshot = self.ctx.snapshot();
        let settings = snapshot.settings()?;
        let endpoint = Endpoint::of(settings);
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.0 != endpoint {
            debug!(server_url = %endpoint.server_url, "endpoint settings changed, rebuilding client");
            *current = (endpoint, HttpTransport::from_settings(settings)?);
        }
        Ok(current.1.clone())
    }
}

impl Transport for ReloadingTransport {
    async fn open(&self, session: &Session) -> Result<(), AssistantError> {
        let transport = self.transport()?;
        transport.open(session).await
    }

    async fn send(&self, session: &Session, path: &str, body: &Value) -> Result<Value, AssistantError> {
        let transport = self.transport()?;
        transport.send(session, path, body).await
    }
}

/// `Cookie` and `X-CSRF-Token` headers for `session`; absent fields add nothing.
pub fn session_headers(session: &Session) -> Result<HeaderMap, AssistantError> {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = session.cookie_header() {
        headers.insert(COOKIE, header_value("Cookie", &cookie)?);
    }
    if let Some(token) = &session.csrf_token {
        headers.insert(
            HeaderName::from_static(CSRF_HEADER),
            header_value("X-CSRF-Token", token)?,
        );
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, AssistantError> {
    HeaderValue::from_str(value).map_err(|_| {
        AssistantError::AuthenticationExpired(format!("session {name} is not a valid header value"))
    })
}

/// Map a non-success status to the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> AssistantError {
    let detail = body.trim();
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", truncate(detail, 200))
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AssistantError::AuthenticationExpired(message)
        }
        _ => AssistantError::TransportFailure(message),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn headers_carry_cookies_and_csrf_token() {
        let session = Session {
            cookies: BTreeMap::from([
                ("sid".to_string(), "abc".to_string()),
                ("lang".to_string(), "en".to_string()),
            ]),
            csrf_token: Some("tok".to_string()),
            email: None,
        };
        let headers = session_headers(&session).expect("headers");
        assert_eq!(headers.get(COOKIE).expect("cookie"), "lang=en; sid=abc");
        assert_eq!(headers.get(CSRF_HEADER).expect("csrf"), "tok");
    }

    #[test]
    fn empty_session_adds_no_headers() {
        let headers = session_headers(&Session::default()).expect("headers");
        assert!(headers.is_empty());
    }

    #[test]
    fn rejected_credentials_are_not_transport_failures() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            AssistantError::AuthenticationExpired(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "csrf mismatch"),
            AssistantError::AuthenticationExpired(ref msg) if msg.contains("csrf mismatch")
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            AssistantError::TransportFailure(_)
        ));
    }

    #[test]
    fn request_paths_join_onto_the_server_url() {
        let transport = HttpTransport::from_settings(&Settings {
            server_url: "https://backend.example.com/".to_string(),
            ..Settings::default()
        })
        .expect("transport");
        assert_eq!(
            transport.url("/api/health").expect("url").as_str(),
            "https://backend.example.com/api/health"
        );
    }

    #[test]
    fn reloaded_endpoint_settings_reach_the_next_request() {
        let ctx = Arc::new(ConfigContext::from_settings(Settings {
            server_url: "https://old.example.com/".to_string(),
            ..Settings::default()
        }));
        let transport = ReloadingTransport::new(Arc::clone(&ctx)).expect("transport");
        assert_eq!(
            transport.transport().expect("current").base.as_str(),
            "https://old.example.com/"
        );

        ctx.replace(Settings {
            server_url: "https://new.example.com/".to_string(),
            health_path: "/ping".to_string(),
            ..Settings::default()
        })
        .expect("replace");
        let current = transport.transport().expect("current");
        assert_eq!(current.base.as_str(), "https://new.example.com/");
        assert_eq!(current.health_path, "/ping");
    }
}
