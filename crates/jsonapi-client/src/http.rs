//! Transport boundary: the session performs all network I/O through the
//! [`HttpTransport`] / [`AsyncHttpTransport`] traits, so alternative HTTP
//! stacks (or test doubles) can be injected without touching any of the
//! document/cache logic.

use serde_json::Value;

/// The JSON:API media type, sent as `Content-Type` on every write request.
pub const MEDIA_TYPE: &str = "application/vnd.api+json";

/// HTTP methods used by the JSON:API protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Fetch a document or resource.
    Get,
    /// Create a resource.
    Post,
    /// Update a resource with a partial payload.
    Patch,
    /// Delete a resource.
    Delete,
}

impl HttpMethod {
    /// Uppercase method name for logging and transports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Response surface the session needs from a transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, when the response carried one.
    pub body: Option<Value>,
    /// Value of the `Location` header, when present.
    pub location: Option<String>,
}

/// Transport failures are opaque to the session and surfaced as
/// [`Error::Transport`](crate::Error::Transport).
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Blocking HTTP transport.
///
/// Implement this to plug a custom HTTP stack into a synchronous
/// [`Session`](crate::Session):
///
/// ```rust
/// use jsonapi_client::{HttpMethod, HttpResponse, HttpTransport, TransportError};
/// use serde_json::{json, Value};
///
/// struct Canned;
///
/// impl HttpTransport for Canned {
///     fn request(
///         &self,
///         method: HttpMethod,
///         url: &str,
///         body: Option<&Value>,
///     ) -> Result<HttpResponse, TransportError> {
///         Ok(HttpResponse {
///             status: 200,
///             body: Some(json!({"data": []})),
///             location: None,
///         })
///     }
/// }
/// ```
pub trait HttpTransport: Send + Sync {
    /// Execute a single HTTP request and return the decoded response.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport-level failures (connection,
    /// protocol, body decoding). Non-2xx statuses are NOT errors at this
    /// layer; the session maps them to document errors.
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Non-blocking HTTP transport for asynchronous sessions.
#[async_trait::async_trait]
pub trait AsyncHttpTransport: Send + Sync {
    /// Execute a single HTTP request and return the decoded response.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::request`].
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError>;
}

/// `true` for any 2xx status.
pub(crate) fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Statuses whose body is the authoritative new resource state.
pub(crate) fn has_resource(status: u16) -> bool {
    status == 200 || status == 201
}

/// Accepted for asynchronous processing; no usable body yet.
pub(crate) const ACCEPTED: u16 = 202;

/// Best-effort extraction of a human-readable message from an error document.
///
/// Only the first error's `title` is surfaced; anything unparseable yields
/// `"?"`.
pub(crate) fn error_title(body: Option<&Value>) -> String {
    body.and_then(|body| body.get("errors"))
        .and_then(|errors| errors.get(0))
        .and_then(|error| error.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_owned()
}

#[cfg(feature = "client")]
mod reqwest_client {
    use serde_json::Value;

    use super::{AsyncHttpTransport, HttpMethod, HttpResponse, HttpTransport, TransportError, MEDIA_TYPE};

    impl From<HttpMethod> for reqwest::Method {
        fn from(method: HttpMethod) -> reqwest::Method {
            match method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            }
        }
    }

    /// Default blocking transport backed by [`reqwest::blocking`].
    #[derive(Debug, Default)]
    pub struct Client {
        inner: reqwest::blocking::Client,
    }

    impl Client {
        /// Create a transport with reqwest's default configuration.
        #[must_use]
        pub fn new() -> Client {
            Client::default()
        }

        /// Wrap a pre-configured blocking client (proxies, auth, timeouts).
        #[must_use]
        pub fn from_client(inner: reqwest::blocking::Client) -> Client {
            Client { inner }
        }
    }

    impl HttpTransport for Client {
        fn request(
            &self,
            method: HttpMethod,
            url: &str,
            body: Option<&Value>,
        ) -> Result<HttpResponse, TransportError> {
            let mut request = self.inner.request(method.into(), url);
            if let Some(body) = body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, MEDIA_TYPE)
                    .json(body);
            }
            let response = request.send()?;
            let status = response.status().as_u16();
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let text = response.text()?;
            let body = if text.is_empty() {
                None
            } else {
                serde_json::from_str(&text).ok()
            };
            Ok(HttpResponse {
                status,
                body,
                location,
            })
        }
    }

    /// Default non-blocking transport backed by [`reqwest::Client`].
    #[derive(Debug, Default)]
    pub struct AsyncClient {
        inner: reqwest::Client,
    }

    impl AsyncClient {
        /// Create a transport with reqwest's default configuration.
        #[must_use]
        pub fn new() -> AsyncClient {
            AsyncClient::default()
        }

        /// Wrap a pre-configured client (proxies, auth, timeouts).
        #[must_use]
        pub fn from_client(inner: reqwest::Client) -> AsyncClient {
            AsyncClient { inner }
        }
    }

    #[async_trait::async_trait]
    impl AsyncHttpTransport for AsyncClient {
        async fn request(
            &self,
            method: HttpMethod,
            url: &str,
            body: Option<&Value>,
        ) -> Result<HttpResponse, TransportError> {
            let mut request = self.inner.request(method.into(), url);
            if let Some(body) = body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, MEDIA_TYPE)
                    .json(body);
            }
            let response = request.send().await?;
            let status = response.status().as_u16();
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let text = response.text().await?;
            let body = if text.is_empty() {
                None
            } else {
                serde_json::from_str(&text).ok()
            };
            Ok(HttpResponse {
                status,
                body,
                location,
            })
        }
    }
}

#[cfg(feature = "client")]
pub use reqwest_client::{AsyncClient, Client};
