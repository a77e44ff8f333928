//! HTTP seam between the session and the backend.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request timeout for the production transport.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend auth endpoints, rooted at the configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoints {
    base: String,
}

impl BackendEndpoints {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn token(&self) -> String {
        format!("{}/auth/token", self.base)
    }

    pub fn session(&self) -> String {
        format!("{}/auth/session", self.base)
    }

    pub fn refresh(&self) -> String {
        format!("{}/auth/refresh", self.base)
    }

    pub fn logout(&self) -> String {
        format!("{}/auth/logout", self.base)
    }

    /// Resolve an application path (`/api/accounts`) against the base.
    /// Absolute URLs are returned unchanged.
    pub fn resolve(&self, path: &str) -> String {
        if Url::parse(path).is_ok() {
            return path.to_string();
        }
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }
}

/// Request body variants the backend accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Empty,
    Json(serde_json::Value),
    /// `multipart/form-data` text fields.
    Multipart(Vec<(String, String)>),
    Bytes {
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

/// A transport-agnostic HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: HttpBody,
    /// Send and accept cookies for the backend origin.
    pub with_credentials: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: HttpBody::Empty,
            with_credentials: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = HttpBody::Json(value);
        self
    }

    pub fn multipart(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = HttpBody::Multipart(fields);
        self
    }

    pub fn body(mut self, body: HttpBody) -> Self {
        self.body = body;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_credentials(mut self) -> Self {
        self.with_credentials = true;
        self
    }

    /// Replace any existing `Authorization` header with a bearer token.
    pub fn bearer(self, token: &str) -> AuthResult<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        value.set_sensitive(true);
        Ok(self.header(AUTHORIZATION, value))
    }

    /// Value of a multipart text field, if present.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            HttpBody::Multipart(fields) => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests to the backend.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request. Non-2xx statuses are responses, not errors.
    async fn send(&self, request: HttpRequest) -> AuthResult<HttpResponse>;
}

/// `reqwest`-backed transport.
///
/// Credentialed requests go through a client with a cookie store, so the
/// backend's http-only session cookies are kept for the life of the process.
pub struct ReqwestTransport {
    client: Client,
    credentialed: Client,
}

impl ReqwestTransport {
    pub fn new() -> AuthResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            credentialed: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .cookie_store(true)
                .build()?,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let client = if request.with_credentials {
            &self.credentialed
        } else {
            &self.client
        };

        debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = client
            .request(request.method, &request.url)
            .headers(request.headers);

        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Json(value) => builder.json(&value),
            HttpBody::Multipart(fields) => {
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                        form.text(key, value)
                    });
                builder.multipart(form)
            }
            HttpBody::Bytes { content_type, data } => {
                let builder = match content_type {
                    Some(content_type) => builder.header(CONTENT_TYPE, content_type),
                    None => builder,
                };
                builder.body(data)
            }
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout
            } else {
                AuthError::Http(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        debug!(status = %status, bytes = body.len(), "Received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
