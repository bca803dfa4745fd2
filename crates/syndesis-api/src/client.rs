// Async REST client for the Syndesis API.
//
// Endpoints are resolved through the shared `EndpointRegistry`; mutating
// requests echo the anti-forgery cookie back as a header.

use std::sync::Arc;

use reqwest::Method;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::endpoints::{Endpoint, EndpointRegistry};
use crate::error::Error;
use crate::transport::TransportConfig;

pub const DEFAULT_XSRF_COOKIE: &str = "SYNDESIS-XSRF-COOKIE";
pub const DEFAULT_XSRF_HEADER: &str = "SYNDESIS-XSRF-TOKEN";

// ── Error response shape ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    #[serde(default)]
    user_msg: Option<String>,
    #[serde(default)]
    developer_msg: Option<String>,
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// List responses come either as a bare array or wrapped in an
/// `{items, totalCount}` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Bare(Vec<T>),
    Envelope {
        #[serde(default = "Vec::new")]
        items: Vec<T>,
        #[serde(default, rename = "totalCount")]
        total_count: Option<u64>,
    },
}

impl<T> ListResponse<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Self::Bare(items) => items,
            Self::Envelope { items, total_count } => {
                if let Some(total) = total_count {
                    if total > u64::try_from(items.len()).unwrap_or(u64::MAX) {
                        debug!(total, returned = items.len(), "list response is truncated");
                    }
                }
                items
            }
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Anti-forgery token settings.
#[derive(Debug, Clone)]
pub struct XsrfConfig {
    /// Cookie the server sets with the current token.
    pub cookie_name: String,
    /// Header the token is echoed in.
    pub header_name: String,
    /// Token sent when the server has not set the cookie yet.
    pub fallback_token: Option<SecretString>,
}

impl Default for XsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_XSRF_COOKIE.to_owned(),
            header_name: DEFAULT_XSRF_HEADER.to_owned(),
            fallback_token: None,
        }
    }
}

/// Endpoint keys for one REST resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEndpoints {
    /// Collection key, e.g. `"connections"`.
    pub collection: String,
    /// Item key with an `{id}` placeholder, e.g. `"connection"`.
    pub item: String,
}

impl ResourceEndpoints {
    pub fn new(collection: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            item: item.into(),
        }
    }

    pub fn item_endpoint(&self, id: &str) -> Endpoint {
        Endpoint::new(self.item.clone()).param("id", id)
    }

    pub fn collection_endpoint(&self) -> Endpoint {
        Endpoint::new(self.collection.clone())
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the Syndesis REST API.
///
/// Cheap to clone: the HTTP client, cookie jar and registry are shared.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    registry: EndpointRegistry,
    jar: Arc<Jar>,
    xsrf: Arc<XsrfConfig>,
    token: Option<SecretString>,
    transport: TransportConfig,
    default_headers: HeaderMap,
    timeout_secs: u64,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("endpoints", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build a client for `base_url` (e.g. `https://host/api/v1`).
    ///
    /// A bearer token, when given, is injected as a sensitive default
    /// header on every request.
    pub fn new(
        base_url: &str,
        token: Option<&SecretString>,
        transport: &TransportConfig,
        registry: EndpointRegistry,
        xsrf: XsrfConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| Error::InvalidToken(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let jar = transport
            .cookie_jar
            .clone()
            .unwrap_or_else(|| Arc::new(Jar::default()));
        let transport = TransportConfig {
            cookie_jar: Some(Arc::clone(&jar)),
            ..transport.clone()
        };
        let http = transport.build_client_with_headers(headers.clone())?;
        let base_url = Self::normalize_base_url(base_url)?;

        Ok(Self {
            http,
            base_url,
            registry,
            jar,
            xsrf: Arc::new(xsrf),
            token: token.cloned(),
            timeout_secs: transport.timeout.as_secs(),
            transport,
            default_headers: headers,
        })
    }

    /// Strip any trailing slash so resolved paths can be appended verbatim.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&path);
        Ok(url)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Client sharing this client's cookies and credentials, without a
    /// total request timeout.
    pub(crate) fn streaming_client(&self) -> Result<reqwest::Client, Error> {
        self.transport
            .build_streaming_client(self.default_headers.clone())
    }

    /// Headers for a WebSocket upgrade to `url` (an `http(s)` URL): the
    /// bearer token and any cookies held for that origin.
    pub(crate) fn upgrade_headers(&self, url: &Url) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("Bearer {}", token.expose_secret())));
        }
        if let Some(cookies) = self.jar.cookies(url).and_then(|h| h.to_str().ok().map(str::to_owned)) {
            headers.push(("Cookie", cookies));
        }
        headers
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Resolve an endpoint to a full URL.
    ///
    /// Paths starting with `http` are absolute; everything else is
    /// appended to the base URL.
    pub fn endpoint_url(&self, endpoint: &Endpoint) -> Result<Url, Error> {
        let path = self.registry.resolve(endpoint)?;
        if path.starts_with("http") {
            return Ok(Url::parse(&path)?);
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Ok(Url::parse(&joined)?)
    }

    // ── Anti-forgery ─────────────────────────────────────────────────

    /// Current anti-forgery token: the cookie value when set, otherwise
    /// the configured fallback.
    fn xsrf_token(&self, url: &Url) -> Option<String> {
        let from_cookie = self.jar.cookies(url).and_then(|header| {
            let raw = header.to_str().ok()?.to_owned();
            raw.split(';').find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == self.xsrf.cookie_name).then(|| value.to_owned())
            })
        });
        from_cookie.or_else(|| {
            self.xsrf
                .fallback_token
                .as_ref()
                .map(|t| t.expose_secret().to_owned())
        })
    }

    fn needs_xsrf(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    // ── Generic request ──────────────────────────────────────────────

    fn builder(&self, method: &Method, url: Url) -> reqwest::RequestBuilder {
        let attach_xsrf = Self::needs_xsrf(method);
        let token = if attach_xsrf { self.xsrf_token(&url) } else { None };
        let mut req = self.http.request(method.clone(), url);
        if let Some(token) = token {
            trace!(header = %self.xsrf.header_name, "attaching anti-forgery token");
            req = req.header(self.xsrf.header_name.as_str(), token);
        }
        req
    }

    /// Issue a request and decode the JSON response.
    pub async fn request<T, B>(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&B>,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let resp = self.send(method, endpoint, body).await?;
        self.handle_response(resp).await
    }

    /// Issue a request whose response body is ignored.
    pub async fn request_empty<B>(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&B>,
    ) -> Result<(), Error>
    where
        B: Serialize + Sync + ?Sized,
    {
        let resp = self.send(method, endpoint, body).await?;
        self.handle_empty(resp).await
    }

    async fn send<B>(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&B>,
    ) -> Result<reqwest::Response, Error>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.endpoint_url(endpoint)?;
        debug!("{method} {url}");
        let mut req = self.builder(&method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| self.map_transport(e))
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            return Error::Timeout {
                timeout_secs: self.timeout_secs,
            };
        }
        Error::Transport(err)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<T, Error> {
        self.request::<T, ()>(Method::GET, endpoint, None).await
    }

    pub async fn post<T, B>(&self, endpoint: &Endpoint, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put<T, B>(&self, endpoint: &Endpoint, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.request(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn patch<T, B>(&self, endpoint: &Endpoint, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.request(Method::PATCH, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &Endpoint) -> Result<(), Error> {
        self.request_empty::<()>(Method::DELETE, endpoint, None).await
    }

    // ── Resource helpers ─────────────────────────────────────────────

    /// Fetch a whole collection; accepts both list response shapes.
    pub async fn list<T: DeserializeOwned>(
        &self,
        resource: &ResourceEndpoints,
    ) -> Result<Vec<T>, Error> {
        let resp: ListResponse<T> = self.get(&resource.collection_endpoint()).await?;
        Ok(resp.into_items())
    }

    pub async fn get_item<T: DeserializeOwned>(
        &self,
        resource: &ResourceEndpoints,
        id: &str,
    ) -> Result<T, Error> {
        self.get(&resource.item_endpoint(id)).await
    }

    pub async fn create<T, B>(&self, resource: &ResourceEndpoints, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.post(&resource.collection_endpoint(), body).await
    }

    /// Replace an item. Servers that answer `204 No Content` are handled
    /// by re-reading the item.
    pub async fn update<T, B>(
        &self,
        resource: &ResourceEndpoints,
        id: &str,
        body: &B,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let endpoint = resource.item_endpoint(id);
        let resp = self.send(Method::PUT, &endpoint, Some(body)).await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return self.get(&endpoint).await;
        }
        self.handle_response(resp).await
    }

    pub async fn delete_item(&self, resource: &ResourceEndpoints, id: &str) -> Result<(), Error> {
        self.delete(&resource.item_endpoint(id)).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn handle_empty(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    #[allow(clippy::unused_self)]
    async fn parse_error(&self, status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        let path = resp.url().path().to_owned();
        let raw = resp.text().await.unwrap_or_default();
        error_from_status(status.as_u16(), &path, &raw)
    }
}

/// Map a non-success status and body into the error taxonomy.
pub(crate) fn error_from_status(status: u16, path: &str, raw: &str) -> Error {
    let parsed = serde_json::from_str::<ErrorResponse>(raw).ok();
    let (message, debug_message, code) = match parsed {
        Some(body) => (
            body.user_msg.or(body.message),
            body.developer_msg,
            body.error_code.map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        ),
        None => (None, None, None),
    };
    let message = message.unwrap_or_else(|| {
        if raw.is_empty() {
            reqwest::StatusCode::from_u16(status)
                .map_or_else(|_| format!("HTTP {status}"), |s| s.to_string())
        } else {
            raw.chars().take(200).collect()
        }
    });

    match status {
        401 | 403 => Error::Unauthenticated { status, message },
        404 => Error::NotFound {
            path: path.to_owned(),
        },
        500..=599 => Error::Server {
            status,
            message,
            debug_message,
        },
        _ => Error::Api {
            status,
            message,
            debug_message,
            code,
        },
    }
}
