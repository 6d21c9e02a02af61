//! HTTP implementation of the remote API.
//!
//! The actual HTTP client is abstracted via a trait so any library
//! (reqwest, ureq, hyper) can carry the requests.

use mirrorsync_protocol::{Entity, EntityId, ListQuery, Page, RemoteApi, RemoteError, RemoteResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

/// One HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// One HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// The server could not be reached.
    Connect(String),
    /// The request did not complete before its timeout.
    Timeout,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Executes a request and returns the response, whatever its status.
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure>;
}

/// [`RemoteApi`] over REST.
///
/// `base_url` is the entity collection, e.g. `https://host/api/games`;
/// items live at `{base_url}/{id}`.
pub struct HttpRemote<C: HttpClient> {
    base_url: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a remote over a client.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the message of the last failed call.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn item_url(&self, id: &EntityId) -> String {
        format!("{}/{}", self.base_url, percent_encode(id.as_str()))
    }

    fn send(
        &self,
        method: HttpMethod,
        url: String,
        token: &str,
        extra_headers: Vec<(String, String)>,
        body: Option<&Value>,
    ) -> RemoteResult<HttpResponse> {
        let mut headers = vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        headers.extend(extra_headers);

        let request = HttpRequest {
            method,
            url,
            headers,
            body: body.map(|value| value.to_string().into_bytes()),
            timeout: self.timeout,
        };
        debug!(%method, url = %request.url, "remote request");

        let result = self.client.execute(request).map_err(|failure| match failure {
            HttpFailure::Connect(message) => RemoteError::Network(message),
            HttpFailure::Timeout => RemoteError::Timeout,
        });
        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(err) => *self.last_error.write() = Some(err.to_string()),
        }
        result
    }

    fn record<T>(&self, result: RemoteResult<T>) -> RemoteResult<T> {
        if let Err(err) = &result {
            *self.last_error.write() = Some(err.to_string());
        }
        result
    }
}

/// Maps a non-success status to an error.
fn status_error(status: u16, method: HttpMethod, body: &[u8]) -> RemoteError {
    match status {
        409 => RemoteError::Conflict {
            message: server_message(body),
        },
        400 if method == HttpMethod::Put => RemoteError::Conflict {
            message: server_message(body),
        },
        401 => RemoteError::Unauthorized,
        403 => RemoteError::Forbidden,
        404 => RemoteError::NotFound,
        500..=599 => RemoteError::Server { status },
        _ => RemoteError::Rejected { status },
    }
}

fn server_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

fn decode_entity(response: &HttpResponse, method: HttpMethod) -> RemoteResult<Entity> {
    if !matches!(response.status, 200 | 201) {
        return Err(status_error(response.status, method, &response.body));
    }
    let value: Value = serde_json::from_slice(&response.body)
        .map_err(|err| RemoteError::Malformed(err.to_string()))?;
    Entity::from_wire(value).map_err(|err| RemoteError::Malformed(err.to_string()))
}

/// Decodes `{items, total}` or a bare array.
fn decode_page(response: &HttpResponse) -> RemoteResult<Page> {
    if response.status != 200 {
        return Err(status_error(response.status, HttpMethod::Get, &response.body));
    }
    let value: Value = serde_json::from_slice(&response.body)
        .map_err(|err| RemoteError::Malformed(err.to_string()))?;

    let (items, total) = match value {
        Value::Array(items) => {
            let total = items.len() as u64;
            (items, Some(total))
        }
        Value::Object(mut object) => {
            let total = object.get("total").and_then(Value::as_u64);
            match object.remove("items") {
                Some(Value::Array(items)) => (items, total),
                _ => return Err(RemoteError::Malformed("list response without items".into())),
            }
        }
        other => {
            return Err(RemoteError::Malformed(format!(
                "unexpected list response: {other}"
            )))
        }
    };

    let items = items
        .into_iter()
        .map(Entity::from_wire)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| RemoteError::Malformed(err.to_string()))?;
    let total = total.unwrap_or(items.len() as u64);
    Ok(Page { items, total })
}

fn query_string(query: &ListQuery) -> String {
    let mut params = vec![format!("skip={}", query.skip)];
    if let Some(limit) = query.limit {
        params.push(format!("limit={limit}"));
    }
    if let Some(q) = &query.q {
        params.push(format!("q={}", percent_encode(q)));
    }
    if let Some(filter) = &query.filter {
        params.push(format!("filter={}", percent_encode(filter)));
    }
    params.join("&")
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

impl<C: HttpClient> RemoteApi for HttpRemote<C> {
    fn create(&self, token: &str, entity: &Entity) -> RemoteResult<Entity> {
        let response = self.send(
            HttpMethod::Post,
            self.base_url.clone(),
            token,
            Vec::new(),
            Some(&entity.to_wire()),
        )?;
        self.record(decode_entity(&response, HttpMethod::Post))
    }

    fn update(
        &self,
        token: &str,
        id: &EntityId,
        entity: &Entity,
        base_version: u64,
    ) -> RemoteResult<Entity> {
        let mut body = entity.to_wire();
        if let Value::Object(object) = &mut body {
            object.insert("_id".into(), Value::String(id.as_str().to_string()));
            object.insert("version".into(), Value::from(base_version));
        }
        let response = self.send(
            HttpMethod::Put,
            self.item_url(id),
            token,
            vec![("If-Match".to_string(), base_version.to_string())],
            Some(&body),
        )?;
        self.record(decode_entity(&response, HttpMethod::Put))
    }

    fn read(&self, token: &str, id: &EntityId) -> RemoteResult<Entity> {
        let response = self.send(HttpMethod::Get, self.item_url(id), token, Vec::new(), None)?;
        self.record(decode_entity(&response, HttpMethod::Get))
    }

    fn list(&self, token: &str, query: &ListQuery) -> RemoteResult<Page> {
        let url = format!("{}?{}", self.base_url, query_string(query));
        let response = self.send(HttpMethod::Get, url, token, Vec::new(), None)?;
        self.record(decode_page(&response))
    }
}
