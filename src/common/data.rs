use crate::{common::data::Error::InvalidFilter, server::matcher::PathPattern};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::TryFrom, fmt};

/// Delay applied to a stub response when the definition does not specify one.
pub const DEFAULT_DELAY_MS: u64 = 100;

/// Method value that lets a stub match requests of any HTTP method.
pub const ANY_METHOD: &str = "*";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot decode base64 body: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// The payload of a stub response or of a recorded request.
///
/// Binary payloads are kept as raw bytes. The base64 transport encoding only exists in the
/// JSON representation used by the administration API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Binary(Bytes),
}

impl Body {
    /// Classifies raw bytes: valid UTF-8 becomes [`Body::Text`], anything else [`Body::Binary`].
    pub fn from_bytes(bytes: Bytes) -> Self {
        match std::str::from_utf8(&bytes) {
            Ok(text) => Body::Text(text.to_string()),
            Err(_) => Body::Binary(bytes),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Body::Binary(bytes) => bytes.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            Body::Binary(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Body::Binary(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Body::Text(text) => text.len(),
            Body::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_wire(&self) -> (Option<String>, bool) {
        match self {
            Body::Text(text) => (Some(text.clone()), false),
            Body::Binary(bytes) => (Some(BASE64.encode(bytes)), true),
        }
    }

    fn from_wire(body: Option<String>, binary: bool) -> Result<Self, Error> {
        let body = body.unwrap_or_default();
        if binary {
            return Ok(Body::Binary(Bytes::from(BASE64.decode(body.as_bytes())?)));
        }
        Ok(Body::Text(body))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Binary(value)
    }
}

/// Additional conditions a request must satisfy, on top of method and path, for a stub to match.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RequestPredicates {
    /// Headers that must be present with exactly these values. Names are case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Query parameters that must be present with exactly these values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    /// JSON value the request body must include.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl RequestPredicates {
    pub fn is_empty(&self) -> bool {
        self.headers.is_none() && self.query.is_none() && self.body.is_none()
    }
}

/// Describes the response that is served for a matching request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "wire::StubResponse", into = "wire::StubResponse")]
pub struct StubResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    /// Milliseconds to wait before the body is written.
    pub delay: u64,
}

impl StubResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: Body::default(),
            delay: DEFAULT_DELAY_MS,
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body<B: Into<Body>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn delay(mut self, millis: u64) -> Self {
        self.delay = millis;
        self
    }
}

/// Everything a caller supplies to create a stub.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StubDefinition {
    /// An HTTP method or [`ANY_METHOD`].
    pub method: String,
    /// An exact path or a parameterized pattern such as `/users/:id`.
    pub path: String,
    #[serde(default, skip_serializing_if = "RequestPredicates::is_empty")]
    pub request: RequestPredicates,
    pub response: StubResponse,
}

impl StubDefinition {
    pub fn new<M, P>(method: M, path: P, response: StubResponse) -> Self
    where
        M: Into<String>,
        P: Into<String>,
    {
        Self {
            method: method.into(),
            path: path.into(),
            request: RequestPredicates::default(),
            response,
        }
    }

    pub fn predicates(mut self, predicates: RequestPredicates) -> Self {
        self.request = predicates;
        self
    }
}

/// A stored stub. Stubs are immutable: to change one, delete it and create a new one.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StubConfig {
    pub id: usize,
    #[serde(flatten)]
    pub definition: StubDefinition,
    #[serde(skip)]
    pub(crate) path_pattern: Option<PathPattern>,
}

impl StubConfig {
    pub(crate) fn new(
        id: usize,
        definition: StubDefinition,
        path_pattern: Option<PathPattern>,
    ) -> Self {
        Self {
            id,
            definition,
            path_pattern,
        }
    }

    pub fn method(&self) -> &str {
        &self.definition.method
    }

    pub fn path(&self) -> &str {
        &self.definition.path
    }

    pub fn response(&self) -> &StubResponse {
        &self.definition.response
    }
}

/// A snapshot of an inbound data-plane request, taken before it is matched.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub timestamp: u64,
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Body,
}

/// A recorded inbound request. One entry exists per request the server accepted, whether a stub
/// matched it or not.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "wire::LastRequestEntry", into = "wire::LastRequestEntry")]
pub struct LastRequestEntry {
    pub id: usize,
    /// Capture instant in milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Body,
}

impl LastRequestEntry {
    pub(crate) fn new(id: usize, request: InboundRequest) -> Self {
        Self {
            id,
            timestamp: request.timestamp,
            method: request.method,
            path: request.path,
            headers: request.headers,
            query: request.query,
            body: request.body,
        }
    }
}

/// Selects stubs or recorded requests. Fields that are set are combined with AND; an empty
/// filter selects everything.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: usize) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn method<M: Into<String>>(mut self, method: M) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.method.is_none() && self.path.is_none()
    }

    pub fn matches(&self, id: usize, method: &str, path: &str) -> bool {
        self.id.map_or(true, |expected| expected == id)
            && self
                .method
                .as_ref()
                .map_or(true, |expected| expected.eq_ignore_ascii_case(method))
            && self.path.as_ref().map_or(true, |expected| expected == path)
    }

    /// Parses a URL query string such as `method=GET&path=/foo`. Unknown keys are ignored.
    pub fn from_query(query: &str) -> Result<Self, Error> {
        let mut filter = Filter::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "id" => {
                    let id = value
                        .parse::<usize>()
                        .map_err(|err| InvalidFilter(format!("id '{}': {}", value, err)))?;
                    filter.id = Some(id);
                }
                "method" => filter.method = Some(value.into_owned()),
                "path" => filter.path = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(filter)
    }

    pub fn to_query(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if let Some(id) = self.id {
            serializer.append_pair("id", &id.to_string());
        }
        if let Some(method) = &self.method {
            serializer.append_pair("method", method);
        }
        if let Some(path) = &self.path {
            serializer.append_pair("path", path);
        }
        serializer.finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Idle timeout in milliseconds. Zero disables it.
    pub timeout: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedCount {
    pub deleted: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new<T: ToString>(message: &T) -> Self {
        ErrorResponse {
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ************************************************************************************************
// JSON representation used by the administration API
// ************************************************************************************************
mod wire {
    use super::DEFAULT_DELAY_MS;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    fn default_delay() -> u64 {
        DEFAULT_DELAY_MS
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct StubResponse {
        pub status_code: u16,
        #[serde(default)]
        pub headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub body: Option<String>,
        #[serde(default)]
        pub binary_body: bool,
        #[serde(default = "default_delay")]
        pub delay: u64,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LastRequestEntry {
        pub id: usize,
        pub timestamp: u64,
        pub method: String,
        pub path: String,
        #[serde(default)]
        pub headers: BTreeMap<String, String>,
        #[serde(default)]
        pub query: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub body: Option<String>,
        #[serde(default)]
        pub binary_body: bool,
    }
}

impl TryFrom<wire::StubResponse> for StubResponse {
    type Error = Error;

    fn try_from(value: wire::StubResponse) -> Result<Self, Self::Error> {
        Ok(StubResponse {
            status_code: value.status_code,
            headers: value.headers,
            body: Body::from_wire(value.body, value.binary_body)?,
            delay: value.delay,
        })
    }
}

impl From<StubResponse> for wire::StubResponse {
    fn from(value: StubResponse) -> Self {
        let (body, binary_body) = value.body.to_wire();
        wire::StubResponse {
            status_code: value.status_code,
            headers: value.headers,
            body,
            binary_body,
            delay: value.delay,
        }
    }
}

impl TryFrom<wire::LastRequestEntry> for LastRequestEntry {
    type Error = Error;

    fn try_from(value: wire::LastRequestEntry) -> Result<Self, Self::Error> {
        Ok(LastRequestEntry {
            id: value.id,
            timestamp: value.timestamp,
            method: value.method,
            path: value.path,
            headers: value.headers,
            query: value.query,
            body: Body::from_wire(value.body, value.binary_body)?,
        })
    }
}

impl From<LastRequestEntry> for wire::LastRequestEntry {
    fn from(value: LastRequestEntry) -> Self {
        let (body, binary_body) = value.body.to_wire();
        wire::LastRequestEntry {
            id: value.id,
            timestamp: value.timestamp,
            method: value.method,
            path: value.path,
            headers: value.headers,
            query: value.query,
            body,
            binary_body,
        }
    }
}
