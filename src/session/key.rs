//! Session key resolution.
//!
//! # Responsibilities
//! - Derive a stickiness key from request headers, query and path
//! - Parse the annotation surface that says where to look
//!
//! # Design Decisions
//! - Pure function of (headers, uri, config); recording the key back on
//!   the request is a separate, explicit step
//! - First non-empty match wins; a rule that does not match falls through
//! - Malformed annotations disable only the rule they configure

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};

/// Explicit sticky-session header.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("k-session");

/// Fallback header carrying a revision-scoped session key.
pub const REVISION_HEADER: HeaderName = HeaderName::from_static("k-revision");

/// Header carrying the `deactivate` annotation value downstream.
pub const DEACTIVATE_HEADER: HeaderName = HeaderName::from_static("k-deactivate");

/// Annotation keys configuring session key resolution.
pub mod annotations {
    pub const SESSION_HEADER_NAME: &str = "activator.sticky/session-header-name";
    pub const SESSION_QUERY_PARAMETER_NAME: &str = "activator.sticky/session-query-parameter-name";
    pub const SESSION_PATH_SEGMENT_INDEX: &str = "activator.sticky/session-path-segment-index";
    pub const REVISION_HEADER_NAME: &str = "activator.sticky/revision-header-name";
    pub const REVISION_QUERY_PARAMETER_NAME: &str = "activator.sticky/revision-query-parameter-name";
    pub const REVISION_PATH_SEGMENT_INDEX: &str = "activator.sticky/revision-path-segment-index";
    pub const DEACTIVATE: &str = "activator.sticky/deactivate";
}

/// Where to find a session key on a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeyConfig {
    pub header_name: Option<HeaderName>,
    pub query_parameter: Option<String>,
    pub path_segment: Option<usize>,
    pub revision_header_name: Option<HeaderName>,
    pub revision_query_parameter: Option<String>,
    pub revision_path_segment: Option<usize>,
    pub deactivate: Option<HeaderValue>,
}

impl SessionKeyConfig {
    /// Build from workload annotations. Empty or malformed values leave the
    /// corresponding rule unset.
    pub fn from_annotations(annotations: &HashMap<String, String>) -> Self {
        let get = |key: &str| annotations.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let header = |key: &str| {
            get(key).and_then(|v| match HeaderName::try_from(v) {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::debug!(annotation = key, value = v, "Ignoring invalid header name");
                    None
                }
            })
        };

        let index = |key: &str| {
            get(key).and_then(|v| match v.parse::<usize>() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::debug!(annotation = key, value = v, "Ignoring invalid path segment index");
                    None
                }
            })
        };

        Self {
            header_name: header(annotations::SESSION_HEADER_NAME),
            query_parameter: get(annotations::SESSION_QUERY_PARAMETER_NAME).map(str::to_string),
            path_segment: index(annotations::SESSION_PATH_SEGMENT_INDEX),
            revision_header_name: header(annotations::REVISION_HEADER_NAME),
            revision_query_parameter: get(annotations::REVISION_QUERY_PARAMETER_NAME)
                .map(str::to_string),
            revision_path_segment: index(annotations::REVISION_PATH_SEGMENT_INDEX),
            deactivate: get(annotations::DEACTIVATE).and_then(|v| HeaderValue::from_str(v).ok()),
        }
    }
}

/// Which rule produced a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    SessionHeader,
    ConfiguredHeader,
    QueryParameter,
    PathSegment,
    RevisionHeader,
    RevisionQueryParameter,
    RevisionPathSegment,
    RevisionFallback,
}

/// A resolved, non-empty session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    value: String,
    source: KeySource,
}

impl SessionKey {
    pub fn new(value: impl Into<String>, source: KeySource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Keys found through session rules become the canonical `K-Session`
    /// header for downstream consumers.
    pub fn should_record(&self) -> bool {
        matches!(
            self.source,
            KeySource::ConfiguredHeader | KeySource::QueryParameter | KeySource::PathSegment
        )
    }

    /// Write the key onto `headers` as `K-Session` when it came from a
    /// configured rule.
    pub fn record(&self, headers: &mut HeaderMap) {
        if !self.should_record() {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(&self.value) {
            headers.insert(SESSION_HEADER, value);
        }
    }
}

/// Resolve the session key for a request.
///
/// Precedence: `K-Session` > configured session header > session query
/// parameter > session path segment > configured revision header > revision
/// query parameter > revision path segment > `K-Revision`.
pub fn resolve(headers: &HeaderMap, uri: &Uri, config: &SessionKeyConfig) -> Option<SessionKey> {
    let found = |value: Option<String>, source| {
        value.filter(|v| !v.is_empty()).map(|v| SessionKey::new(v, source))
    };

    found(header_value(headers, &SESSION_HEADER), KeySource::SessionHeader)
        .or_else(|| {
            let name = config.header_name.as_ref()?;
            found(header_value(headers, name), KeySource::ConfiguredHeader)
        })
        .or_else(|| {
            let name = config.query_parameter.as_deref()?;
            found(query_value(uri, name), KeySource::QueryParameter)
        })
        .or_else(|| {
            let n = config.path_segment?;
            found(path_segment(uri, n), KeySource::PathSegment)
        })
        .or_else(|| {
            let name = config.revision_header_name.as_ref()?;
            found(header_value(headers, name), KeySource::RevisionHeader)
        })
        .or_else(|| {
            let name = config.revision_query_parameter.as_deref()?;
            found(query_value(uri, name), KeySource::RevisionQueryParameter)
        })
        .or_else(|| {
            let n = config.revision_path_segment?;
            found(path_segment(uri, n), KeySource::RevisionPathSegment)
        })
        .or_else(|| found(header_value(headers, &REVISION_HEADER), KeySource::RevisionFallback))
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn query_value(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// The `n`-th slash-delimited segment of the path, after the leading slash.
fn path_segment(uri: &Uri, n: usize) -> Option<String> {
    let path = uri.path();
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .nth(n)
        .map(str::to_string)
}
