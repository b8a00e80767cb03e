//! Revision identification.
//!
//! # Responsibilities
//! - Read the explicit revision headers
//! - Otherwise decode the cluster-local host form
//!   `name.namespace.svc.<cluster-domain>[:port]`
//!
//! # Design Decisions
//! - Both headers must be present and non-empty to be used
//! - Host matching on `svc` and the cluster domain is case-insensitive
//! - No match means the request cannot be routed (404)

use axum::http::{header, HeaderMap, HeaderName, Uri};

use crate::metadata::RevisionId;

/// Name of the requested revision.
pub const REVISION_NAME_HEADER: HeaderName = HeaderName::from_static("knative-serving-revision");

/// Namespace of the requested revision.
pub const REVISION_NAMESPACE_HEADER: HeaderName = HeaderName::from_static("knative-serving-namespace");

fn header_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Decode `name.namespace.svc.<domain>[:port]`.
pub fn parse_cluster_host(host: &str, cluster_domain: &str) -> Option<RevisionId> {
    let mut parts = host.splitn(4, '.');
    let name = parts.next()?;
    let namespace = parts.next()?;
    let svc = parts.next()?;
    let rest = parts.next()?;

    let domain = rest.split_once(':').map_or(rest, |(domain, _port)| domain);
    if name.is_empty()
        || namespace.is_empty()
        || !svc.eq_ignore_ascii_case("svc")
        || !domain.eq_ignore_ascii_case(cluster_domain)
    {
        return None;
    }
    Some(RevisionId::new(namespace, name))
}

/// Identify the revision a request is addressed to.
pub fn identify(headers: &HeaderMap, uri: &Uri, cluster_domain: &str) -> Option<RevisionId> {
    if let (Some(namespace), Some(name)) = (
        header_value(headers, &REVISION_NAMESPACE_HEADER),
        header_value(headers, &REVISION_NAME_HEADER),
    ) {
        return Some(RevisionId::new(namespace, name));
    }

    let host = header_value(headers, &header::HOST).or_else(|| uri.authority().map(|a| a.as_str()))?;
    parse_cluster_host(host, cluster_domain)
}
