//! Header translation between the client and the upstream.
//!
//! Only fixed allow-lists cross the relay in either direction. Framing and
//! type headers (`content-length`, `content-type`) are left to the streamer
//! because they interact with the size bound.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Inbound request headers forwarded upstream (cache validation only).
pub const FORWARDED_REQUEST_HEADERS: [HeaderName; 5] = [
    header::ACCEPT,
    header::ACCEPT_ENCODING,
    header::ETAG,
    header::IF_MODIFIED_SINCE,
    header::CACHE_CONTROL,
];

/// Upstream response headers relayed to the client verbatim.
pub const RELAYED_RESPONSE_HEADERS: [HeaderName; 5] = [
    header::TRANSFER_ENCODING,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::EXPIRES,
];

fn copy_allowed(source: &HeaderMap, allowed: &[HeaderName]) -> HeaderMap {
    source
        .iter()
        .filter(|(name, _)| allowed.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Select the allow-listed subset of the client's request headers.
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    copy_allowed(inbound, &FORWARDED_REQUEST_HEADERS)
}

/// Build the headers of one upstream attempt.
pub fn upstream_headers(
    forwarded: &HeaderMap,
    referer: Option<&HeaderValue>,
    user_agent: &HeaderValue,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(forwarded.len() + 2);
    headers.insert(header::USER_AGENT, user_agent.clone());
    for (name, value) in forwarded {
        headers.append(name.clone(), value.clone());
    }
    if let Some(referer) = referer {
        headers.insert(header::REFERER, referer.clone());
    }
    headers
}

/// Select the allow-listed subset of the upstream's response headers.
pub fn downstream_headers(upstream: &HeaderMap) -> HeaderMap {
    copy_allowed(upstream, &RELAYED_RESPONSE_HEADERS)
}
