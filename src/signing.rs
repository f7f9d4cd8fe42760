//! Shared-key request signing.
//!
//! The wire contract: `Authorization: <scheme> <account>:<base64 signature>`,
//! where the signature is an HMAC-SHA256 over a canonical string derived from
//! the request. Two schemes exist because different resource types authorize
//! differently; they share the MAC and differ only in which parts of the
//! request enter the canonical string.
//!
//! Full scheme layout:
//!
//! ```text
//! VERB + "\n" +
//! Content-Encoding + "\n" +
//! Content-Language + "\n" +
//! Content-Length + "\n" +          (empty when zero)
//! Content-MD5 + "\n" +
//! Content-Type + "\n" +
//! Date + "\n" +
//! If-Modified-Since + "\n" +
//! If-Match + "\n" +
//! If-None-Match + "\n" +
//! If-Unmodified-Since + "\n" +
//! Range + "\n" +
//! CanonicalizedHeaders + "\n" +
//! CanonicalizedResource
//! ```
//!
//! Lite scheme layout:
//!
//! ```text
//! VERB + "\n" +
//! Content-MD5 + "\n" +
//! Content-Type + "\n" +
//! Date + "\n" +
//! CanonicalizedHeaders + "\n" +
//! CanonicalizedResourceLite
//! ```
//!
//! CanonicalizedHeaders covers every `x-ms-*` header, lowercased and sorted
//! lexicographically. CanonicalizedResource is `/<account><path>` followed by
//! one line per query parameter, keys lowercased and sorted, values
//! percent-decoded, duplicate keys comma-joined; the lite variant keeps only
//! the `comp` parameter. The date stamp travels in `x-ms-date`, so the plain
//! `Date` line is typically empty.

use crate::error::StorageError;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{self, HeaderValue};
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::trace;

/// Which canonical-string layout signs the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    /// The full header list. Scheme name `SharedKey`.
    Full,
    /// The reduced header list. Scheme name `SharedKeyLite`.
    Lite,
}

impl SigningScheme {
    fn authorization_prefix(&self) -> &'static str {
        match self {
            Self::Full => "SharedKey",
            Self::Lite => "SharedKeyLite",
        }
    }
}

const X_MS_DATE: &str = "x-ms-date";

/// RFC 1123 date stamp used by the service.
pub(crate) fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn base64_hmac_sha256(key: &[u8], content: &[u8]) -> String {
    // new_from_slice accepts any key length.
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(content);
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Sign the request in place: stamp `x-ms-date`, compute the canonical
/// string, and insert the `Authorization` header.
pub(crate) fn sign_shared_key(
    parts: &mut http::request::Parts,
    account: &str,
    key: &[u8],
    scheme: SigningScheme,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let stamp = HeaderValue::from_str(&http_date(now))
        .map_err(|e| StorageError::Sign(format!("invalid date stamp: {e}")))?;
    parts.headers.insert(X_MS_DATE, stamp);

    let string_to_sign = string_to_sign(parts, account, scheme)?;
    trace!(scheme = ?scheme, string_to_sign = %string_to_sign, "signing attempt");
    let signature = base64_hmac_sha256(key, string_to_sign.as_bytes());

    let mut value = HeaderValue::from_str(&format!(
        "{} {account}:{signature}",
        scheme.authorization_prefix()
    ))
    .map_err(|e| StorageError::Sign(format!("invalid authorization header: {e}")))?;
    value.set_sensitive(true);
    parts.headers.insert(header::AUTHORIZATION, value);
    Ok(())
}

fn header_or_empty<'a>(
    headers: &'a http::HeaderMap,
    name: impl header::AsHeaderName,
) -> Result<&'a str, StorageError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map_err(|e| StorageError::Sign(format!("non-ascii header value: {e}"))),
        None => Ok(""),
    }
}

/// The canonical string for the given request and scheme.
pub(crate) fn string_to_sign(
    parts: &http::request::Parts,
    account: &str,
    scheme: SigningScheme,
) -> Result<String, StorageError> {
    let headers = &parts.headers;
    let mut s = String::with_capacity(256);
    let mut line = |value: &str| {
        s.push_str(value);
        s.push('\n');
    };

    line(parts.method.as_str());
    match scheme {
        SigningScheme::Full => {
            line(header_or_empty(headers, header::CONTENT_ENCODING)?);
            line(header_or_empty(headers, header::CONTENT_LANGUAGE)?);
            let content_length = header_or_empty(headers, header::CONTENT_LENGTH)?;
            line(if content_length == "0" { "" } else { content_length });
            line(header_or_empty(headers, "content-md5")?);
            line(header_or_empty(headers, header::CONTENT_TYPE)?);
            line(header_or_empty(headers, header::DATE)?);
            line(header_or_empty(headers, header::IF_MODIFIED_SINCE)?);
            line(header_or_empty(headers, header::IF_MATCH)?);
            line(header_or_empty(headers, header::IF_NONE_MATCH)?);
            line(header_or_empty(headers, header::IF_UNMODIFIED_SINCE)?);
            line(header_or_empty(headers, header::RANGE)?);
        }
        SigningScheme::Lite => {
            line(header_or_empty(headers, "content-md5")?);
            line(header_or_empty(headers, header::CONTENT_TYPE)?);
            line(header_or_empty(headers, header::DATE)?);
        }
    }
    line(&canonicalized_headers(headers)?);

    let resource = match scheme {
        SigningScheme::Full => canonicalized_resource(&parts.uri, account),
        SigningScheme::Lite => canonicalized_resource_lite(&parts.uri, account),
    };
    s.push_str(&resource);
    Ok(s)
}

/// Every `x-ms-*` header, lowercased and lexicographically sorted, rendered
/// as `name:value` lines joined by `\n`.
fn canonicalized_headers(headers: &http::HeaderMap) -> Result<String, StorageError> {
    let mut selected: Vec<(String, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| {
            value
                .to_str()
                .map(|v| (name.as_str().to_lowercase(), v.trim()))
                .map_err(|e| StorageError::Sign(format!("non-ascii header value: {e}")))
        })
        .collect::<Result<_, _>>()?;
    selected.sort();

    let mut s = String::new();
    for (idx, (name, value)) in selected.iter().enumerate() {
        if idx > 0 {
            s.push('\n');
        }
        s.push_str(name);
        s.push(':');
        s.push_str(value);
    }
    Ok(s)
}

fn decoded_query_pairs(uri: &http::Uri) -> BTreeMap<String, Vec<String>> {
    let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(query) = uri.query() {
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            pairs.entry(k.to_lowercase()).or_default().push(v.into_owned());
        }
    }
    pairs
}

/// `/<account><path>`, then one `key:value` line per query parameter with
/// keys lowercased and sorted; duplicate keys comma-join their sorted values.
fn canonicalized_resource(uri: &http::Uri, account: &str) -> String {
    let mut s = format!("/{account}{}", uri.path());
    for (key, mut values) in decoded_query_pairs(uri) {
        values.sort();
        s.push('\n');
        s.push_str(&key);
        s.push(':');
        s.push_str(&values.join(","));
    }
    s
}

/// The lite resource keeps only the `comp` parameter.
fn canonicalized_resource_lite(uri: &http::Uri, account: &str) -> String {
    let mut s = format!("/{account}{}", uri.path());
    if let Some(comp) = decoded_query_pairs(uri).get("comp").and_then(|v| v.first()) {
        s.push_str("?comp=");
        s.push_str(comp);
    }
    s
}
