//! Account credentials.
//!
//! Exactly one representation per value: an account name with its symmetric
//! key, a delegated-access token, or nothing. The representation decides which
//! operations do anything. Signing is real only for shared keys, URI
//! transformation only for tokens; the others are no-ops and never fail.
//! Key-format validation happens once, at construction.

use crate::error::StorageError;
use crate::signing::{self, SigningScheme};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::Utc;
use http::uri::PathAndQuery;
use http::Uri;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

/// Redacts secret material in `Debug` output.
struct Redact<'a>(&'a str);

impl Debug for Redact<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "\"\"")
        } else {
            write!(f, "\"***\"")
        }
    }
}

/// Credentials for a storage account.
#[derive(Clone)]
pub enum Credentials {
    /// Account name plus symmetric key. Signs each attempt.
    SharedKey {
        /// Account name, part of the canonicalized resource.
        account: String,
        /// Decoded key bytes.
        key: Vec<u8>,
    },
    /// Delegated-access token appended to resource URIs in lieu of signing.
    SasToken {
        /// The token's query parameters, without a leading `?`.
        token: String,
    },
    /// No credentials; public resources only.
    Anonymous,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => f
                .debug_struct("Credentials::SharedKey")
                .field("account", account)
                .field("key", &Redact("***"))
                .finish(),
            Self::SasToken { token } => f
                .debug_struct("Credentials::SasToken")
                .field("token", &Redact(token))
                .finish(),
            Self::Anonymous => write!(f, "Credentials::Anonymous"),
        }
    }
}

impl Credentials {
    /// Shared-key credentials. The key must be valid standard base64; this is
    /// the only constructor that can fail.
    pub fn with_shared_key(account: &str, base64_key: &str) -> Result<Self, StorageError> {
        let key = BASE64_STANDARD.decode(base64_key).map_err(|e| {
            StorageError::Config(format!("account key is not valid base64: {e}"))
        })?;
        Ok(Self::SharedKey {
            account: account.to_string(),
            key,
        })
    }

    /// Delegated-access token credentials. A leading `?` is tolerated.
    pub fn with_sas_token(token: &str) -> Self {
        Self::SasToken {
            token: token.trim_start_matches('?').to_string(),
        }
    }

    /// No credentials.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// Sign one physical attempt in place.
    ///
    /// Called once per attempt, after the endpoint and the attempt's exact
    /// content length are known. Shared-key credentials stamp `x-ms-date` and
    /// insert the `Authorization` header; the other representations leave the
    /// request untouched.
    pub fn sign(
        &self,
        parts: &mut http::request::Parts,
        scheme: SigningScheme,
    ) -> Result<(), StorageError> {
        match self {
            Self::SharedKey { account, key } => {
                signing::sign_shared_key(parts, account, key, scheme, Utc::now())
            }
            Self::SasToken { .. } | Self::Anonymous => Ok(()),
        }
    }

    /// Transform a resource URI for delegated access.
    ///
    /// Token credentials append the token's query parameters, merging with an
    /// existing query string without duplicating keys already present. The
    /// other representations return the URI unchanged.
    pub fn transform_uri(&self, uri: &Uri) -> Result<Uri, StorageError> {
        let Self::SasToken { token } = self else {
            return Ok(uri.clone());
        };
        if token.is_empty() {
            return Ok(uri.clone());
        }

        let path = uri.path();
        let existing: Vec<(String, String)> = uri
            .query()
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        let present: HashSet<&str> = existing.iter().map(|(k, _)| k.as_str()).collect();

        let mut merged = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &existing {
            merged.append_pair(k, v);
        }
        for (k, v) in form_urlencoded::parse(token.as_bytes()) {
            if !present.contains(k.as_ref()) {
                merged.append_pair(&k, &v);
            }
        }
        let query = merged.finish();

        let paq = format!("{path}?{query}")
            .parse::<PathAndQuery>()
            .map_err(|e| StorageError::Sign(format!("token produced an invalid uri: {e}")))?;
        let mut parts = uri.clone().into_parts();
        parts.path_and_query = Some(paq);
        Uri::from_parts(parts)
            .map_err(|e| StorageError::Sign(format!("token produced an invalid uri: {e}")))
    }
}
