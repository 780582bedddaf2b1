//! Bundle payloads and the HTTP responses built from them.
//!
//! The core crate stays independent of any HTTP framework: a
//! [`BundleResponse`] carries a status code, header pairs and a body, and the
//! server layer maps it onto its own response type.

use crate::fingerprint::fingerprint;
use bytes::Bytes;

/// MIME type of every bundle response.
pub const CONTENT_TYPE_JS: &str = "application/javascript";

/// Header names written by bundle responses.
pub mod header_names {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const ETAG: &str = "ETag";
    pub const VARY: &str = "Vary";
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// A built bundle together with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Bytes,
    fingerprint: String,
}

impl Payload {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let fingerprint = fingerprint(&bytes);
        Self { bytes, fingerprint }
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Answer a request carrying the given `If-None-Match` value.
    #[must_use]
    pub fn respond(&self, validator: Option<&str>) -> BundleResponse {
        if validator.is_some_and(|v| v == self.fingerprint) {
            BundleResponse::NotModified
        } else {
            BundleResponse::Ok {
                etag: self.fingerprint.clone(),
                body: self.bytes.clone(),
            }
        }
    }
}

/// Response to a bundle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleResponse {
    /// Full payload.
    Ok { etag: String, body: Bytes },
    /// The client's cached copy is current.
    NotModified,
    /// A deferred request gave up waiting for a build.
    Unavailable,
}

impl BundleResponse {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Ok { .. } => 200,
            Self::NotModified => 304,
            Self::Unavailable => 503,
        }
    }

    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(header_names::CONTENT_TYPE, CONTENT_TYPE_JS.to_string())];
        match self {
            Self::Ok { etag, .. } => {
                headers.push((header_names::ETAG, etag.clone()));
                headers.push((header_names::VARY, "Accept-Encoding".to_string()));
            }
            Self::NotModified => {}
            Self::Unavailable => {
                headers.push((header_names::RETRY_AFTER, "1".to_string()));
            }
        }
        headers
    }

    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        match self {
            Self::Ok { etag, .. } => Some(etag),
            _ => None,
        }
    }

    #[must_use]
    pub fn body(&self) -> Bytes {
        match self {
            Self::Ok { body, .. } => body.clone(),
            _ => Bytes::new(),
        }
    }
}
