//! Request signing.
//!
//! [`SigV4Signer`] implements AWS Signature Version 4 in its two forms: header signing for
//! request/response delivery and query-string presigning for header-less delivery.
//! [`UnsignedSigner`] is used when no credentials are configured.
use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{HttpRequest, CONTENT_SHA256_HEADER};
use crate::{error::TransportError, serializer::content_hash};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AUTHORIZATION_HEADER: &str = "authorization";
const DATE_HEADER: &str = "x-amz-date";
const TOKEN_HEADER: &str = "x-amz-security-token";

/// Static credentials used to sign requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Credentials {
        Credentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Credentials {
        self.session_token = Some(session_token.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A signing capability. Selected once, at construction time.
pub trait RequestSigner: Send + Sync {
    /// Sign `request` in place with authorization and date headers.
    fn sign(&self, request: HttpRequest, now: DateTime<Utc>) -> Result<HttpRequest, TransportError>;

    /// Embed signature material in the query string, valid for `expires_in`.
    fn presign(
        &self,
        request: HttpRequest,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<HttpRequest, TransportError>;

    /// Whether this signer adds any signature material. Content hashes are only computed for
    /// signing signers.
    fn is_signing(&self) -> bool {
        true
    }
}

/// Sends requests as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsignedSigner;

impl RequestSigner for UnsignedSigner {
    fn sign(&self, request: HttpRequest, _now: DateTime<Utc>) -> Result<HttpRequest, TransportError> {
        Ok(request)
    }

    fn presign(
        &self,
        request: HttpRequest,
        _expires_in: Duration,
        _now: DateTime<Utc>,
    ) -> Result<HttpRequest, TransportError> {
        Ok(request)
    }

    fn is_signing(&self) -> bool {
        false
    }
}

/// AWS Signature Version 4 signer for one region and service.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>, service: impl Into<String>) -> SigV4Signer {
        SigV4Signer {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    fn scope(&self, short_date: &str) -> String {
        format!("{short_date}/{}/{}/aws4_request", self.region, self.service)
    }

    fn signature(&self, short_date: &str, amz_date: &str, scope: &str, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            content_hash(canonical_request)
        );

        let key = hmac_sha256(
            format!("AWS4{}", self.credentials.secret_access_key).as_bytes(),
            short_date,
        );
        let key = hmac_sha256(&key, &self.region);
        let key = hmac_sha256(&key, &self.service);
        let key = hmac_sha256(&key, "aws4_request");

        hex::encode(hmac_sha256(&key, &string_to_sign))
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(&self, mut request: HttpRequest, now: DateTime<Utc>) -> Result<HttpRequest, TransportError> {
        require_host(&request)?;
        let (amz_date, short_date) = format_dates(now);

        request.headers.remove(AUTHORIZATION_HEADER);
        request.headers.insert(DATE_HEADER.to_owned(), amz_date.clone());
        if let Some(token) = &self.credentials.session_token {
            request.headers.insert(TOKEN_HEADER.to_owned(), token.clone());
        }

        let headers = canonical_headers(&request.headers);
        let signed_headers = headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");
        let canonical = canonical_request(&request, &headers, &signed_headers);
        let scope = self.scope(&short_date);
        let signature = self.signature(&short_date, &amz_date, &scope, &canonical);

        request.headers.insert(
            AUTHORIZATION_HEADER.to_owned(),
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
        );
        Ok(request)
    }

    fn presign(
        &self,
        mut request: HttpRequest,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<HttpRequest, TransportError> {
        let host = require_host(&request)?.to_owned();
        let (amz_date, short_date) = format_dates(now);
        let scope = self.scope(&short_date);

        // Only `host` is signed, so other `x-amz-*` headers travel as query parameters.
        let hoisted: Vec<String> = request
            .headers
            .keys()
            .filter(|name| name.starts_with("x-amz-"))
            .cloned()
            .collect();
        for name in hoisted {
            if let Some(value) = request.headers.remove(&name) {
                request.query.insert(name, value);
            }
        }

        let query = &mut request.query;
        query.remove("X-Amz-Signature");
        query.insert("X-Amz-Algorithm".to_owned(), ALGORITHM.to_owned());
        query.insert(
            "X-Amz-Credential".to_owned(),
            format!("{}/{scope}", self.credentials.access_key_id),
        );
        query.insert("X-Amz-Date".to_owned(), amz_date.clone());
        query.insert("X-Amz-Expires".to_owned(), expires_in.as_secs().to_string());
        query.insert("X-Amz-SignedHeaders".to_owned(), "host".to_owned());
        if let Some(token) = &self.credentials.session_token {
            query.insert("X-Amz-Security-Token".to_owned(), token.clone());
        }

        // Header-less delivery can only rely on the host header.
        let headers = BTreeMap::from([("host".to_owned(), host)]);
        let canonical = canonical_request(&request, &headers, "host");
        let signature = self.signature(&short_date, &amz_date, &scope, &canonical);

        request.query.insert("X-Amz-Signature".to_owned(), signature);
        Ok(request)
    }
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn require_host(request: &HttpRequest) -> Result<&str, TransportError> {
    request
        .headers
        .get("host")
        .map(String::as_str)
        .ok_or_else(|| TransportError::Signing("request has no host header".to_owned()))
}

fn format_dates(now: DateTime<Utc>) -> (String, String) {
    (
        now.format("%Y%m%dT%H%M%SZ").to_string(),
        now.format("%Y%m%d").to_string(),
    )
}

/// Lowercased, trimmed headers eligible for signing.
fn canonical_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_owned()))
        .filter(|(name, _)| name != AUTHORIZATION_HEADER)
        .collect()
}

fn canonical_request(
    request: &HttpRequest,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
) -> String {
    let payload_hash = request
        .headers
        .get(CONTENT_SHA256_HEADER)
        .cloned()
        .unwrap_or_else(|| content_hash(&request.body));

    let canonical_query = request
        .query
        .iter()
        .filter(|(name, _)| name.as_str() != "X-Amz-Signature")
        .map(|(name, value)| format!("{}={}", uri_encode(name, true), uri_encode(value, true)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n{}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers}\n{payload_hash}",
        request.method,
        uri_encode(&request.path, false),
    )
}

/// Percent-encode everything except RFC 3986 unreserved characters. `/` is kept unless
/// `encode_slash` is set.
pub(crate) fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
