//! AWS Signature Version 4 for S3 requests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ring::{digest, hmac};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex SHA-256 of an empty body.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// The parts of an HTTP request that are covered by the signature.
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already percent-encoded path, signed as-is (S3 does not double-encode).
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    /// Lowercase header names; must include `host` and `x-amz-date`.
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn canonical_query(&self) -> String {
        let mut pairs: Vec<(String, String)> = self
            .query
            .iter()
            .map(|(k, v)| {
                (
                    urlencoding::encode(k).into_owned(),
                    urlencoding::encode(v).into_owned(),
                )
            })
            .collect();
        pairs.sort();
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn to_canonical_string(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.canonical_query(),
            headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// Static-credential request signer bound to one region and service.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: &'static str,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(access_key: &str, secret_key: &str, region: &str) -> Self {
        Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            region: region.to_string(),
            service: "s3",
        }
    }

    /// Compute the `Authorization` header value for `request`.
    pub fn authorization(&self, request: &CanonicalRequest<'_>, now: DateTime<Utc>) -> String {
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{scope}\n{}",
            amz_date(now),
            sha256_hex(request.to_canonical_string().as_bytes())
        );

        let signing_key = self.signing_key(&date);
        let signature = hex::encode(hmac::sign(&signing_key, string_to_sign.as_bytes()));

        format!(
            "{ALGORITHM} Credential={}/{scope},SignedHeaders={},Signature={signature}",
            self.access_key,
            request.signed_headers()
        )
    }

    fn signing_key(&self, date: &str) -> hmac::Key {
        let secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(k_date.as_ref(), self.region.as_bytes());
        let k_service = hmac_sha256(k_region.as_ref(), self.service.as_bytes());
        let k_signing = hmac_sha256(k_service.as_ref(), b"aws4_request");
        hmac::Key::new(hmac::HMAC_SHA256, k_signing.as_ref())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, key), data)
}

/// `x-amz-date` timestamp format.
pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}
