use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::sigv4::{self, CanonicalRequest, Signer};
use super::{
    encode_key, key_from_path, validate_key, DeleteOutcome, ObjectMeta, ObjectStore,
    ObjectStoreError,
};

/// Upper bound on keys per `DeleteObjects` request.
const MAX_KEYS_PER_BATCH: usize = 1000;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// `DeleteObjects` request body.
#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
struct DeleteRequest<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Quiet")]
    quiet: bool,
    #[serde(rename = "Object")]
    objects: Vec<ObjectIdentifier<'a>>,
}

#[derive(Debug, Serialize)]
struct ObjectIdentifier<'a> {
    #[serde(rename = "Key")]
    key: &'a str,
}

/// `DeleteObjects` response body. Entries keep document order.
#[derive(Debug, Deserialize)]
struct DeleteResult {
    #[serde(rename = "$value", default)]
    entries: Vec<DeleteResultEntry>,
}

#[derive(Debug, Deserialize)]
enum DeleteResultEntry {
    Deleted(DeletedObject),
    Error(DeleteError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeletedObject {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteError {
    key: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl From<DeleteResultEntry> for DeleteOutcome {
    fn from(entry: DeleteResultEntry) -> Self {
        match entry {
            DeleteResultEntry::Deleted(deleted) => DeleteOutcome::Deleted { key: deleted.key },
            DeleteResultEntry::Error(error) => DeleteOutcome::Failed {
                key: error.key,
                code: error.code,
                message: error.message,
            },
        }
    }
}

/// Connection settings for an S3-compatible bucket.
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Custom endpoint (e.g. MinIO). Defaults to the regional AWS endpoint.
    pub endpoint: Option<String>,
    /// Address objects as `{endpoint}/{bucket}/{key}` instead of `{bucket}.{host}/{key}`.
    pub path_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

/// S3-compatible object store backend over the REST API.
pub struct S3Store {
    bucket: String,
    client: Client,
    signer: Signer,
    /// Bucket root, target of batch requests.
    bucket_url: Url,
    /// Everything that precedes the encoded key in an object URL.
    object_prefix: String,
    path_style: bool,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self, ObjectStoreError> {
        if config.bucket.is_empty() {
            return Err(ObjectStoreError::Config("bucket is empty".to_string()));
        }
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(ObjectStoreError::Config(
                "access key and secret key are required".to_string(),
            ));
        }
        if config.region.is_empty()
            || !config
                .region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ObjectStoreError::Config(format!(
                "invalid region `{}`",
                config.region
            )));
        }

        let object_prefix = match config.endpoint.as_deref() {
            Some(endpoint) => {
                let endpoint = Url::parse(endpoint).map_err(|e| {
                    ObjectStoreError::Config(format!("invalid endpoint `{endpoint}`: {e}"))
                })?;
                let host = endpoint.host_str().ok_or_else(|| {
                    ObjectStoreError::Config(format!("endpoint `{endpoint}` has no host"))
                })?;
                if endpoint.path() != "/" || endpoint.query().is_some() {
                    return Err(ObjectStoreError::Config(format!(
                        "endpoint `{endpoint}` must not carry a path or query"
                    )));
                }
                let authority = match endpoint.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                if config.path_style {
                    format!("{}://{authority}/{}/", endpoint.scheme(), config.bucket)
                } else {
                    format!("{}://{}.{authority}/", endpoint.scheme(), config.bucket)
                }
            }
            None if config.path_style => format!(
                "https://s3.{}.amazonaws.com/{}/",
                config.region, config.bucket
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/",
                config.bucket, config.region
            ),
        };

        let bucket_root = if config.path_style {
            object_prefix.trim_end_matches('/')
        } else {
            object_prefix.as_str()
        };
        let bucket_url = Url::parse(bucket_root)
            .map_err(|e| ObjectStoreError::Config(format!("invalid bucket URL: {e}")))?;

        let client = Client::builder().build()?;

        Ok(Self {
            bucket: config.bucket.clone(),
            client,
            signer: Signer::new(&config.access_key, &config.secret_key, &config.region),
            bucket_url,
            object_prefix,
            path_style: config.path_style,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        validate_key(key)?;
        let raw = format!("{}{}", self.object_prefix, encode_key(key));
        Url::parse(&raw).map_err(|e| ObjectStoreError::InvalidKey(format!("{key}: {e}")))
    }

    /// Sign and send one request. No retries.
    async fn send(
        &self,
        method: Method,
        mut url: Url,
        query: &[(&str, &str)],
        extra_headers: &[(&str, String)],
        body: Bytes,
    ) -> Result<Response, ObjectStoreError> {
        let host = url
            .host_str()
            .ok_or_else(|| ObjectStoreError::Config(format!("URL `{url}` has no host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let now = chrono::Utc::now();
        let payload_hash = if body.is_empty() {
            sigv4::EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            sigv4::sha256_hex(&body)
        };

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), sigv4::amz_date(now));
        for (name, value) in extra_headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        let authorization = self.signer.authorization(
            &CanonicalRequest {
                method: method.as_str(),
                path: url.path(),
                query,
                headers: &headers,
                payload_hash: &payload_hash,
            },
            now,
        );

        if !query.is_empty() {
            let raw_query = query
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        urlencoding::encode(k).into_owned()
                    } else {
                        format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&raw_query));
        }

        debug!(method = %method, url = %url, "S3 request");

        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }

        Ok(request.body(body).send().await?)
    }
}

async fn backend_error(op: &str, resp: Response) -> ObjectStoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ObjectStoreError::Backend(format!("S3 {op} failed ({status}): {body}"))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key)?;
        let size = data.len();
        let resp = self
            .send(
                Method::PUT,
                url,
                &[],
                &[("content-type", content_type.to_string())],
                data,
            )
            .await?;

        if !resp.status().is_success() {
            return Err(backend_error("upload", resp).await);
        }

        debug!(bucket = %self.bucket, key, size, "S3 object stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let url = self.object_url(key)?;
        let resp = self.send(Method::GET, url, &[], &[], Bytes::new()).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(backend_error("download", resp).await);
        }

        Ok(resp.bytes().await?)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, ObjectStoreError> {
        let url = self.object_url(key)?;
        let resp = self.send(Method::HEAD, url, &[], &[], Bytes::new()).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            // HEAD responses carry no body to report.
            return Err(ObjectStoreError::Backend(format!(
                "S3 head failed ({}) for key {key}",
                resp.status()
            )));
        }

        let headers = resp.headers();
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        Ok(Some(ObjectMeta { size, content_type }))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key)?;
        let resp = self
            .send(Method::DELETE, url, &[], &[], Bytes::new())
            .await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(backend_error("delete", resp).await);
        }

        Ok(())
    }

    /// Keys that XML 1.0 cannot carry are deleted one request at a time and
    /// reported after the batched keys.
    async fn delete_many(&self, keys: &[String]) -> Result<Vec<DeleteOutcome>, ObjectStoreError> {
        for key in keys {
            validate_key(key)?;
        }

        let (batched, single): (Vec<&String>, Vec<&String>) =
            keys.iter().partition(|key| is_xml_safe(key));

        let mut outcomes = Vec::with_capacity(keys.len());
        for chunk in batched.chunks(MAX_KEYS_PER_BATCH) {
            let body = delete_request_body(chunk)?;
            let content_md5 = {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(md5::compute(&body).0)
            };

            let resp = self
                .send(
                    Method::POST,
                    self.bucket_url.clone(),
                    &[("delete", "")],
                    &[
                        ("content-md5", content_md5),
                        ("content-type", "application/xml".to_string()),
                    ],
                    Bytes::from(body),
                )
                .await?;

            if !resp.status().is_success() {
                return Err(backend_error("batch delete", resp).await);
            }

            let xml = resp.text().await?;
            outcomes.extend(parse_delete_result(&xml)?);
        }

        for key in single {
            let outcome = match self.delete(key).await {
                Ok(()) => DeleteOutcome::Deleted { key: key.clone() },
                Err(ObjectStoreError::Backend(message)) => DeleteOutcome::Failed {
                    key: key.clone(),
                    code: "DeleteFailed".to_string(),
                    message,
                },
                Err(e) => return Err(e),
            };
            outcomes.push(outcome);
        }

        for outcome in &outcomes {
            if let DeleteOutcome::Failed { key, code, message } = outcome {
                warn!(bucket = %self.bucket, key = %key, code = %code, message = %message, "S3 batch delete entry failed");
            }
        }

        Ok(outcomes)
    }

    fn url_for(&self, key: &str) -> Result<Url, ObjectStoreError> {
        self.object_url(key)
    }

    fn key_from_url(&self, url: &Url) -> Result<String, ObjectStoreError> {
        if !self.path_style {
            return key_from_path(url.path());
        }
        // Compare while both paths are still percent-encoded
        match url.path().strip_prefix(self.bucket_url.path()) {
            Some(rest) if rest.starts_with('/') => key_from_path(rest),
            _ => Err(ObjectStoreError::InvalidReference(format!(
                "URL `{url}` is not inside bucket `{}`",
                self.bucket
            ))),
        }
    }
}

/// Characters allowed in an XML 1.0 document. A lone CR is excluded too,
/// since parsers normalize it to LF.
fn is_xml_safe(key: &str) -> bool {
    key.chars().all(|c| {
        matches!(
            c,
            '\t' | '\n' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
        )
    })
}

fn delete_request_body(keys: &[&String]) -> Result<String, ObjectStoreError> {
    let request = DeleteRequest {
        xmlns: S3_XMLNS,
        quiet: false,
        objects: keys
            .iter()
            .map(|key| ObjectIdentifier { key: key.as_str() })
            .collect(),
    };
    quick_xml::se::to_string(&request).map_err(|e| {
        ObjectStoreError::Backend(format!("failed to encode batch delete request: {e}"))
    })
}

fn parse_delete_result(xml: &str) -> Result<Vec<DeleteOutcome>, ObjectStoreError> {
    let result: DeleteResult = quick_xml::de::from_str(xml).map_err(|e| {
        ObjectStoreError::Backend(format!("malformed batch delete response: {e}"))
    })?;
    Ok(result.entries.into_iter().map(DeleteOutcome::from).collect())
}
