use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{join_url, ObjectInfo, ObjectStore, ObjectStoreError, LIST_PAGE_SIZE};

const API_BASE: &str = "https://storage.googleapis.com/storage/v1/b";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";

/// Google Cloud Storage object store backend.
pub struct GcsStore {
    bucket: String,
    client: Client,
    access_token: tokio::sync::RwLock<CachedToken>,
    credentials_file: Option<String>,
    public_base_url: String,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItem {
    name: String,
    time_created: Option<DateTime<Utc>>,
}

impl GcsStore {
    pub async fn new(
        bucket: &str,
        credentials_file: Option<&str>,
        public_base_url: &str,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let store = Self {
            bucket: bucket.to_string(),
            client,
            access_token: tokio::sync::RwLock::new(CachedToken {
                value: String::new(),
                expires_at: Utc::now(),
            }),
            credentials_file: credentials_file.map(|s| s.to_string()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        };

        store.refresh_token().await?;
        Ok(store)
    }

    /// Current access token, refreshed a minute before it expires.
    async fn bearer_token(&self) -> Result<String, ObjectStoreError> {
        {
            let cached = self.access_token.read().await;
            if cached.expires_at - Duration::seconds(60) > Utc::now() {
                return Ok(cached.value.clone());
            }
        }
        self.refresh_token()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("GCS auth failed: {e}")))
    }

    async fn refresh_token(&self) -> Result<String, anyhow::Error> {
        let resp = if let Some(ref creds_path) = self.credentials_file {
            self.token_from_service_account(creds_path).await?
        } else {
            self.token_from_metadata_server().await?
        };

        let mut lock = self.access_token.write().await;
        *lock = CachedToken {
            value: resp.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(resp.expires_in),
        };
        tracing::debug!(expires_in = resp.expires_in, "Refreshed GCS access token");
        Ok(resp.access_token)
    }

    async fn token_from_service_account(&self, path: &str) -> Result<TokenResponse, anyhow::Error> {
        let key_json = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey = serde_json::from_str(&key_json)?;

        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        // header.claims.signature
        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    async fn token_from_metadata_server(&self) -> Result<TokenResponse, anyhow::Error> {
        let resp = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    fn bucket_url(&self, base: &str) -> Result<Url, ObjectStoreError> {
        let mut url = Url::parse(base).map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Backend(format!("cannot extend URL {base}")))?
            .push(&self.bucket)
            .push("o");
        Ok(url)
    }

    /// `.../b/{bucket}/o/{key}` with the key encoded as a single path segment.
    fn object_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url = self.bucket_url(API_BASE)?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Backend("cannot extend object URL".to_string()))?
            .push(key);
        Ok(url)
    }

    fn upload_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url = self.bucket_url(UPLOAD_BASE)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key)
            // Only succeed if no live object exists under this name.
            .append_pair("ifGenerationMatch", "0");
        Ok(url)
    }
}

async fn backend_failure(action: &str, resp: reqwest::Response) -> ObjectStoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ObjectStoreError::Backend(format!("GCS {action} failed ({status}): {body}"))
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let token = self.bearer_token().await?;

        let resp = self
            .client
            .post(self.upload_url(key)?)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Err(ObjectStoreError::AlreadyExists(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(backend_failure("upload", resp).await);
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let token = self.bearer_token().await?;
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(backend_failure("download", resp).await);
        }

        resp.bytes()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let token = self.bearer_token().await?;

        let resp = self
            .client
            .delete(self.object_url(key)?)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(backend_failure("delete", resp).await);
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let token = self.bearer_token().await?;

        let resp = self
            .client
            .get(self.object_url(key)?)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(backend_failure("metadata lookup", resp).await),
        }
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let token = self.bearer_token().await?;
        let limit = limit.min(LIST_PAGE_SIZE);

        let mut url = self.bucket_url(API_BASE)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &limit.to_string());
            if let Some(prefix) = prefix {
                query.append_pair("prefix", prefix);
            }
        }

        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(backend_failure("list", resp).await);
        }

        let listing: ListResponse = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        Ok(listing
            .items
            .into_iter()
            .take(limit)
            .map(|item| ObjectInfo {
                public_url: self.public_url(&item.name),
                name: item.name,
                created_at: item.time_created,
            })
            .collect())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // PEM body -> DER
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &der_b64)?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
