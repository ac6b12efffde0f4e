use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub const DEFAULT_REMOVE_BG_ENDPOINT: &str = "https://api.remove.bg/v1.0/removebg";

#[derive(Debug, Clone)]
pub struct Config {
    pub background_removal: BackgroundRemovalConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    /// When set, uploads must carry exactly this scope.
    pub allowed_scope: Option<String>,
    /// Enables operator routes (blob listing, scope retirement). Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct BackgroundRemovalConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// Prefix for public blob URLs. Local blobs are served by this process under `/storage`.
    pub public_base_url: String,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to ADC)
    pub gcs_credentials_file: Option<String>,
}

impl Default for BackgroundRemovalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_REMOVE_BG_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            public_base_url: "http://localhost:8080/storage".to_string(),
            gcs_bucket: None,
            gcs_credentials_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source and validate it.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let data_dir = var("DATA_DIR").unwrap_or_else(|| "./data".to_string());

        let api_key = var("REMOVE_BG_API_KEY")
            .map(|k| k.trim().to_string())
            .unwrap_or_default();
        let endpoint =
            var("REMOVE_BG_ENDPOINT").unwrap_or_else(|| DEFAULT_REMOVE_BG_ENDPOINT.to_string());
        let timeout_secs = var("REMOVE_BG_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let test_mode = var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = var("MAX_UPLOAD_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10 * 1024 * 1024); // 10MiB

        let allowed_scope = var("ALLOWED_SCOPE").filter(|s| !s.trim().is_empty());

        let backend = match var("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            _ => StorageBackend::Local,
        };

        let local_storage_path =
            var("LOCAL_STORAGE_PATH").unwrap_or_else(|| "./files".to_string());
        let gcs_bucket = var("GCS_BUCKET").filter(|s| !s.is_empty());
        let gcs_credentials_file = var("GCS_CREDENTIALS_FILE");

        let public_base_url = match (var("PUBLIC_BASE_URL"), &backend, &gcs_bucket) {
            (Some(url), _, _) => url,
            (None, StorageBackend::Gcs, Some(bucket)) => {
                format!("https://storage.googleapis.com/{bucket}")
            }
            _ => StorageConfig::default().public_base_url,
        };

        let config = Config {
            background_removal: BackgroundRemovalConfig {
                api_key,
                endpoint,
                timeout_secs,
            },
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                backend,
                local_storage_path,
                public_base_url: public_base_url.trim_end_matches('/').to_string(),
                gcs_bucket,
                gcs_credentials_file,
            },
            allowed_scope,
            test_mode,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.background_removal.api_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "REMOVE_BG_API_KEY is required".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Gcs && self.storage.gcs_bucket.is_none() {
            return Err(ConfigError::ValidationError(
                "GCS_BUCKET is required when STORAGE_BACKEND=gcs".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.allowed_scope.is_none() {
            tracing::warn!("ALLOWED_SCOPE is not set; uploads are accepted for any scope");
        }

        Ok(())
    }
}
