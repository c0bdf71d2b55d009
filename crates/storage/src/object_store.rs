use crate::backend::ObjectStoreBackend;
use crate::error::Result;
use config::{BackendKind, S3Config, StorageConfig};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ClientOptions;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Create an S3-compatible object store from configuration
///
/// Parameters:
/// - config: S3 configuration containing endpoint, bucket, credentials, etc.
///
/// Returns:
/// - Arc-wrapped ObjectStore configured according to the S3Config
pub fn create_object_store(config: &S3Config) -> Result<Arc<dyn ObjectStore>> {
    let client_options = ClientOptions::new()
        .with_pool_max_idle_per_host(config.pool_max_idle_per_host)
        .with_pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs));

    let mut builder = if config.use_env_credentials {
        info!("Using AWS environment credential chain");
        let mut builder = AmazonS3Builder::from_env();
        // AWS picks its regional endpoint unless one is given
        if !config.endpoint.is_empty() {
            builder = builder.with_endpoint(&config.endpoint);
        }
        builder
    } else {
        AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
    };

    builder = builder
        .with_bucket_name(&config.bucket)
        .with_region(&config.region)
        .with_client_options(client_options);

    if config.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(token) = &config.session_token {
        builder = builder.with_token(token);
    }

    let s3_store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
    Ok(s3_store)
}

/// Create the block backend selected by the storage configuration
pub fn create_backend(config: &StorageConfig) -> Result<ObjectStoreBackend> {
    match config.backend {
        BackendKind::Local => {
            std::fs::create_dir_all(&config.local.path)?;
            let store = LocalFileSystem::new_with_prefix(&config.local.path)?;
            info!(path = %config.local.path, "Using local block backend");
            Ok(ObjectStoreBackend::new(Arc::new(store), ""))
        }
        BackendKind::Memory => {
            info!("Using in-memory block backend");
            Ok(ObjectStoreBackend::new(Arc::new(InMemory::new()), ""))
        }
        BackendKind::S3 => {
            let store = create_object_store(&config.s3)?;
            info!(bucket = %config.s3.bucket, prefix = %config.s3.prefix, "Using S3 block backend");
            Ok(ObjectStoreBackend::new(store, &config.s3.prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::LocalConfig;

    #[test]
    fn test_create_object_store_with_explicit_credentials() {
        let config = S3Config {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "test-bucket".to_string(),
            prefix: "test-prefix".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
            session_token: None,
            allow_http: true,
            use_env_credentials: false,
            pool_max_idle_per_host: 30,
            pool_idle_timeout_secs: 120,
        };

        assert!(create_object_store(&config).is_ok());
    }

    #[test]
    fn test_create_local_backend_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blocks");
        let config = StorageConfig {
            backend: BackendKind::Local,
            local: LocalConfig {
                path: root.to_string_lossy().to_string(),
            },
            s3: S3Config::default(),
        };

        assert!(create_backend(&config).is_ok());
        assert!(root.is_dir());
    }

    #[test]
    fn test_create_memory_backend() {
        let config = StorageConfig {
            backend: BackendKind::Memory,
            local: LocalConfig::default(),
            s3: S3Config::default(),
        };
        assert!(create_backend(&config).is_ok());
    }
}
