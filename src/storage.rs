use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use tokio::fs;

/// Object store holding cover images and avatars, addressed by `folder/name` keys.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    fn public_url(&self, key: &str) -> String;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    endpoint: String,
}

impl Storage {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

/// Filesystem store rooted at the upload directory, served under `/static/images`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base: String,
}

impl LocalStorage {
    pub fn new(root: PathBuf, public_url: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self {
            root,
            public_base: format!("{}/static/images", public_url.trim_end_matches('/')),
        })
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        anyhow::ensure!(safe, "invalid object key {key:?}");
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.context("create folder")?;
        }
        fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        fs::remove_file(&path)
            .await
            .with_context(|| format!("remove {}", path.display()))?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    /// In-memory object store.
    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        pub(crate) objects: Mutex<HashMap<String, Bytes>>,
    }

    impl MemoryStorage {
        pub(crate) fn keys(&self) -> Vec<String> {
            let mut keys: Vec<_> = self.objects.lock().keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl StorageClient for MemoryStorage {
        async fn put_object(&self, key: &str, body: Bytes, _ct: &str) -> anyhow::Result<()> {
            self.objects.lock().insert(key.to_string(), body);
            Ok(())
        }
        async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
            self.objects
                .lock()
                .remove(key)
                .map(|_| ())
                .with_context(|| format!("no object {key}"))
        }
        fn public_url(&self, key: &str) -> String {
            format!("https://fake.local/{}", key)
        }
    }

    #[tokio::test]
    async fn local_storage_write_and_delete() {
        let root = std::env::temp_dir().join(format!("smilecook-{}", uuid::Uuid::new_v4()));
        let storage = LocalStorage::new(root.clone(), "http://localhost:8080/").unwrap();

        storage
            .put_object("covers/a.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(std::fs::read(root.join("covers/a.jpg")).unwrap(), b"jpeg");
        assert_eq!(
            storage.public_url("covers/a.jpg"),
            "http://localhost:8080/static/images/covers/a.jpg"
        );

        storage.delete_object("covers/a.jpg").await.unwrap();
        assert!(!root.join("covers/a.jpg").exists());
        assert!(storage.delete_object("covers/a.jpg").await.is_err());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn local_storage_rejects_escaping_keys() {
        let root = std::env::temp_dir().join(format!("smilecook-{}", uuid::Uuid::new_v4()));
        let storage = LocalStorage::new(root.clone(), "http://localhost").unwrap();
        assert!(storage.delete_object("../etc/passwd").await.is_err());
        assert!(storage.put_object("/abs", Bytes::new(), "x").await.is_err());
        std::fs::remove_dir_all(root).ok();
    }
}
