//! Backups kept under a key prefix of an S3 bucket.

use std::io::Write;
use std::path::Path;

use aws_sdk_s3 as s3;
use s3::config::{Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tokio::runtime::Runtime;

use super::{file_key, ProviderError, RemoteEntry, StorageProvider};
use crate::config::S3Config;

/// Stores artifacts in an S3 bucket.
///
/// Requests run on a private single threaded runtime, so the provider
/// blocks like the other providers do.
pub struct S3Provider {
    runtime: Runtime,
    client: s3::Client,
    bucket: String,
    region: String,
    prefix: String,
    bucket_checked: bool,
}

fn transport(context: &str, e: impl std::error::Error) -> ProviderError {
    ProviderError::Transport(format!("{context}: {}", DisplayErrorContext(e)))
}

/// Key of `object_key` relative to `prefix`. The bare prefix and objects in
/// nested "directories" are not artifacts.
fn listed_key<'a>(prefix: &str, object_key: &'a str) -> Option<&'a str> {
    object_key
        .strip_prefix(prefix)
        .filter(|key| !key.is_empty() && !key.contains('/'))
}

impl S3Provider {
    pub fn new(config: &S3Config, remote_dir: &str) -> Result<Self, ProviderError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "backup_fu",
            ));
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = runtime.block_on(loader.load());

        let prefix = remote_dir.trim_matches('/');
        Ok(Self {
            runtime,
            client: s3::Client::new(&sdk_config),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            },
            bucket_checked: false,
        })
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn ensure_bucket(&mut self) -> Result<(), ProviderError> {
        if self.bucket_checked {
            return Ok(());
        }

        let head = self
            .runtime
            .block_on(self.client.head_bucket().bucket(&self.bucket).send());
        if let Err(e) = head {
            let service_error = e.into_service_error();
            if !service_error.is_not_found() {
                return Err(transport("checking bucket", service_error));
            }

            log::info!(target: "provider::s3", "Create bucket {}", self.bucket);
            let mut create = self.client.create_bucket().bucket(&self.bucket);
            // us-east-1 rejects an explicit location constraint
            if self.region != "us-east-1" {
                create = create.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                        .build(),
                );
            }
            self.runtime
                .block_on(create.send())
                .map_err(|e| transport("creating bucket", e))?;
        }

        self.bucket_checked = true;
        Ok(())
    }
}

impl StorageProvider for S3Provider {
    fn put(&mut self, local_path: &Path) -> Result<(), ProviderError> {
        self.ensure_bucket()?;
        let key = self.object_key(&file_key(local_path)?);
        log::info!(target: "provider::s3", "Upload {} to s3://{}/{key}", local_path.display(), self.bucket);

        self.runtime.block_on(async {
            let body = ByteStream::from_path(local_path)
                .await
                .map_err(|e| transport("reading upload", e))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .send()
                .await
                .map_err(|e| transport("uploading", e))?;
            Ok::<(), ProviderError>(())
        })
    }

    fn get(&mut self, key: &str, writer: &mut dyn Write) -> Result<(), ProviderError> {
        let object_key = self.object_key(key);
        log::debug!(target: "provider::s3", "Fetch s3://{}/{object_key}", self.bucket);

        self.runtime.block_on(async {
            let mut object = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
                .map_err(|e| {
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_key() {
                        ProviderError::NotFound(key.to_string())
                    } else {
                        transport("downloading", service_error)
                    }
                })?;

            while let Some(chunk) = object
                .body
                .try_next()
                .await
                .map_err(|e| transport("downloading", e))?
            {
                writer.write_all(&chunk)?;
            }
            Ok::<(), ProviderError>(())
        })
    }

    fn list(&mut self) -> Result<Vec<RemoteEntry>, ProviderError> {
        let mut entries = Vec::new();
        let mut continuation_token = None;

        loop {
            let page = self
                .runtime
                .block_on(
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(&self.prefix)
                        .set_continuation_token(continuation_token.take())
                        .send(),
                )
                .map_err(|e| transport("listing", e))?;

            for object in page.contents() {
                let Some(key) = object.key().and_then(|k| listed_key(&self.prefix, k)) else {
                    continue;
                };
                let size = object.size().and_then(|size| u64::try_from(size).ok());
                entries.push(RemoteEntry::new(key, size));
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }
        entries.sort();

        Ok(entries)
    }

    fn delete(&mut self, key: &str) -> Result<(), ProviderError> {
        let object_key = self.object_key(key);
        self.runtime
            .block_on(
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&object_key)
                    .send(),
            )
            .map_err(|e| transport("deleting", e))?;
        log::debug!(target: "provider::s3", "Deleted s3://{}/{object_key}", self.bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "acme-backups".to_string(),
            region: "eu-central-1".to_string(),
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint_url: Some("http://127.0.0.1:9".to_string()),
        }
    }

    #[test]
    fn keys_are_placed_below_the_prefix() {
        let provider = S3Provider::new(&config(), "/backups/").unwrap();
        assert_eq!(
            provider.object_key("acme_2024-01-01_100_db.tar.gz"),
            "backups/acme_2024-01-01_100_db.tar.gz"
        );

        let provider = S3Provider::new(&config(), "").unwrap();
        assert_eq!(provider.object_key("a.zip"), "a.zip");
    }

    #[test]
    fn listing_strips_the_prefix_and_skips_nested_keys() {
        let prefix = "backups/";
        assert_eq!(
            listed_key(prefix, "backups/acme_x.tar.gz"),
            Some("acme_x.tar.gz")
        );
        assert_eq!(listed_key(prefix, "backups/"), None);
        assert_eq!(listed_key(prefix, "backups/sub/x"), None);
        assert_eq!(listed_key(prefix, "other/acme_x.tar.gz"), None);

        assert_eq!(listed_key("", "acme_x.tar.gz"), Some("acme_x.tar.gz"));
        assert_eq!(listed_key("", "backups/acme_x.tar.gz"), None);
    }
}
