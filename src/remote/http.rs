use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use uuid::Uuid;

use super::{AssetMetadata, Partition, ProgressCallback, RemoteAssetStore, RemoteStoreError};

/// Credentials for the asset backend
#[derive(Debug, Clone)]
pub struct RemoteCredentials {
    pub username: String,
    pub password: String,
}

/// Bytes per streamed upload chunk; progress is reported at this granularity
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// HTTP implementation of the remote asset store.
///
/// Assets live under `zones/{zone}/assets/{id}`; metadata travels as
/// request headers alongside the streamed body.
pub struct HttpAssetStore {
    client: Client,
    base_url: String,
    credentials: RemoteCredentials,
}

impl HttpAssetStore {
    pub fn new(base_url: String, credentials: RemoteCredentials) -> Result<Self, RemoteStoreError> {
        // Normalize URL - ensure no trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteStoreError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn asset_url(&self, partition: &Partition, asset_id: &str) -> String {
        format!(
            "{}/zones/{}/assets/{}",
            self.base_url,
            partition.zone_segment(),
            asset_id
        )
    }

    /// Probe the backend; any HTTP response counts as reachable
    pub async fn test_connection(&self) -> Result<bool, RemoteStoreError> {
        let response = self
            .client
            .head(&self.base_url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(classify_transport)?;
        Ok(!matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ))
    }
}

/// Fold connection-level reqwest failures into the explicit network-error
/// variant so callers can route them to the retry path.
fn classify_transport(e: reqwest::Error) -> RemoteStoreError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RemoteStoreError::Network(e.to_string())
    } else {
        RemoteStoreError::Http(e)
    }
}

#[async_trait::async_trait]
impl RemoteAssetStore for HttpAssetStore {
    async fn create_asset(
        &self,
        bytes: Bytes,
        metadata: &AssetMetadata,
        partition: &Partition,
        progress: ProgressCallback,
    ) -> Result<String, RemoteStoreError> {
        let asset_id = Uuid::new_v4().to_string();
        let url = self.asset_url(partition, &asset_id);
        let total = bytes.len() as u64;

        progress(0, total);

        // Chunked body so progress is observable during large payloads
        let transferred = Arc::new(AtomicU64::new(0));
        let chunks: Vec<Bytes> = bytes
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(Bytes::copy_from_slice)
            .collect();
        let stream = futures_util::stream::iter(chunks.into_iter().map({
            let transferred = Arc::clone(&transferred);
            let progress = Arc::clone(&progress);
            move |chunk| {
                let sent =
                    transferred.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
                progress(sent, total);
                Ok::<Bytes, std::io::Error>(chunk)
            }
        }));

        let mut request = self
            .client
            .put(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header("Content-Length", total)
            .header("X-Asset-Owner", metadata.owner_record_id.to_string())
            .header("X-Asset-Kind", metadata.kind.as_str())
            .header("X-Asset-Size", metadata.byte_size)
            .header("X-Asset-Checksum", &metadata.checksum)
            .body(reqwest::Body::wrap_stream(stream));

        if let Some(filename) = &metadata.original_filename {
            request = request.header("X-Asset-Filename", filename);
        }

        let response = request.send().await.map_err(classify_transport)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::OK => Ok(asset_id),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteStoreError::AuthFailed),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(RemoteStoreError::Conflict),
            StatusCode::PAYLOAD_TOO_LARGE | StatusCode::INSUFFICIENT_STORAGE => {
                Err(RemoteStoreError::QuotaExceeded)
            }
            status => Err(RemoteStoreError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn fetch_asset(
        &self,
        asset_id: &str,
        partition: &Partition,
    ) -> Result<Bytes, RemoteStoreError> {
        let url = self.asset_url(partition, asset_id);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(classify_transport)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RemoteStoreError::AuthFailed);
            }
            StatusCode::NOT_FOUND => {
                return Err(RemoteStoreError::NotFound(asset_id.to_string()));
            }
            status if !status.is_success() => {
                return Err(RemoteStoreError::Server {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
            _ => {}
        }

        Ok(response.bytes().await.map_err(classify_transport)?)
    }

    async fn delete_asset(
        &self,
        asset_id: &str,
        partition: &Partition,
    ) -> Result<(), RemoteStoreError> {
        let url = self.asset_url(partition, asset_id);

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(classify_transport)?;

        match response.status() {
            // Deleting an already-deleted asset is fine
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteStoreError::AuthFailed),
            status => Err(RemoteStoreError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobKind;

    fn credentials() -> RemoteCredentials {
        RemoteCredentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    #[test]
    fn test_new_rejects_non_http_url() {
        let err = HttpAssetStore::new("ftp://example.com".to_string(), credentials()).unwrap_err();
        assert!(matches!(err, RemoteStoreError::InvalidUrl(_)));
    }

    #[test]
    fn test_asset_url_layout() {
        let store =
            HttpAssetStore::new("https://assets.example.com/".to_string(), credentials()).unwrap();
        assert_eq!(
            store.asset_url(&Partition::Private, "abc"),
            "https://assets.example.com/zones/private/assets/abc"
        );
        let shared = Partition::Shared { zone: "family-1".to_string() };
        assert_eq!(
            store.asset_url(&shared, "abc"),
            "https://assets.example.com/zones/family-1/assets/abc"
        );
    }

    #[test]
    fn test_metadata_kind_header_value() {
        assert_eq!(BlobKind::Photo.as_str(), "photo");
        assert_eq!(BlobKind::Thumbnail.as_str(), "thumbnail");
    }
}
