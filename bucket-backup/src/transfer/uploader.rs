//! Remote uploader: sends one local file to one object key.
//!
//! The sync engine only depends on [`RemoteUploader`]. The production
//! implementation targets any `object_store` backend (S3 in practice).

use crate::config::Settings;
use crate::utils::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Files up to this size are sent with a single PUT; larger ones are streamed
/// as a multipart upload with parts of this size.
pub const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

/// Uploads in flight per multipart upload.
const MULTIPART_CONCURRENCY: usize = 2;

#[async_trait]
pub trait RemoteUploader: Send + Sync {
    /// Upload `local_path` as `object_key` in the bound bucket.
    /// Returns the number of bytes sent.
    async fn upload(&self, local_path: &Path, object_key: &str) -> Result<u64, UploadError>;
}

/// Uploader backed by an `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreUploader {
    store: Arc<dyn ObjectStore>,
    part_size: usize,
}

impl ObjectStoreUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            part_size: MULTIPART_PART_SIZE,
        }
    }

    /// Override the single-PUT threshold and multipart part size.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Build an S3 uploader from validated settings.
    pub fn s3(settings: &Settings) -> Result<Self, UploadError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_access_key)
            .with_region(&settings.region);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        Ok(Self::new(Arc::new(builder.build()?)))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    async fn put_multipart(
        &self,
        file: &mut tokio::fs::File,
        location: &ObjectPath,
    ) -> Result<u64, UploadError> {
        let upload = self.store.put_multipart(location).await?;
        send_parts(upload, file, self.part_size).await
    }
}

/// Stream `reader` into `upload` in parts of `part_size` bytes and complete it.
///
/// On any failure the upload is aborted so no incomplete multipart upload is
/// left in the bucket. The original error is returned even if the abort fails.
async fn send_parts<R>(
    mut upload: Box<dyn MultipartUpload>,
    reader: &mut R,
    part_size: usize,
) -> Result<u64, UploadError>
where
    R: AsyncRead + Unpin,
{
    let mut tasks = JoinSet::new();
    let result = write_parts(&mut upload, &mut tasks, reader, part_size).await;

    match result {
        Ok(sent) => Ok(sent),
        Err(e) => {
            tasks.shutdown().await;
            if let Err(abort_err) = upload.abort().await {
                warn!("Failed to abort multipart upload: {}", abort_err);
            }
            Err(e)
        }
    }
}

async fn write_parts<R>(
    upload: &mut Box<dyn MultipartUpload>,
    tasks: &mut JoinSet<object_store::Result<()>>,
    reader: &mut R,
    part_size: usize,
) -> Result<u64, UploadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; part_size];
    let mut sent = 0u64;

    loop {
        let n = fill_part(reader, &mut buf).await?;
        if n == 0 {
            break;
        }

        while tasks.len() >= MULTIPART_CONCURRENCY {
            if let Some(joined) = tasks.join_next().await {
                joined??;
            }
        }

        let part = PutPayload::from(Bytes::copy_from_slice(&buf[..n]));
        tasks.spawn(upload.put_part(part));
        sent += n as u64;

        if n < part_size {
            break;
        }
    }

    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    upload.complete().await?;
    Ok(sent)
}

/// Read until `buf` is full or the reader is exhausted. Every part except the
/// last must have the full part size.
async fn fill_part<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[async_trait]
impl RemoteUploader for ObjectStoreUploader {
    async fn upload(&self, local_path: &Path, object_key: &str) -> Result<u64, UploadError> {
        // Stored under the key verbatim; names object_store cannot hold are errors.
        let location = ObjectPath::parse(object_key)?;
        let mut file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();

        if size as usize <= self.part_size {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await?;
            let sent = data.len() as u64;
            self.store
                .put(&location, PutPayload::from(Bytes::from(data)))
                .await?;
            debug!("Uploaded {} ({} bytes, single put)", location, sent);
            Ok(sent)
        } else {
            let sent = self.put_multipart(&mut file, &location).await?;
            debug!("Uploaded {} ({} bytes, multipart)", location, sent);
            Ok(sent)
        }
    }
}
