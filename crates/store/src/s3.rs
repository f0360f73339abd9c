//! S3-compatible object storage backend
//!
//! Objects no larger than one part are sent with a single `PutObject`. Larger
//! files use multipart upload with up to `concurrency` parts in flight, and
//! the upload is aborted if any part fails. Downloads fetch byte ranges in
//! parallel into a temporary file that is renamed into place once complete.
//!
//! After a successful download the object is copied onto itself so bucket
//! lifecycle expiry counts from the last use rather than the first upload.

use crate::atomic;
use crate::validate::validate_key;
use crate::{BlobStore, Error, Result, S3Options, StoreType, TransferInfo};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::RequestId;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective};
use futures::{StreamExt, TryStreamExt};
use std::fmt::Write as _;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// A contiguous byte range of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartRange {
    /// 1-based part number
    number: i32,
    offset: u64,
    length: u64,
}

impl PartRange {
    fn http_range(&self) -> String {
        format!("bytes={}-{}", self.offset, self.offset + self.length - 1)
    }
}

/// Split `size` bytes into parts of at most `part_size` bytes
fn plan_parts(size: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(1);
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let length = part_size.min(size - offset);
        parts.push(PartRange {
            number,
            offset,
            length,
        });
        offset += length;
        number += 1;
    }
    parts
}

/// Blob store backed by an S3 bucket
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    options: S3Options,
}

impl S3Store {
    /// Build a client from the ambient AWS configuration plus `options`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `options` fail validation.
    pub async fn connect(options: S3Options) -> Result<Self> {
        options.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(options.use_path_style);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::debug!(
            bucket = %options.bucket,
            prefix = %options.prefix,
            endpoint = ?options.endpoint,
            "Initialized S3 store"
        );
        Ok(Self::with_client(Client::from_conf(builder.build()), options))
    }

    /// Wrap an existing client
    #[must_use]
    pub const fn with_client(client: Client, options: S3Options) -> Self {
        Self { client, options }
    }

    fn object_key(&self, key: &str) -> String {
        prefixed_key(&self.options.prefix, key)
    }

    fn sdk_error(err: impl std::error::Error) -> Error {
        Error::transfer(StoreType::S3, DisplayErrorContext(err).to_string())
    }

    async fn put_single(&self, source: &Path, object_key: &str) -> Result<String> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::io(std::io::Error::other(e), source, "open"))?;
        let output = self
            .client
            .put_object()
            .bucket(&self.options.bucket)
            .key(object_key)
            .body(body)
            .send()
            .await
            .map_err(Self::sdk_error)?;
        Ok(output.request_id().unwrap_or_default().to_string())
    }

    async fn put_multipart(
        &self,
        source: &Path,
        object_key: &str,
        parts: Vec<PartRange>,
    ) -> Result<String> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.options.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(Self::sdk_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::transfer(StoreType::S3, "CreateMultipartUpload returned no upload id"))?
            .to_string();

        match self
            .upload_parts(source, object_key, &upload_id, parts)
            .await
        {
            Ok(completed) => {
                let output = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&self.options.bucket)
                    .key(object_key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(completed))
                            .build(),
                    )
                    .send()
                    .await;
                match output {
                    Ok(output) => Ok(output.request_id().unwrap_or_default().to_string()),
                    Err(e) => {
                        self.abort(object_key, &upload_id).await;
                        Err(Self::sdk_error(e))
                    }
                }
            }
            Err(e) => {
                self.abort(object_key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        source: &Path,
        object_key: &str,
        upload_id: &str,
        parts: Vec<PartRange>,
    ) -> Result<Vec<CompletedPart>> {
        let mut completed: Vec<CompletedPart> = futures::stream::iter(parts)
            .map(|part| async move {
                let body = ByteStream::read_from()
                    .path(source)
                    .offset(part.offset)
                    .length(Length::Exact(part.length))
                    .build()
                    .await
                    .map_err(|e| Error::io(std::io::Error::other(e), source, "read part"))?;
                let output = self
                    .client
                    .upload_part()
                    .bucket(&self.options.bucket)
                    .key(object_key)
                    .upload_id(upload_id)
                    .part_number(part.number)
                    .body(body)
                    .send()
                    .await
                    .map_err(Self::sdk_error)?;
                tracing::trace!(part = part.number, bytes = part.length, "Uploaded part");
                Ok::<_, Error>(
                    CompletedPart::builder()
                        .part_number(part.number)
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .build(),
                )
            })
            .buffer_unordered(self.options.effective_concurrency())
            .try_collect()
            .await?;
        completed.sort_by_key(|p| p.part_number());
        Ok(completed)
    }

    async fn abort(&self, object_key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.options.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = object_key,
                upload_id,
                error = %DisplayErrorContext(e),
                "Failed to abort multipart upload"
            );
        }
    }

    async fn fetch_range(&self, object_key: &str, part: PartRange, temp: &Path) -> Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(&self.options.bucket)
            .key(object_key)
            .range(part.http_range())
            .send()
            .await
            .map_err(Self::sdk_error)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(temp)
            .await
            .map_err(|e| Error::io(e, temp, "open"))?;
        file.seek(SeekFrom::Start(part.offset))
            .await
            .map_err(|e| Error::io(e, temp, "seek"))?;

        let mut body = output.body;
        let mut received = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| Error::transfer(StoreType::S3, e.to_string()))?
        {
            received += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(e, temp, "write"))?;
        }
        file.flush().await.map_err(|e| Error::io(e, temp, "flush"))?;

        if received != part.length {
            return Err(Error::transfer(
                StoreType::S3,
                format!(
                    "part {} returned {received} bytes, expected {}",
                    part.number, part.length
                ),
            ));
        }
        Ok(())
    }

    /// Copy the object onto itself to reset its lifecycle age
    async fn refresh_expiry(&self, object_key: &str) {
        let source = format!(
            "{}/{}",
            self.options.bucket,
            encode_copy_source(object_key)
        );
        if let Err(e) = self
            .client
            .copy_object()
            .bucket(&self.options.bucket)
            .key(object_key)
            .copy_source(source)
            .metadata_directive(MetadataDirective::Replace)
            .send()
            .await
        {
            tracing::warn!(key = object_key, error = %DisplayErrorContext(e), "Failed to refresh object expiry");
        }
    }
}

#[async_trait]
impl BlobStore for S3Store {
    fn store_type(&self) -> StoreType {
        StoreType::S3
    }

    async fn upload(&self, source: &Path, key: &str) -> Result<TransferInfo> {
        validate_key(key)?;
        let object_key = self.object_key(key);
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::io(e, source, "stat"))?
            .len();

        let part_size = self.options.part_size_bytes();
        let concurrency = self.options.effective_concurrency();
        let start = Instant::now();

        let (request_id, part_count) = if size <= part_size {
            (self.put_single(source, &object_key).await?, 1)
        } else {
            let parts = plan_parts(size, part_size);
            let count = parts.len();
            (self.put_multipart(source, &object_key, parts).await?, count)
        };

        tracing::debug!(
            key = %object_key,
            bytes = size,
            parts = part_count,
            "Uploaded object to S3"
        );
        Ok(TransferInfo::new(size, start.elapsed())
            .with_request_id(request_id)
            .with_parts(part_count, concurrency.min(part_count)))
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<TransferInfo> {
        validate_key(key)?;
        let object_key = self.object_key(key);
        let start = Instant::now();

        let head = self
            .client
            .head_object()
            .bucket(&self.options.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_not_found()) {
                    Error::NotFound {
                        backend: StoreType::S3,
                        key: key.to_string(),
                    }
                } else {
                    Self::sdk_error(e)
                }
            })?;
        let size = u64::try_from(head.content_length().unwrap_or(0)).unwrap_or(0);
        let request_id = head.request_id().unwrap_or_default().to_string();

        let temp = atomic::temp_file_for(dest)?;
        temp.as_file()
            .set_len(size)
            .map_err(|e| Error::io(e, temp.path(), "allocate"))?;

        let parts = plan_parts(size, self.options.part_size_bytes());
        let part_count = parts.len().max(1);
        let concurrency = self.options.effective_concurrency();
        let temp_path = temp.path().to_path_buf();
        let object_key_ref = object_key.as_str();
        let temp_ref = temp_path.as_path();

        futures::stream::iter(parts)
            .map(|part| self.fetch_range(object_key_ref, part, temp_ref))
            .buffer_unordered(concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        temp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, &temp_path, "sync"))?;
        atomic::replace(temp.into_temp_path(), dest)?;

        self.refresh_expiry(&object_key).await;

        tracing::debug!(key = %object_key, bytes = size, parts = part_count, "Downloaded object from S3");
        Ok(TransferInfo::new(size, start.elapsed())
            .with_request_id(request_id)
            .with_parts(part_count, concurrency.min(part_count)))
    }
}

fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

/// Percent-encode a key for the `x-amz-copy-source` header, keeping `/`
fn encode_copy_source(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~' | b'/') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
