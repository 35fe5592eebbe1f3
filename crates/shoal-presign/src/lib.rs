//! Presigned-URL construction against backend buckets.
//!
//! The gateway never stores object bytes; clients talk to the chosen
//! backend directly with URLs signed here. Upload and download URLs use
//! configurable expiries; delete URLs are deliberately short-lived.
//!
//! Multipart uploads are initiated against the backend and every part URL
//! is presigned up front. Completing and aborting a multipart upload
//! cannot be presigned (they need the part list), so those run as direct
//! backend calls on the client's behalf.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use aws_sdk_s3::presigning::{PresignedRequest, PresigningConfig};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shoal_core::error::{ShoalError, ShoalResult};
use shoal_core::registry::BucketInfo;

/// Default validity of upload URLs.
const DEFAULT_UPLOAD_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Default validity of download URLs.
const DEFAULT_DOWNLOAD_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Delete URLs stay valid only briefly.
const DELETE_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// A presigned upload target.
#[derive(Debug, Clone, Serialize)]
pub struct UploadUrl {
    /// The URL to PUT the object bytes to.
    pub url: String,
    /// HTTP method for the request.
    pub method: String,
    /// Headers the client must send for the signature to verify.
    pub headers: HashMap<String, String>,
    /// When the URL stops working.
    pub expiry: DateTime<Utc>,
    /// The backend bucket the URL points at.
    pub bucket_name: String,
    /// The object key.
    pub key: String,
}

/// A presigned download target.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadUrl {
    /// The URL to GET the object from.
    pub url: String,
    /// HTTP method for the request.
    pub method: String,
    /// When the URL stops working.
    pub expiry: DateTime<Utc>,
    /// The backend bucket the URL points at.
    pub bucket_name: String,
    /// The object key.
    pub key: String,
}

/// A presigned delete target.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteUrl {
    /// The URL to DELETE the object with.
    pub url: String,
    /// HTTP method for the request.
    pub method: String,
    /// When the URL stops working.
    pub expiry: DateTime<Utc>,
    /// The backend bucket the URL points at.
    pub bucket_name: String,
    /// The object key.
    pub key: String,
}

/// The URLs for one initiated multipart upload.
#[derive(Debug, Clone, Serialize)]
pub struct MultipartUploadUrls {
    /// Backend-assigned upload id, needed to complete or abort.
    pub upload_id: String,
    /// Presigned URL per part number, starting at 1.
    pub part_urls: BTreeMap<i32, String>,
    /// The backend bucket the upload targets.
    pub bucket_name: String,
    /// The object key.
    pub key: String,
    /// When the part URLs stop working.
    pub expiry: DateTime<Utc>,
}

/// One finished part, as reported by the uploading client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedPartSpec {
    /// Part number, starting at 1.
    pub part_number: i32,
    /// ETag the backend returned for the part.
    pub etag: String,
}

/// One part of an in-progress multipart upload, as stored on the backend.
#[derive(Debug, Clone, Serialize)]
pub struct PartInfo {
    /// Part number, starting at 1.
    pub part_number: i32,
    /// ETag the backend assigned.
    pub etag: String,
    /// Part size in bytes.
    pub size: u64,
}

/// Builds presigned URLs against backend buckets.
#[derive(Debug, Clone)]
pub struct Presigner {
    upload_expiry: Duration,
    download_expiry: Duration,
}

impl Default for Presigner {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_EXPIRY, DEFAULT_DOWNLOAD_EXPIRY)
    }
}

impl Presigner {
    /// Create a presigner; a zero expiry falls back to the default.
    #[must_use]
    pub fn new(upload_expiry: Duration, download_expiry: Duration) -> Self {
        Self {
            upload_expiry: if upload_expiry.is_zero() {
                DEFAULT_UPLOAD_EXPIRY
            } else {
                upload_expiry
            },
            download_expiry: if download_expiry.is_zero() {
                DEFAULT_DOWNLOAD_EXPIRY
            } else {
                download_expiry
            },
        }
    }

    /// Presign a `PutObject` for `key` on `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::BackendFailure`] when signing fails.
    pub async fn upload_url(
        &self,
        bucket: &BucketInfo,
        key: &str,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> ShoalResult<UploadUrl> {
        let mut request = bucket
            .client()
            .put_object()
            .bucket(bucket.name())
            .key(key);
        if let Some(content_type) = content_type.filter(|c| !c.is_empty()) {
            request = request.content_type(content_type);
        }
        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        let presigned = request
            .presigned(presigning_config(self.upload_expiry)?)
            .await
            .map_err(ShoalError::backend)?;
        debug!(bucket = %bucket.name(), key, "upload URL generated");

        Ok(UploadUrl {
            url: presigned.uri().to_owned(),
            method: presigned.method().to_owned(),
            headers: signed_headers(&presigned),
            expiry: expiry_at(self.upload_expiry),
            bucket_name: bucket.name().to_owned(),
            key: key.to_owned(),
        })
    }

    /// Presign a `GetObject` for `key` on `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::BackendFailure`] when signing fails.
    pub async fn download_url(&self, bucket: &BucketInfo, key: &str) -> ShoalResult<DownloadUrl> {
        let presigned = bucket
            .client()
            .get_object()
            .bucket(bucket.name())
            .key(key)
            .presigned(presigning_config(self.download_expiry)?)
            .await
            .map_err(ShoalError::backend)?;

        Ok(DownloadUrl {
            url: presigned.uri().to_owned(),
            method: presigned.method().to_owned(),
            expiry: expiry_at(self.download_expiry),
            bucket_name: bucket.name().to_owned(),
            key: key.to_owned(),
        })
    }

    /// Presign a `DeleteObject` for `key` on `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::BackendFailure`] when signing fails.
    pub async fn delete_url(&self, bucket: &BucketInfo, key: &str) -> ShoalResult<DeleteUrl> {
        let presigned = bucket
            .client()
            .delete_object()
            .bucket(bucket.name())
            .key(key)
            .presigned(presigning_config(DELETE_EXPIRY)?)
            .await
            .map_err(ShoalError::backend)?;

        Ok(DeleteUrl {
            url: presigned.uri().to_owned(),
            method: presigned.method().to_owned(),
            expiry: expiry_at(DELETE_EXPIRY),
            bucket_name: bucket.name().to_owned(),
            key: key.to_owned(),
        })
    }

    /// Initiate a multipart upload and presign one URL per part.
    ///
    /// On a part-signing failure the initiated upload is aborted
    /// best-effort before the error is returned.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Cancelled`] when `token` fires,
    /// [`ShoalError::BackendFailure`] when the backend rejects the
    /// initiation or a part cannot be signed.
    pub async fn multipart_upload_urls(
        &self,
        bucket: &BucketInfo,
        key: &str,
        part_count: i32,
        token: &CancellationToken,
    ) -> ShoalResult<MultipartUploadUrls> {
        let client = bucket.client();
        let created = cancellable(
            token,
            client
                .create_multipart_upload()
                .bucket(bucket.name())
                .key(key)
                .send(),
        )
        .await?
        .map_err(ShoalError::backend)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| ShoalError::internal("backend returned no upload id"))?
            .to_owned();

        let mut part_urls = BTreeMap::new();
        for part_number in 1..=part_count {
            let presigned = client
                .upload_part()
                .bucket(bucket.name())
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .presigned(presigning_config(self.upload_expiry)?)
                .await;

            match presigned {
                Ok(presigned) => {
                    part_urls.insert(part_number, presigned.uri().to_owned());
                }
                Err(e) => {
                    // Do not leave a half-initiated upload on the backend.
                    if let Err(abort_err) = client
                        .abort_multipart_upload()
                        .bucket(bucket.name())
                        .key(key)
                        .upload_id(&upload_id)
                        .send()
                        .await
                    {
                        warn!(
                            bucket = %bucket.name(),
                            key,
                            error = %abort_err,
                            "failed to abort multipart upload after signing failure"
                        );
                    }
                    return Err(ShoalError::backend(e));
                }
            }
        }
        debug!(bucket = %bucket.name(), key, parts = part_count, "multipart upload initiated");

        Ok(MultipartUploadUrls {
            upload_id,
            part_urls,
            bucket_name: bucket.name().to_owned(),
            key: key.to_owned(),
            expiry: expiry_at(self.upload_expiry),
        })
    }
}

/// Complete a multipart upload on the client's behalf. This cannot be
/// presigned because the backend needs the assembled part list.
///
/// # Errors
///
/// [`ShoalError::Cancelled`] when `token` fires,
/// [`ShoalError::BackendFailure`] when the backend rejects the
/// completion.
pub async fn complete_multipart(
    bucket: &BucketInfo,
    key: &str,
    upload_id: &str,
    parts: &[CompletedPartSpec],
    token: &CancellationToken,
) -> ShoalResult<()> {
    let completed_parts: Vec<CompletedPart> = parts
        .iter()
        .map(|part| {
            CompletedPart::builder()
                .part_number(part.part_number)
                .e_tag(&part.etag)
                .build()
        })
        .collect();

    cancellable(
        token,
        bucket
            .client()
            .complete_multipart_upload()
            .bucket(bucket.name())
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send(),
    )
    .await?
    .map_err(ShoalError::backend)?;
    Ok(())
}

/// Abort a multipart upload on the client's behalf.
///
/// # Errors
///
/// [`ShoalError::Cancelled`] when `token` fires,
/// [`ShoalError::BackendFailure`] when the backend rejects the abort.
pub async fn abort_multipart(
    bucket: &BucketInfo,
    key: &str,
    upload_id: &str,
    token: &CancellationToken,
) -> ShoalResult<()> {
    cancellable(
        token,
        bucket
            .client()
            .abort_multipart_upload()
            .bucket(bucket.name())
            .key(key)
            .upload_id(upload_id)
            .send(),
    )
    .await?
    .map_err(ShoalError::backend)?;
    Ok(())
}

/// List the parts uploaded so far for a multipart upload.
///
/// # Errors
///
/// [`ShoalError::Cancelled`] when `token` fires,
/// [`ShoalError::BackendFailure`] when the backend rejects the listing.
pub async fn list_parts(
    bucket: &BucketInfo,
    key: &str,
    upload_id: &str,
    token: &CancellationToken,
) -> ShoalResult<Vec<PartInfo>> {
    let client = bucket.client();
    let mut parts = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let mut request = client
            .list_parts()
            .bucket(bucket.name())
            .key(key)
            .upload_id(upload_id);
        if let Some(marker) = marker.take() {
            request = request.part_number_marker(marker);
        }
        let response = cancellable(token, request.send())
            .await?
            .map_err(ShoalError::backend)?;

        parts.extend(response.parts().iter().map(|part| PartInfo {
            part_number: part.part_number().unwrap_or_default(),
            etag: part.e_tag().unwrap_or_default().to_owned(),
            size: part.size().unwrap_or_default().max(0) as u64,
        }));

        if response.is_truncated().unwrap_or(false) {
            marker = response.next_part_number_marker().map(str::to_owned);
            if marker.is_none() {
                break;
            }
        } else {
            break;
        }
    }

    Ok(parts)
}

fn presigning_config(expires_in: Duration) -> ShoalResult<PresigningConfig> {
    PresigningConfig::expires_in(expires_in)
        .map_err(|e| ShoalError::internal(format!("presigning config: {e}")))
}

fn expiry_at(expires_in: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::zero())
}

fn signed_headers(request: &PresignedRequest) -> HashMap<String, String> {
    request
        .headers()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

/// Await `future` unless `token` fires first. A token that has already
/// fired wins without the request being polled.
async fn cancellable<F: std::future::Future>(
    token: &CancellationToken,
    future: F,
) -> ShoalResult<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ShoalError::Cancelled),
        output = future => Ok(output),
    }
}
