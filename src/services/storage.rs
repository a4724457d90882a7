use aws_sdk_s3::primitives::ByteStream;
use sha2::{Digest, Sha256};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::{config::AppConfig, error::AppError, state::AppState};

/// An uploaded payment slip image as received from the tenant.
#[derive(Debug, Clone)]
pub struct SlipUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SlipUpload {
    pub fn extension(&self) -> &'static str {
        match self.content_type.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "image/heic" => "heic",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// `slips/{bill_id}/{sha256}.{ext}`; re-uploading the same image lands on the same key.
pub fn slip_object_key(bill_id: Uuid, upload: &SlipUpload) -> String {
    format!(
        "slips/{bill_id}/{}.{}",
        content_hash(&upload.bytes),
        upload.extension()
    )
}

/// Public URL for an object key.
///
/// `SLIP_PUBLIC_BASE_URL` wins when set, then a path-style URL on the custom
/// endpoint, then the regional AWS virtual-host URL.
pub fn public_object_url(config: &AppConfig, bucket: &str, key: &str) -> Result<String, String> {
    if let Some(base) = config.slip_public_base_url.as_deref() {
        let base = format!("{}/", base.trim_end_matches('/'));
        let url = Url::parse(&base)
            .and_then(|url| url.join(key))
            .map_err(|e| format!("Invalid SLIP_PUBLIC_BASE_URL: {e}"))?;
        return Ok(url.to_string());
    }

    if let Some(endpoint) = config.s3_endpoint_url.as_deref() {
        let base = format!("{}/{bucket}/", endpoint.trim_end_matches('/'));
        let url = Url::parse(&base)
            .and_then(|url| url.join(key))
            .map_err(|e| format!("Invalid S3_ENDPOINT_URL: {e}"))?;
        return Ok(url.to_string());
    }

    Ok(format!(
        "https://{bucket}.s3.{}.amazonaws.com/{key}",
        config.s3_region
    ))
}

/// Upload a verified slip and return its public URL.
pub async fn store_slip(
    state: &AppState,
    bill_id: Uuid,
    upload: &SlipUpload,
) -> Result<String, AppError> {
    let (Some(client), Some(bucket)) = (
        state.s3_client.as_ref(),
        state.config.slip_bucket.as_deref(),
    ) else {
        return Err(AppError::Dependency(
            "Slip storage is not configured. Set SLIP_BUCKET.".to_string(),
        ));
    };

    let key = slip_object_key(bill_id, upload);
    client
        .put_object()
        .bucket(bucket)
        .key(&key)
        .content_type(upload.content_type.as_str())
        .body(ByteStream::from(upload.bytes.clone()))
        .send()
        .await
        .map_err(|e| AppError::Dependency(format!("Slip upload failed: {e}")))?;

    let url = public_object_url(&state.config, bucket, &key).map_err(AppError::Internal)?;
    info!(%bill_id, key = %key, size = upload.bytes.len(), "Slip stored");
    Ok(url)
}
