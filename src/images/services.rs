use std::io::Cursor;

use anyhow::Context;
use axum::extract::Multipart;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, GenericImageView};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::AppError, storage::StorageClient};

const MAX_EDGE: u32 = 1600;
const JPEG_QUALITY: u8 = 85;

pub struct UploadItem {
    pub filename: String,
    pub body: Bytes,
}

/// Reads the file part named `field` from a multipart body.
pub async fn take_file(mut mp: Multipart, field: &str) -> Result<Option<UploadItem>, AppError> {
    while let Some(part) = mp
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if part.name() != Some(field) {
            continue;
        }
        let filename = part.file_name().unwrap_or_default().to_string();
        let body = part
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if filename.is_empty() || body.is_empty() {
            return Ok(None);
        }
        return Ok(Some(UploadItem { filename, body }));
    }
    Ok(None)
}

/// Lower-cased extension when it belongs to the accepted image set.
fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    matches!(ext.as_str(), "jpg" | "jpe" | "jpeg" | "png" | "gif" | "bmp" | "webp").then_some(ext)
}

/// Stores `upload` in `folder` in place of `previous` and returns the new file name.
///
/// The upload is decoded and reduced before storage is touched, so a rejected file
/// leaves the previous image in place. Removing the previous file is best-effort.
pub async fn replace_image(
    storage: &dyn StorageClient,
    folder: &str,
    previous: Option<&str>,
    upload: Option<UploadItem>,
) -> Result<String, AppError> {
    let upload = upload.ok_or_else(|| AppError::BadRequest("Not a valid image".into()))?;
    allowed_extension(&upload.filename)
        .ok_or_else(|| AppError::BadRequest("File type not allowed".into()))?;

    let original_size = upload.body.len();
    let reduced = compress_image(upload.body).await?;
    let reduced_size = reduced.len();

    let filename = format!("{}.jpg", Uuid::new_v4());
    let key = format!("{folder}/{filename}");
    storage
        .put_object(&key, reduced, "image/jpeg")
        .await
        .with_context(|| format!("put_object {}", key))?;

    if let Some(previous) = previous {
        remove_image(storage, folder, previous).await;
    }

    let saved = if original_size > 0 {
        (original_size as f64 - reduced_size as f64) / original_size as f64 * 100.0
    } else {
        0.0
    };
    info!(
        %key,
        original_size,
        reduced_size,
        percent_saved = saved.round() as i64,
        "image compressed"
    );
    Ok(filename)
}

pub async fn remove_image(storage: &dyn StorageClient, folder: &str, filename: &str) {
    let key = format!("{folder}/{filename}");
    if let Err(e) = storage.delete_object(&key).await {
        warn!(error = %e, %key, "could not delete previous image");
    }
}

/// Runs [`reduce`] on the blocking pool; undecodable payloads are a bad request.
async fn compress_image(body: Bytes) -> Result<Bytes, AppError> {
    let reduced = tokio::task::spawn_blocking(move || reduce(&body))
        .await
        .context("image task panicked")?
        .map_err(|e| {
            warn!(error = %e, "rejecting undecodable image");
            AppError::BadRequest("Not a valid image".into())
        })?;
    Ok(Bytes::from(reduced))
}

/// RGB JPEG whose longest edge is at most `MAX_EDGE`.
pub fn reduce(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(data).context("decode image")?;
    let (w, h) = img.dimensions();
    let img = if w.max(h) > MAX_EDGE {
        img.resize(MAX_EDGE, MAX_EDGE, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("encode jpeg")?;
    Ok(out.into_inner())
}
