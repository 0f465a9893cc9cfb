//! Product image hosting.
//!
//! Images live on an external host (ImageKit) reached through the
//! `ImageStore` trait. Uploads return the `{url, thumbnail, id}` triple
//! stored on the product; deletes are keyed by the host's file id.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ImageKitConfig;

const UPLOAD_URL: &str = "https://upload.imagekit.io/api/v1/files/upload";
const FILES_URL: &str = "https://api.imagekit.io/v1/files";
const UPLOAD_FOLDER: &str = "/haat";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub url: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub id: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<StoredImage>;
    async fn delete(&self, file_id: &str) -> Result<()>;
}

pub struct ImageKitStore {
    http: reqwest::Client,
    private_key: String,
}

impl ImageKitStore {
    pub fn new(config: &ImageKitConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            private_key: config.private_key.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
    #[serde(rename = "thumbnailUrl", default)]
    thumbnail_url: String,
    #[serde(rename = "fileId", default)]
    file_id: String,
}

#[async_trait]
impl ImageStore for ImageKitStore {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<StoredImage> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("fileName", file_name.to_string())
            .text("folder", UPLOAD_FOLDER)
            .text("useUniqueFileName", "true")
            .text("responseFields", "url,thumbnailUrl,fileId,name");

        let response: UploadResponse = self
            .http
            .post(UPLOAD_URL)
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await
            .context("image upload request failed")?
            .error_for_status()
            .context("image host rejected the upload")?
            .json()
            .await
            .context("image host returned an unexpected body")?;

        Ok(StoredImage {
            url: response.url,
            thumbnail: response.thumbnail_url,
            id: response.file_id,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.http
            .delete(format!("{FILES_URL}/{file_id}"))
            .basic_auth(&self.private_key, Some(""))
            .send()
            .await
            .context("image delete request failed")?
            .error_for_status()
            .context("image host rejected the delete")?;
        Ok(())
    }
}

/// Used when no image host is configured: uploads fail loudly, deletes
/// are a no-op so product removal still succeeds.
pub struct NullImageStore;

#[async_trait]
impl ImageStore for NullImageStore {
    async fn upload(&self, _bytes: Vec<u8>, _file_name: &str) -> Result<StoredImage> {
        bail!("image storage is not configured")
    }

    async fn delete(&self, _file_id: &str) -> Result<()> {
        Ok(())
    }
}
