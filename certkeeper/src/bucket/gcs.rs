//! Google Cloud Storage backend
//!
//! Authenticates as a service account: a short-lived RS256 JWT is exchanged
//! for an OAuth access token before every transfer.

use super::{ArchiveHandle, BucketError, ObjectStore, bucket_name, prepare_download_target};
use crate::config::{Config, GcsSettings};
use async_trait::async_trait;
use certkeeper_core::ARCHIVE_FILE_NAME;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::path::Path;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://storage.googleapis.com";
const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Google Cloud Storage object store
pub struct GcsStore {
    client: reqwest::Client,
    project_id: Option<String>,
    client_email: String,
    key: EncodingKey,
    token_url: String,
    api_base: String,
}

impl GcsStore {
    pub fn from_settings(settings: &GcsSettings) -> Result<Self, BucketError> {
        let client_email = settings
            .client_email
            .clone()
            .ok_or(BucketError::MissingCredentials("GS_USER_ID"))?;
        let key_file = settings
            .key_file
            .as_ref()
            .ok_or(BucketError::MissingCredentials("GS_USER_KEY"))?;
        let pem = std::fs::read(key_file)?;
        let key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| BucketError::Auth(format!("Invalid service account key: {}", e)))?;

        Ok(Self {
            client: crate::http::client()?,
            project_id: settings.project_id.clone(),
            client_email,
            key,
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
        })
    }

    fn assertion(&self) -> Result<String, BucketError> {
        let now = Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: &self.client_email,
            scope: SCOPE,
            aud: &self.token_url,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| BucketError::Auth(e.to_string()))
    }

    async fn access_token(&self) -> Result<String, BucketError> {
        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BucketError::Auth(format!("token exchange returned {}: {}", status, body)));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    fn download_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.api_base, bucket, ARCHIVE_FILE_NAME
        )
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.api_base, bucket, ARCHIVE_FILE_NAME
        )
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn download_file(&self, config: &Config) -> Result<Option<ArchiveHandle>, BucketError> {
        let bucket = bucket_name(config)?;
        let file = prepare_download_target(config)?;
        tracing::info!(
            bucket,
            project = self.project_id.as_deref().unwrap_or_default(),
            file = %file.display(),
            "Attempting to download cert backup"
        );

        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.download_url(bucket))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BucketError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(&file, &bytes).await?;
        tracing::info!(bytes = bytes.len(), "Downloaded tarball with certs successfully");
        Ok(Some(ArchiveHandle::for_file(file)))
    }

    async fn upload_file(
        &self,
        config: &Config,
        file: &Path,
    ) -> Result<ArchiveHandle, BucketError> {
        let bucket = bucket_name(config)?;
        let payload = tokio::fs::read(file).await?;
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.upload_url(bucket))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BucketError::Status { status, body });
        }

        tracing::info!(bucket, "Uploaded tarball with certs successfully");
        Ok(ArchiveHandle::for_file(file))
    }
}
