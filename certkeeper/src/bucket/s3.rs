//! Amazon S3 (and S3-compatible) backend

use super::{ArchiveHandle, BucketError, ObjectStore, bucket_name, prepare_download_target};
use crate::config::{Config, S3Settings};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use certkeeper_core::ARCHIVE_FILE_NAME;
use std::path::Path;

const PROVIDER_NAME: &str = "certkeeper";

/// S3 object store
pub struct S3Store {
    client: Client,
}

/// Static credentials from the environment-backed settings
fn credentials(settings: &S3Settings) -> Result<Credentials, BucketError> {
    let access_key_id = settings
        .access_key_id
        .as_deref()
        .ok_or(BucketError::MissingCredentials("AWS_ACCESS_KEY_ID"))?;
    let secret_access_key = settings
        .secret_access_key
        .as_deref()
        .ok_or(BucketError::MissingCredentials("AWS_SECRET_ACCESS_KEY"))?;

    Ok(Credentials::new(
        access_key_id,
        secret_access_key,
        settings.session_token.clone(),
        None,
        PROVIDER_NAME,
    ))
}

impl S3Store {
    pub async fn from_settings(settings: &S3Settings) -> Result<Self, BucketError> {
        let credentials = credentials(settings)?;

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut config = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            // S3-compatible servers expect path-style addressing
            config = config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(config.build()),
        })
    }
}

fn is_missing(err: &SdkError<GetObjectError>) -> bool {
    if err
        .as_service_error()
        .is_some_and(GetObjectError::is_no_such_key)
    {
        return true;
    }
    err.raw_response()
        .is_some_and(|response| response.status().as_u16() == 404)
}

fn sdk_error<E>(err: E) -> BucketError
where
    E: std::error::Error,
{
    BucketError::S3(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn download_file(&self, config: &Config) -> Result<Option<ArchiveHandle>, BucketError> {
        let bucket = bucket_name(config)?;
        let file = prepare_download_target(config)?;
        tracing::info!(
            bucket,
            file = %file.display(),
            "Attempting to download cert backup"
        );

        let output = match self
            .client
            .get_object()
            .bucket(bucket)
            .key(ARCHIVE_FILE_NAME)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(sdk_error(e)),
        };

        let bytes = output.body.collect().await.map_err(sdk_error)?.into_bytes();
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

        self.client
            .put_object()
            .bucket(bucket)
            .key(ARCHIVE_FILE_NAME)
            .content_type("application/gzip")
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(sdk_error)?;

        tracing::info!(bucket, "Uploaded tarball with certs successfully");
        Ok(ArchiveHandle::for_file(file))
    }
}
