use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aws_sdk_s3::primitives::ByteStream;
use aws_types::SdkConfig;
use futures::future::BoxFuture;
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::aws::describe_error;
use crate::config::{Artifact, ArtifactKind, Solution};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Artifact source {0} not found")]
    MissingSource(String),

    #[error("Unable to package {name}: {reason}")]
    Packaging { name: String, reason: String },

    #[error("Staging bucket parameter {0} is not set")]
    MissingBucket(String),

    #[error("Upload of s3://{bucket}/{key} failed: {reason}")]
    Upload {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Service error ocurred: {0}.")]
    ServiceError(String),
}

/// Where packaged artifacts end up.
pub trait ArtifactStore: Send + Sync {
    /// Reads an SSM parameter value.
    fn parameter<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<String>, Error>>;

    fn upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

pub struct S3Store {
    ssm: aws_sdk_ssm::Client,
    s3: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            ssm: aws_sdk_ssm::Client::new(sdk_config),
            s3: aws_sdk_s3::Client::new(sdk_config),
        }
    }

    async fn get_parameter(&self, name: &str) -> Result<Option<String>, Error> {
        let output = match self.ssm.get_parameter().name(name).send().await {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_parameter_not_found())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(Error::ServiceError(describe_error(&err)));
            }
        };

        Ok(output
            .parameter()
            .and_then(|p| p.value())
            .map(String::from))
    }

    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<(), Error> {
        let upload_error = |reason: String| Error::Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|error| upload_error(error.to_string()))?;
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| upload_error(describe_error(&err)))?;

        Ok(())
    }
}

impl ArtifactStore for S3Store {
    fn parameter<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<String>, Error>> {
        Box::pin(self.get_parameter(name))
    }

    fn upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.put_object(bucket, key, path))
    }
}

/// Zips every file under `source` into `destination`, entries named relative
/// to `source` and added in name order.
pub fn package_zip(source: &Path, destination: &Path) -> Result<(), io::Error> {
    let file = File::create(destination)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => continue,
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(entry.path())?)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Builds one artifact inside `staging` and returns the file to upload.
pub fn stage(artifact: &Artifact, workdir: &Path, staging: &Path) -> Result<PathBuf, Error> {
    let source = workdir.join(&artifact.source);
    let packaging_error = |error: io::Error| Error::Packaging {
        name: artifact.name.clone(),
        reason: error.to_string(),
    };

    match artifact.kind {
        ArtifactKind::Zip => {
            if !source.is_dir() {
                return Err(Error::MissingSource(source.display().to_string()));
            }
            let destination = staging.join(&artifact.name);
            package_zip(&source, &destination).map_err(packaging_error)?;
            debug!(artifact = %artifact.name, source = %source.display(), "packaged");
            Ok(destination)
        }
        ArtifactKind::File => {
            if !source.is_file() {
                return Err(Error::MissingSource(source.display().to_string()));
            }
            let destination = staging.join(&artifact.name);
            fs::copy(&source, &destination).map_err(packaging_error)?;
            Ok(destination)
        }
    }
}

/// Packages and uploads all of a solution's artifacts to the staging bucket.
/// Returns the uploaded `s3://` URIs in catalog order.
pub async fn sync(
    store: &dyn ArtifactStore,
    solution: &Solution,
    workdir: &Path,
) -> Result<Vec<String>, Error> {
    let bucket = store
        .parameter(&solution.staging_bucket_parameter)
        .await?
        .filter(|bucket| !bucket.trim().is_empty())
        .ok_or_else(|| Error::MissingBucket(solution.staging_bucket_parameter.clone()))?;
    info!(%bucket, solution = %solution.name, "syncing artifacts");

    // Removed on drop, whichever way this returns.
    let staging = TempDir::new().map_err(|error| Error::Packaging {
        name: solution.name.clone(),
        reason: error.to_string(),
    })?;

    let mut uploaded = vec![];
    for artifact in &solution.artifacts {
        let path = stage(artifact, workdir, staging.path())?;
        let key = artifact.key();
        store.upload(&bucket, &key, &path).await?;

        let uri = format!("s3://{}/{}", bucket, key);
        info!(%uri, "uploaded");
        uploaded.push(uri);
    }

    Ok(uploaded)
}
