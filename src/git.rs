use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::process::Command;
use tracing::debug;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to run git: {0}")]
    Unavailable(String),

    #[error("`git {command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

/// Identity of the local checkout the parameters are applied from.
pub trait SourceControl: Send + Sync {
    fn current_branch(&self) -> BoxFuture<'_, Result<String, Error>>;

    fn remote_url(&self) -> BoxFuture<'_, Result<String, Error>>;
}

pub struct Git {
    workdir: PathBuf,
    remote: String,
}

impl Git {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            remote: String::from("origin"),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, Error> {
        debug!(?args, workdir = %self.workdir.display(), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|error| Error::Unavailable(error.to_string()))?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SourceControl for Git {
    fn current_branch(&self) -> BoxFuture<'_, Result<String, Error>> {
        Box::pin(self.run(&["rev-parse", "--abbrev-ref", "HEAD"]))
    }

    fn remote_url(&self) -> BoxFuture<'_, Result<String, Error>> {
        Box::pin(async move {
            let key = format!("remote.{}.url", self.remote);
            self.run(&["config", "--get", &key]).await
        })
    }
}
