//! Repository provisioner: idempotent create-or-fetch, guarded file
//! publication, and pages activation on top of a [`HostingApi`].

use std::sync::Arc;
use std::time::Duration;

use crate::error::ProvisionError;
use crate::github::{CreateOutcome, FileWrite, HostingApi, PagesOutcome, Repository};
use crate::request::repo_name;

/// Revision reported when the latest commit cannot be looked up.
pub const UNKNOWN_REVISION: &str = "unknown";

/// How a repository was obtained. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Created,
    Existing,
}

/// Whether a publish creates a new file or replaces an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Create,
    Update,
}

#[derive(Clone)]
pub struct Provisioner {
    api: Arc<dyn HostingApi>,
    pages_settle: Duration,
}

impl Provisioner {
    pub fn new(api: Arc<dyn HostingApi>) -> Self {
        Self {
            api,
            pages_settle: Duration::ZERO,
        }
    }

    /// Delay after newly enabling pages, giving the site time to initialize.
    pub fn with_pages_settle(mut self, settle: Duration) -> Self {
        self.pages_settle = settle;
        self
    }

    /// Create the task's repository, or fetch it if it already exists.
    pub async fn provision(&self, task: &str) -> Result<(Repository, Provenance), ProvisionError> {
        let name = repo_name(task);
        let description = format!("Auto-generated application for task: {task}");
        match self.api.create_repo(&name, &description).await? {
            CreateOutcome::Created(repo) => {
                tracing::info!(repo = %repo.name, url = %repo.url, "Repository created");
                Ok((repo, Provenance::Created))
            }
            CreateOutcome::AlreadyExists => {
                let repo = self
                    .api
                    .get_repo(&name)
                    .await?
                    .ok_or(ProvisionError::RepositoryNotFound(name))?;
                tracing::info!(repo = %repo.name, "Repository already exists, reusing it");
                Ok((repo, Provenance::Existing))
            }
        }
    }

    /// Fetch the task's repository without creating it.
    pub async fn resolve(&self, task: &str) -> Result<Repository, ProvisionError> {
        let name = repo_name(task);
        self.api
            .get_repo(&name)
            .await?
            .ok_or(ProvisionError::RepositoryNotFound(name))
    }

    /// Write one file.
    ///
    /// `Create` never overwrites. `Update` reads the current version first and
    /// writes conditionally on it.
    pub async fn publish(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        mode: PublishMode,
    ) -> Result<(), ProvisionError> {
        let sha = match mode {
            PublishMode::Create => None,
            PublishMode::Update => Some(self.api.file_sha(repo, path).await?.ok_or_else(|| {
                ProvisionError::FileMissing {
                    repo: repo.name.clone(),
                    path: path.to_string(),
                }
            })?),
        };

        self.api
            .put_file(
                repo,
                FileWrite {
                    path,
                    content,
                    message,
                    sha: sha.as_deref(),
                },
            )
            .await?;

        tracing::info!(repo = %repo.name, path, ?mode, "File published");
        Ok(())
    }

    /// Turn on static hosting. Already-enabled counts as success.
    pub async fn enable_hosting(&self, repo: &Repository) -> Result<PagesOutcome, ProvisionError> {
        let outcome = self.api.enable_pages(repo).await?;
        match outcome {
            PagesOutcome::Enabled => {
                tracing::info!(repo = %repo.name, pages = %repo.pages_url, "Pages enabled");
                if !self.pages_settle.is_zero() {
                    tokio::time::sleep(self.pages_settle).await;
                }
            }
            PagesOutcome::AlreadyEnabled => {
                tracing::info!(repo = %repo.name, "Pages already enabled");
            }
        }
        Ok(outcome)
    }

    /// Latest commit on the publishing branch, or [`UNKNOWN_REVISION`].
    pub async fn latest_revision(&self, repo: &Repository) -> String {
        match self.api.latest_commit(repo).await {
            Ok(sha) => sha,
            Err(e) => {
                tracing::warn!(repo = %repo.name, error = %e, "Failed to read latest commit");
                UNKNOWN_REVISION.to_string()
            }
        }
    }
}
