//! Pipeline orchestrator: generation → repository → publication → pages →
//! evaluation callback.
//!
//! [`Pipeline::run`] is the detached half of a request. It owns its own error
//! boundary: every failure is logged with task, round and phase, and nothing
//! propagates past it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, SecondsFormat, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::error::PipelineError;
use crate::github::Repository;
use crate::llm::Generator;
use crate::notifier::{EvaluationPayload, NotificationResult, Notifier};
use crate::provisioner::{Provisioner, PublishMode};
use crate::request::{Round, TaskRequest};
use crate::templates;

pub const REVISION_HINT: &str =
    "This is a revision round. Modify and improve the existing application.";

/// Where a run currently is. Attached to failures for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Authorizing,
    Generating,
    Provisioning,
    Resolving,
    Publishing,
    ActivatingHosting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Authorizing => write!(f, "authorizing"),
            Phase::Generating => write!(f, "generating"),
            Phase::Provisioning => write!(f, "provisioning"),
            Phase::Resolving => write!(f, "resolving"),
            Phase::Publishing => write!(f, "publishing"),
            Phase::ActivatingHosting => write!(f, "activating-hosting"),
        }
    }
}

/// A failed run: the error and the phase it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{phase}: {error}")]
pub struct RunFailure {
    pub phase: Phase,
    #[source]
    pub error: PipelineError,
}

trait AtPhase<T> {
    fn at(self, phase: Phase) -> Result<T, RunFailure>;
}

impl<T, E: Into<PipelineError>> AtPhase<T> for Result<T, E> {
    fn at(self, phase: Phase) -> Result<T, RunFailure> {
        self.map_err(|e| RunFailure {
            phase,
            error: e.into(),
        })
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub repo: Repository,
    pub commit_sha: String,
    pub notification: NotificationResult,
}

/// Keyed async mutex: one holder per key, independent keys never contend.
#[derive(Default)]
pub struct TaskLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskLocks {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            // Drop entries nobody holds or waits on.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Pipeline {
    secret: String,
    generator: Arc<dyn Generator>,
    provisioner: Provisioner,
    notifier: Notifier,
    locks: TaskLocks,
}

impl Pipeline {
    pub fn new(
        secret: String,
        generator: Arc<dyn Generator>,
        provisioner: Provisioner,
        notifier: Notifier,
    ) -> Self {
        Self {
            secret,
            generator,
            provisioner,
            notifier,
            locks: TaskLocks::default(),
        }
    }

    /// Check the shared secret.
    pub fn authorize(&self, secret: &str) -> Result<(), PipelineError> {
        if secret == self.secret {
            Ok(())
        } else {
            Err(PipelineError::Unauthorized)
        }
    }

    /// Run detached from the caller. Failures end here.
    pub fn spawn(self: &Arc<Self>, request: TaskRequest) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(request).await })
    }

    /// Execute the pipeline and log the outcome. Never fails.
    pub async fn run(&self, request: TaskRequest) {
        let started = Instant::now();
        match self.execute(&request).await {
            Ok(report) => tracing::info!(
                task = %request.task,
                round = %request.round,
                repo = %report.repo.name,
                commit = %report.commit_sha,
                delivered = report.notification.delivered,
                attempts = report.notification.attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline finished"
            ),
            Err(failure) => tracing::error!(
                task = %request.task,
                round = %request.round,
                phase = %failure.phase,
                error = %failure.error,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline failed"
            ),
        }
    }

    /// Execute the pipeline, returning the first failure.
    pub async fn execute(&self, request: &TaskRequest) -> Result<RunReport, RunFailure> {
        self.authorize(&request.secret).at(Phase::Authorizing)?;

        let repo_name = request.repo_name();
        tracing::info!(
            task = %request.task,
            round = %request.round,
            repo = %repo_name,
            "Pipeline started"
        );

        let (prompt, hint) = match request.round {
            Round::Build => (build_prompt(request), None),
            Round::Revise => (revise_prompt(request), Some(REVISION_HINT)),
        };
        let html = self
            .generator
            .generate(&prompt, hint)
            .await
            .at(Phase::Generating)?;
        tracing::info!(task = %request.task, bytes = html.len(), "Application generated");

        let guard = self.locks.acquire(&repo_name).await;

        let repo = match request.round {
            Round::Build => {
                let (repo, provenance) = self
                    .provisioner
                    .provision(&request.task)
                    .await
                    .at(Phase::Provisioning)?;
                tracing::debug!(repo = %repo.name, ?provenance, "Repository ready");
                self.publish_build(&repo, request, &html)
                    .await
                    .at(Phase::Publishing)?;
                repo
            }
            Round::Revise => {
                let repo = self
                    .provisioner
                    .resolve(&request.task)
                    .await
                    .at(Phase::Resolving)?;
                self.publish_revision(&repo, request, &html)
                    .await
                    .at(Phase::Publishing)?;
                repo
            }
        };

        self.provisioner
            .enable_hosting(&repo)
            .await
            .map_err(|source| PipelineError::HostingActivation {
                repo: repo.name.clone(),
                source,
            })
            .at(Phase::ActivatingHosting)?;

        let commit_sha = self.provisioner.latest_revision(&repo).await;
        drop(guard);

        let payload = EvaluationPayload {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round.number(),
            nonce: request.nonce.clone(),
            repo_url: repo.url.clone(),
            commit_sha: commit_sha.clone(),
            pages_url: repo.pages_url.clone(),
            timestamp: timestamp(),
        };
        let notification = self.notifier.notify(&request.evaluation_url, &payload).await;

        Ok(RunReport {
            repo,
            commit_sha,
            notification,
        })
    }

    async fn publish_build(
        &self,
        repo: &Repository,
        request: &TaskRequest,
        html: &str,
    ) -> Result<(), PipelineError> {
        let p = &self.provisioner;
        p.publish(
            repo,
            "index.html",
            html.as_bytes(),
            &format!("Initial build: {}...", excerpt(&request.brief)),
            PublishMode::Create,
        )
        .await?;

        let license = templates::mit_license(Utc::now().year(), &repo.owner);
        p.publish(
            repo,
            "LICENSE",
            license.as_bytes(),
            "Add MIT license",
            PublishMode::Create,
        )
        .await?;

        let readme = templates::readme(
            &request.task,
            &request.brief,
            &request.checks,
            repo,
            Round::Build,
        );
        p.publish(
            repo,
            "README.md",
            readme.as_bytes(),
            "Add README",
            PublishMode::Create,
        )
        .await?;

        for attachment in &request.attachments {
            let (Some(path), Some(bytes)) =
                (attachment.publish_path(), attachment.decode_data_uri())
            else {
                tracing::warn!(
                    name = %attachment.name,
                    "Skipping attachment that is not an inline data URI"
                );
                continue;
            };
            let message = format!("Add {path}");
            if let Err(e) = p
                .publish(repo, &path, &bytes, &message, PublishMode::Create)
                .await
            {
                tracing::warn!(
                    repo = %repo.name,
                    path = %path,
                    error = %e,
                    "Failed to publish attachment"
                );
            }
        }
        Ok(())
    }

    async fn publish_revision(
        &self,
        repo: &Repository,
        request: &TaskRequest,
        html: &str,
    ) -> Result<(), PipelineError> {
        let p = &self.provisioner;
        p.publish(
            repo,
            "index.html",
            html.as_bytes(),
            &format!("Revision: {}...", excerpt(&request.brief)),
            PublishMode::Update,
        )
        .await?;

        let readme = templates::readme(
            &request.task,
            &request.brief,
            &request.checks,
            repo,
            Round::Revise,
        );
        p.publish(
            repo,
            "README.md",
            readme.as_bytes(),
            "Update README for revision",
            PublishMode::Update,
        )
        .await?;
        Ok(())
    }
}

/// Generator prompt for an initial build.
pub fn build_prompt(request: &TaskRequest) -> String {
    let mut prompt = format!(
        "Build: {}\n\nChecks:\n{}",
        request.brief,
        request.checks.join("\n")
    );
    if !request.attachments.is_empty() {
        let names: Vec<&str> = request.attachments.iter().map(|a| a.name.as_str()).collect();
        prompt.push_str(&format!(
            "\n\nAttachments (published next to index.html):\n{}",
            names.join("\n")
        ));
    }
    prompt
}

/// Generator prompt for a revision of existing content.
pub fn revise_prompt(request: &TaskRequest) -> String {
    format!(
        "REVISION Required:\n{}\n\nValidation Checks:\n{}",
        request.brief,
        request.checks.join("\n")
    )
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn excerpt(text: &str) -> String {
    text.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Attachment;
    use std::time::Duration;

    fn request(round: Round) -> TaskRequest {
        TaskRequest {
            email: "student@example.com".into(),
            secret: "s".into(),
            task: "t1".into(),
            nonce: "n".into(),
            brief: "todo app".into(),
            checks: vec!["has add button".into(), "has title".into()],
            evaluation_url: "https://eval.example/cb".into(),
            attachments: vec![],
            round,
        }
    }

    #[test]
    fn prompts_carry_brief_and_checks() {
        let build = build_prompt(&request(Round::Build));
        assert_eq!(build, "Build: todo app\n\nChecks:\nhas add button\nhas title");

        let revise = revise_prompt(&request(Round::Revise));
        assert!(revise.starts_with("REVISION Required:\ntodo app"));
        assert!(revise.ends_with("has add button\nhas title"));
    }

    #[test]
    fn build_prompt_lists_attachments() {
        let mut req = request(Round::Build);
        req.attachments.push(Attachment {
            name: "sample.png".into(),
            url: "data:image/png;base64,AA==".into(),
        });
        assert!(build_prompt(&req).ends_with("sample.png"));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let brief = "é".repeat(80);
        assert_eq!(excerpt(&brief).chars().count(), 50);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn timestamp_is_utc_millis() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[tokio::test]
    async fn task_locks_serialize_same_key() {
        let locks = Arc::new(TaskLocks::default());
        let guard = locks.acquire("app-t1").await;

        let other = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("app-t2").await })
        };
        assert!(tokio::time::timeout(Duration::from_secs(1), other).await.is_ok());

        let same = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire("app-t1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!same.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), same)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn task_locks_prune_idle_entries() {
        let locks = TaskLocks::default();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        let _held = locks.acquire("c").await;
        assert_eq!(locks.len(), 1);
    }
}
