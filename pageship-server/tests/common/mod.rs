//! Test doubles shared by the integration suites.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::mpsc;

use pageship::error::{GenerationError, ProvisionError};
use pageship::github::{CreateOutcome, FileWrite, HostingApi, PagesOutcome, Repository};
use pageship::llm::Generator;
use pageship::notifier::{Notifier, NotifierSettings};
use pageship::pipeline::Pipeline;
use pageship::provisioner::Provisioner;

pub const OWNER: &str = "octo";
pub const SECRET: &str = "correct-horse";

#[derive(Default)]
struct StoredRepo {
    files: HashMap<String, (Vec<u8>, String)>,
    commits: Vec<String>,
    pages: bool,
}

/// In-memory hosting provider with GitHub's conflict semantics.
#[derive(Default)]
pub struct FakeHosting {
    repos: Mutex<HashMap<String, StoredRepo>>,
    sha_counter: AtomicU32,
    pub create_calls: AtomicUsize,
    pub fail_pages: Mutex<bool>,
    pub fail_commits: Mutex<bool>,
}

impl FakeHosting {
    pub fn repo_count(&self) -> usize {
        self.repos.lock().unwrap().len()
    }

    pub fn file(&self, repo: &str, path: &str) -> Option<String> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(repo)?
            .files
            .get(path)
            .map(|(bytes, _)| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn commit_count(&self, repo: &str) -> usize {
        self.repos
            .lock()
            .unwrap()
            .get(repo)
            .map(|r| r.commits.len())
            .unwrap_or(0)
    }

    pub fn pages_enabled(&self, repo: &str) -> bool {
        self.repos
            .lock()
            .unwrap()
            .get(repo)
            .is_some_and(|r| r.pages)
    }

    /// Overwrite a file's version behind the provisioner's back.
    pub fn bump_version(&self, repo: &str, path: &str) {
        let sha = self.next_sha();
        let mut repos = self.repos.lock().unwrap();
        if let Some(file) = repos.get_mut(repo).and_then(|r| r.files.get_mut(path)) {
            file.1 = sha;
        }
    }

    fn next_sha(&self) -> String {
        format!("{:040x}", self.sha_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl HostingApi for FakeHosting {
    async fn create_repo(
        &self,
        name: &str,
        _description: &str,
    ) -> Result<CreateOutcome, ProvisionError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut repos = self.repos.lock().unwrap();
        if repos.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        repos.insert(name.to_string(), StoredRepo::default());
        Ok(CreateOutcome::Created(Repository::new(OWNER, name)))
    }

    async fn get_repo(&self, name: &str) -> Result<Option<Repository>, ProvisionError> {
        let repos = self.repos.lock().unwrap();
        Ok(repos.contains_key(name).then(|| Repository::new(OWNER, name)))
    }

    async fn file_sha(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let repos = self.repos.lock().unwrap();
        let stored = repos
            .get(&repo.name)
            .ok_or_else(|| ProvisionError::RepositoryNotFound(repo.name.clone()))?;
        Ok(stored.files.get(path).map(|(_, sha)| sha.clone()))
    }

    async fn put_file(
        &self,
        repo: &Repository,
        write: FileWrite<'_>,
    ) -> Result<(), ProvisionError> {
        let sha = self.next_sha();
        let mut repos = self.repos.lock().unwrap();
        let stored = repos
            .get_mut(&repo.name)
            .ok_or_else(|| ProvisionError::RepositoryNotFound(repo.name.clone()))?;

        match (stored.files.get(write.path), write.sha) {
            (Some(_), None) => {
                return Err(ProvisionError::FileExists {
                    repo: repo.name.clone(),
                    path: write.path.to_string(),
                });
            }
            (Some((_, current)), Some(given)) if current != given => {
                return Err(ProvisionError::StaleWrite {
                    repo: repo.name.clone(),
                    path: write.path.to_string(),
                    sha: given.to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(ProvisionError::Api {
                    status: 404,
                    body: "Not Found".into(),
                });
            }
            _ => {}
        }

        stored
            .files
            .insert(write.path.to_string(), (write.content.to_vec(), sha.clone()));
        stored.commits.push(sha);
        Ok(())
    }

    async fn enable_pages(&self, repo: &Repository) -> Result<PagesOutcome, ProvisionError> {
        if *self.fail_pages.lock().unwrap() {
            return Err(ProvisionError::Api {
                status: 500,
                body: "pages backend down".into(),
            });
        }
        let mut repos = self.repos.lock().unwrap();
        let stored = repos
            .get_mut(&repo.name)
            .ok_or_else(|| ProvisionError::RepositoryNotFound(repo.name.clone()))?;
        if stored.pages {
            Ok(PagesOutcome::AlreadyEnabled)
        } else {
            stored.pages = true;
            Ok(PagesOutcome::Enabled)
        }
    }

    async fn latest_commit(&self, repo: &Repository) -> Result<String, ProvisionError> {
        if *self.fail_commits.lock().unwrap() {
            return Err(ProvisionError::Api {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repo.name)
            .and_then(|r| r.commits.last().cloned())
            .ok_or_else(|| ProvisionError::Api {
                status: 409,
                body: "Git Repository is empty.".into(),
            })
    }
}

/// Hosting that lets another writer commit to a file right after its
/// version is read, so the following conditional write is stale.
pub struct RacingHosting(pub Arc<FakeHosting>);

#[async_trait]
impl HostingApi for RacingHosting {
    async fn create_repo(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateOutcome, ProvisionError> {
        self.0.create_repo(name, description).await
    }

    async fn get_repo(&self, name: &str) -> Result<Option<Repository>, ProvisionError> {
        self.0.get_repo(name).await
    }

    async fn file_sha(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let sha = self.0.file_sha(repo, path).await?;
        self.0.bump_version(&repo.name, path);
        Ok(sha)
    }

    async fn put_file(
        &self,
        repo: &Repository,
        write: FileWrite<'_>,
    ) -> Result<(), ProvisionError> {
        self.0.put_file(repo, write).await
    }

    async fn enable_pages(&self, repo: &Repository) -> Result<PagesOutcome, ProvisionError> {
        self.0.enable_pages(repo).await
    }

    async fn latest_commit(&self, repo: &Repository) -> Result<String, ProvisionError> {
        self.0.latest_commit(repo).await
    }
}

/// Generator that records prompts and returns canned HTML.
#[derive(Default)]
pub struct FakeGenerator {
    pub calls: Mutex<Vec<(String, Option<String>)>>,
    pub fail: Mutex<bool>,
    pub delay: Mutex<Duration>,
}

impl FakeGenerator {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        revision_hint: Option<&str>,
    ) -> Result<String, GenerationError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((prompt.to_string(), revision_hint.map(str::to_string)));
            calls.len()
        };
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock().unwrap() {
            return Err(GenerationError::Empty);
        }
        Ok(format!("<!DOCTYPE html><html><body>generation {n}</body></html>"))
    }
}

pub fn fast_notifier(max_attempts: u32) -> Notifier {
    Notifier::new(NotifierSettings {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        request_timeout: Duration::from_secs(2),
    })
}

pub fn pipeline(generator: Arc<FakeGenerator>, hosting: Arc<FakeHosting>) -> Pipeline {
    pipeline_with(generator, hosting)
}

pub fn pipeline_with(generator: Arc<FakeGenerator>, hosting: Arc<dyn HostingApi>) -> Pipeline {
    Pipeline::new(
        SECRET.to_string(),
        generator,
        Provisioner::new(hosting),
        fast_notifier(3),
    )
}

/// Evaluation callback endpoint that answers with scripted statuses and
/// forwards every received payload.
pub struct Callback {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub received: mpsc::UnboundedReceiver<Value>,
}

impl Callback {
    pub fn url(&self) -> String {
        format!("http://{}/cb", self.addr)
    }
}

#[derive(Clone)]
struct CallbackState {
    script: Arc<Mutex<Vec<u16>>>,
    hits: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<Value>,
}

/// Start a callback server. Statuses are consumed in order; once the script
/// runs out every request gets 200.
pub async fn start_callback(script: Vec<u16>) -> Callback {
    let (tx, received) = mpsc::unbounded_channel();
    let hits = Arc::new(AtomicUsize::new(0));
    let state = CallbackState {
        script: Arc::new(Mutex::new(script.into_iter().rev().collect())),
        hits: hits.clone(),
        tx,
    };

    async fn handle(State(state): State<CallbackState>, Json(body): Json<Value>) -> StatusCode {
        state.hits.fetch_add(1, Ordering::SeqCst);
        let _ = state.tx.send(body);
        let status = state.script.lock().unwrap().pop().unwrap_or(200);
        StatusCode::from_u16(status).unwrap()
    }

    let app = Router::new().route("/cb", post(handle)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Callback {
        addr,
        hits,
        received,
    }
}

/// Bind a port, then free it, so connections to it are refused.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/cb")
}
