//! Source-hosting API: the [`HostingApi`] contract and its GitHub REST client.
//!
//! Conflict statuses are part of the normal contract here. "Already exists"
//! and "already enabled" come back as tagged outcomes, while lost-update and
//! overwrite conflicts come back as typed [`ProvisionError`]s.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::ProvisionError;

const USER_AGENT: &str = concat!("pageship/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// A hosting repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub url: String,
    pub pages_url: String,
}

impl Repository {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            url: format!("https://github.com/{owner}/{name}"),
            pages_url: format!("https://{}.github.io/{name}/", owner.to_lowercase()),
        }
    }
}

/// Result of a create-repository call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Repository),
    AlreadyExists,
}

/// Result of a pages-enable call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesOutcome {
    Enabled,
    AlreadyEnabled,
}

/// A file write. `sha` is the optimistic-concurrency token of the version
/// being replaced; `None` means the file must not exist yet.
#[derive(Debug, Clone)]
pub struct FileWrite<'a> {
    pub path: &'a str,
    pub content: &'a [u8],
    pub message: &'a str,
    pub sha: Option<&'a str>,
}

#[async_trait]
pub trait HostingApi: Send + Sync {
    async fn create_repo(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateOutcome, ProvisionError>;

    async fn get_repo(&self, name: &str) -> Result<Option<Repository>, ProvisionError>;

    /// Current version token of `path`, or `None` if absent.
    async fn file_sha(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Option<String>, ProvisionError>;

    /// Fails with `FileExists` when `sha` is `None` and the path exists, and
    /// with `StaleWrite` when `sha` is not the current version.
    async fn put_file(
        &self,
        repo: &Repository,
        write: FileWrite<'_>,
    ) -> Result<(), ProvisionError>;

    async fn enable_pages(&self, repo: &Repository) -> Result<PagesOutcome, ProvisionError>;

    async fn latest_commit(&self, repo: &Repository) -> Result<String, ProvisionError>;
}

/// GitHub connection settings.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    pub token: String,
    pub owner: String,
    pub branch: String,
    /// Per-request timeout. Runs hold the task lock across these calls.
    pub request_timeout: Duration,
}

/// GitHub REST client.
pub struct GithubClient {
    config: GithubConfig,
    base: Url,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct RepoBody {
    name: String,
    html_url: String,
    owner: OwnerBody,
}

#[derive(Deserialize)]
struct OwnerBody {
    login: String,
}

#[derive(Deserialize)]
struct ShaBody {
    sha: String,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self, ProvisionError> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| ProvisionError::InvalidApiUrl(format!("{}: {e}", config.api_url)))?;
        if base.cannot_be_a_base() {
            return Err(ProvisionError::InvalidApiUrl(config.api_url.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, base, http })
    }

    /// API URL for `segments`, each one percent-encoded on its own.
    fn endpoint<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Url {
        let mut url = self.base.clone();
        // `new` rejects bases that cannot carry a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn repo_endpoint<'s>(
        &'s self,
        repo: &'s Repository,
        rest: impl IntoIterator<Item = &'s str>,
    ) -> Url {
        self.endpoint(
            ["repos", repo.owner.as_str(), repo.name.as_str()]
                .into_iter()
                .chain(rest),
        )
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
    }

    fn into_repository(&self, body: RepoBody) -> Repository {
        Repository {
            url: body.html_url,
            ..Repository::new(&body.owner.login, &body.name)
        }
    }
}

async fn api_error(resp: reqwest::Response) -> ProvisionError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ProvisionError::Api { status, body }
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ProvisionError> {
    resp.json::<T>()
        .await
        .map_err(|e| ProvisionError::Decode(e.to_string()))
}

#[async_trait]
impl HostingApi for GithubClient {
    async fn create_repo(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateOutcome, ProvisionError> {
        let resp = self
            .request(reqwest::Method::POST, self.endpoint(["user", "repos"]))
            .json(&serde_json::json!({
                "name": name,
                "description": description,
                "private": false,
                "auto_init": false,
                "has_projects": false,
                "has_wiki": false,
                "has_downloads": false,
            }))
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 201 => {
                let body: RepoBody = decode(resp).await?;
                Ok(CreateOutcome::Created(self.into_repository(body)))
            }
            // Name already taken on this account.
            422 => Ok(CreateOutcome::AlreadyExists),
            _ => Err(api_error(resp).await),
        }
    }

    async fn get_repo(&self, name: &str) -> Result<Option<Repository>, ProvisionError> {
        let url = self.endpoint(["repos", self.config.owner.as_str(), name]);
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        match resp.status().as_u16() {
            200 => {
                let body: RepoBody = decode(resp).await?;
                Ok(Some(self.into_repository(body)))
            }
            404 => Ok(None),
            _ => Err(api_error(resp).await),
        }
    }

    async fn file_sha(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let url = self.repo_endpoint(repo, std::iter::once("contents").chain(path.split('/')));
        let resp = self
            .request(reqwest::Method::GET, url)
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await?;
        match resp.status().as_u16() {
            200 => {
                let body: ShaBody = decode(resp).await?;
                Ok(Some(body.sha))
            }
            404 => Ok(None),
            _ => Err(api_error(resp).await),
        }
    }

    async fn put_file(
        &self,
        repo: &Repository,
        write: FileWrite<'_>,
    ) -> Result<(), ProvisionError> {
        use base64::Engine;

        let url = self.repo_endpoint(
            repo,
            std::iter::once("contents").chain(write.path.split('/')),
        );
        let mut body = serde_json::json!({
            "message": write.message,
            "content": base64::engine::general_purpose::STANDARD.encode(write.content),
            "branch": &self.config.branch,
            "committer": {
                "name": "pageship",
                "email": "pageship@users.noreply.github.com",
            },
        });
        if let Some(sha) = write.sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        let resp = self
            .request(reqwest::Method::PUT, url)
            .json(&body)
            .send()
            .await?;

        match (resp.status().as_u16(), write.sha) {
            (200 | 201, _) => Ok(()),
            // Unconditional create over an existing file: GitHub asks for a sha.
            (422, None) => Err(ProvisionError::FileExists {
                repo: repo.name.clone(),
                path: write.path.to_string(),
            }),
            (409, Some(sha)) => Err(ProvisionError::StaleWrite {
                repo: repo.name.clone(),
                path: write.path.to_string(),
                sha: sha.to_string(),
            }),
            _ => Err(api_error(resp).await),
        }
    }

    async fn enable_pages(&self, repo: &Repository) -> Result<PagesOutcome, ProvisionError> {
        let resp = self
            .request(reqwest::Method::POST, self.repo_endpoint(repo, ["pages"]))
            .json(&serde_json::json!({
                "source": { "branch": &self.config.branch, "path": "/" }
            }))
            .send()
            .await?;
        match resp.status().as_u16() {
            200 | 201 => Ok(PagesOutcome::Enabled),
            409 => Ok(PagesOutcome::AlreadyEnabled),
            _ => Err(api_error(resp).await),
        }
    }

    async fn latest_commit(&self, repo: &Repository) -> Result<String, ProvisionError> {
        let url = self.repo_endpoint(repo, ["commits", self.config.branch.as_str()]);
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let body: ShaBody = decode(resp).await?;
        Ok(body.sha)
    }
}
