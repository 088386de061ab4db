//! Process configuration: command-line flags with environment fallbacks.

use std::time::Duration;

use clap::Parser;

use crate::github::GithubConfig;
use crate::notifier::NotifierSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "pageship", about = "Brief-to-GitHub-Pages deployment service")]
pub struct Config {
    /// HTTP listen address.
    #[arg(long, env = "PAGESHIP_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Shared secret every task request must carry.
    #[arg(long, env = "STUDENT_SECRET", hide_env_values = true)]
    pub secret: String,

    /// GitHub token with repo and pages scope.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// GitHub account that owns the generated repositories.
    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_username: String,

    /// GitHub REST API base URL.
    #[arg(long, default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// Branch files are committed to and pages are served from.
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Per-request timeout for GitHub API calls.
    #[arg(long, default_value_t = 30)]
    pub github_timeout_secs: u64,

    /// Anthropic API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Claude model used for generation.
    #[arg(long, default_value = "claude-sonnet-4-20250514")]
    pub model: String,

    /// Output token budget per generation.
    #[arg(long, default_value_t = 8192)]
    pub max_tokens: u32,

    /// Delivery attempts for the evaluation callback.
    #[arg(long, default_value_t = 5)]
    pub notify_attempts: u32,

    /// Delay before the first callback retry, doubled after each failure.
    #[arg(long, default_value_t = 2000)]
    pub notify_backoff_ms: u64,

    /// Upper bound on the callback retry delay.
    #[arg(long, default_value_t = 60_000)]
    pub notify_max_backoff_ms: u64,

    /// Per-attempt callback request timeout.
    #[arg(long, default_value_t = 30)]
    pub notify_timeout_secs: u64,

    /// Wait after enabling pages before reading back the commit.
    #[arg(long, default_value_t = 5)]
    pub pages_settle_secs: u64,
}

impl Config {
    pub fn github(&self) -> GithubConfig {
        GithubConfig {
            api_url: self.github_api_url.clone(),
            token: self.github_token.clone(),
            owner: self.github_username.clone(),
            branch: self.branch.clone(),
            request_timeout: Duration::from_secs(self.github_timeout_secs),
        }
    }

    pub fn notifier(&self) -> NotifierSettings {
        NotifierSettings {
            max_attempts: self.notify_attempts,
            initial_backoff: Duration::from_millis(self.notify_backoff_ms),
            max_backoff: Duration::from_millis(self.notify_max_backoff_ms),
            request_timeout: Duration::from_secs(self.notify_timeout_secs),
        }
    }

    pub fn pages_settle(&self) -> Duration {
        Duration::from_secs(self.pages_settle_secs)
    }
}
