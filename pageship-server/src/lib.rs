//! pageship: turns a task brief into a live GitHub Pages site.
//!
//! Two rounds per task:
//! - Build: generate an app, create the repository, publish, enable pages
//! - Revise: regenerate and update the same repository in place
//!
//! Either way the result is reported to the caller's evaluation callback.

pub mod config;
pub mod error;
pub mod github;
pub mod llm;
pub mod notifier;
pub mod pipeline;
pub mod provisioner;
pub mod request;
pub mod templates;
pub mod web;
