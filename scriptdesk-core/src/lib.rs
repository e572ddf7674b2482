//! # scriptdesk-core
//!
//! Core library for scriptdesk, a conversational assistant that turns
//! natural-language requests into runnable scripts or network-device
//! commands and then reviews, runs, debugs and explains them through a
//! remote backend.
//!
//! This library provides:
//! - Domain types for blocks, artifacts and action results
//! - The conversation store with provenance snapshots, round grouping and
//!   the editing overlay
//! - The action orchestrator and its per-kind state machine
//! - The HTTP client for the assistant backend
//! - Preferences, configuration and logging
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scriptdesk_core::api::HttpAssistantApi;
//! use scriptdesk_core::notify::TracingNotifier;
//! use scriptdesk_core::orchestrator::{perform, Orchestrator};
//! use scriptdesk_core::preferences::{PreferenceStore, TomlPreferenceStore};
//! use scriptdesk_core::Config;
//!
//! # async fn run() -> scriptdesk_core::Result<()> {
//! let config = Config::load()?;
//! let api = HttpAssistantApi::new(&config.backend)?;
//! let preferences = TomlPreferenceStore::default_location().load();
//! let mut orchestrator =
//!     Orchestrator::from_config(&config, preferences, Arc::new(TracingNotifier));
//!
//! let pending = orchestrator.submit_prompt("list the ten largest files")?;
//! let completed = perform(&api, pending).await;
//! orchestrator.complete(completed);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{perform, CompletedAction, Orchestrator, PendingAction};
pub use types::*;

// Public modules
pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod preferences;
pub mod types;
