//! graphkit: Microsoft Graph access layer.
//!
//! Multi-account device-code sign-in with a persisted token cache, a request
//! engine with retry and typed errors, lazy pagination, resumable uploads and
//! unified search.
//!
//! # Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use graphkit::config::GraphConfig;
//! use graphkit::graph::GraphClient;
//!
//! # async fn example() -> graphkit::error::Result<()> {
//! let client = GraphClient::from_config(&GraphConfig::from_env())?;
//! let account = client.accounts().list_accounts().remove(0);
//! let mut inbox = client.paginate(
//!     "/me/mailFolders/inbox/messages",
//!     &account.account_id,
//!     &[("$select", "subject,from")],
//!     Some(20),
//! );
//! while let Some(message) = inbox.next().await {
//!     println!("{}", message?["subject"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod search;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
