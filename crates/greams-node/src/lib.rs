//! # GReAMS Node
//!
//! Serves a git repository directly to other peers and clones from them,
//! with no central server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       GReAMS Node                        │
//! ├──────────────────────────────────────────────────────────┤
//! │  RepoService (RequestHandler)       fetch (client)       │
//! │   • info/refs advertisement          • info/refs         │
//! │   • git-upload-pack (side-band)      • git-upload-pack   │
//! │   • raw files from the FileStore     • demux + store     │
//! ├──────────────────────────────────────────────────────────┤
//! │  greams-p2p Session: one PeerLink per remote identity    │
//! │   request ids, timeouts, http://{peer}.webrtcpeer/ urls  │
//! ├──────────────────────────────────────────────────────────┤
//! │  Transport: TCP (static directory) or in-memory          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! greams-node --config node.yaml serve --repo-dir ./repo/.git
//! greams-node --config node.yaml fetch --peer <peer-id> --out ./clone
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Node configuration loaded from YAML
//! - [`service`] - Inbound handler serving one repository
//! - [`fetch`] - Client side of a clone over a session
//! - [`store`] - File storage on disk or in memory
//! - [`git_cli`] - Pack source backed by the `git` binary
//! - [`observability`] - Structured logging

pub mod config;
mod error;
pub mod fetch;
pub mod git_cli;
pub mod observability;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{NodeError, Result};
pub use fetch::{fetch, FetchOutcome};
pub use git_cli::GitCli;
pub use service::RepoService;
pub use store::{DiskStore, FileStore, MemoryStore};
