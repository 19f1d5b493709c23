//! # Synapse Upload
//!
//! Reconciles data files on local storage with records in the Synapse
//! catalog, uploads each file's bytes once to the object store, and binds
//! the resulting URL to the catalog record without ever overwriting a
//! different binding.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │  Scan    │──▶│ Resolver │──▶│ Transport │──▶│ Reconcile │
//! │ data dir │   │ rule+key │   │  Hatrac   │   │  ERMrest  │
//! └──────────┘   └──────────┘   └───────────┘   └───────────┘
//!                      ▲                               │
//!                      └──────── BatchUploader ◀───────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! synapse-upload init                      # write the default config
//! synapse-upload rules                     # show asset mappings
//! synapse-upload upload ./data --dry-run   # classify without network
//! synapse-upload upload ./data             # upload and reconcile
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`mapping`] | Asset mapping rules and dispatch |
//! | [`resolver`] | File name → accession record |
//! | [`transport`] | File → stored object URL |
//! | [`reconcile`] | Guarded catalog updates |
//! | [`upload`] | Batch orchestration |
//! | [`catalog`] | Catalog client (ERMrest) |
//! | [`store`] | Object store client (Hatrac) |

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod resolver;
pub mod scan;
pub mod servers;
pub mod store;
pub mod transport;
pub mod upload;
