//! # Excerpt Courier
//!
//! A self-hosted service that delivers bite-sized reading excerpts from
//! PDF/EPUB documents over a messaging channel — on demand, or on a
//! recurring per-user schedule with full timezone support.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────┐   ┌──────────┐
//! │  Library   │──▶│ ProcessingCache │──▶│  SQLite   │
//! │ PDF/EPUB  │   │ extract+segment │   │  store    │
//! └───────────┘   └────────────────┘   └────┬─────┘
//!                                           │
//!                     ┌─────────────────────┤
//!                     ▼                     ▼
//!               ┌──────────┐         ┌───────────┐
//!               │ CLI/HTTP │         │ Scheduler  │
//!               │ commands │         │ poll loop  │
//!               └────┬─────┘         └────┬──────┘
//!                    └─────────┬──────────┘
//!                              ▼
//!                        ┌──────────┐
//!                        │ Notifier │
//!                        └──────────┘
//! ```
//!
//! Processing runs exactly once per distinct content: documents are keyed
//! by a SHA-256 fingerprint of their bytes, and concurrent requests for the
//! same identity share a single in-flight extraction. Delivery advances a
//! user's position only after the channel confirms the send, and the
//! schedule's last-delivery timestamp makes each due window fire at most
//! once, whether the poll loop or an on-demand request gets there first.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`scan`] | Library directory scanner |
//! | [`extract`] | PDF/EPUB text extraction |
//! | [`segment`] | Sentence-aligned excerpt segmentation |
//! | [`cache`] | Single-flight document processing cache |
//! | [`store`] | Transactional storage (SQLite + in-memory) |
//! | [`clock`] | Timezone-aware due-instant computation |
//! | [`deliver`] | Shared delivery path with retry/backoff |
//! | [`scheduler`] | Recurring delivery poll loop |
//! | [`notify`] | Delivery channel adapters |
//! | [`format`] | Message rendering for the transport |
//! | [`server`] | HTTP command API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod deliver;
pub mod error;
pub mod extract;
pub mod format;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod scan;
pub mod scheduler;
pub mod segment;
pub mod server;
pub mod store;
