//! # Marketplace Ledger SDK
//!
//! Keeps the order book of an NFT marketplace consistent with the marketplace
//! contract, and validates new listings and bids before they are stored.
//!
//! ## Overview
//!
//! Orders are signed off-chain and stored in a database. The contract is the
//! source of truth for approvals, cancellations, nonce increments and matches;
//! the SDK replays its event logs into the ledger.
//!
//! ## Architecture
//!
//! ### Reconciliation Layer
//! [`orchestrator::SyncOrchestrator`] reads the stored block cursor, fetches
//! logs for each event kind through [`range_splitter::RangeSplitter`] (which
//! bisects ranges the node refuses) and hands every log to its
//! [`classifiers::EventClassifier`]. Logs that keep failing end up in
//! [`quarantine::LogQuarantine`].
//!
//! ### Validation Layer
//! [`order_validator::OrderValidator`] runs the signature/hash gate and the
//! bid-against-listing gate, asking the contract through
//! [`authority::ChainAuthority`]. [`market::MarketService`] persists what passes.
//!
//! ### Storage Layer
//! [`ledger::OrderLedger`] and [`cursor_store::CursorStore`] abstract the
//! database. Postgres implementations live in [`database`]; in-memory ones are
//! provided for tests and dry runs.

// Core Types
/// Orders, assets, swaps and column conversions
pub mod types;
/// Marketplace event layouts and log decoding
pub mod events;

// Reconciliation Layer
/// Log fetching behind the `LogSource` seam
pub mod chain_reader;
/// Bisecting range scans
pub mod range_splitter;
/// Per-event ledger writers
pub mod classifiers;
/// Failed-log retry and quarantine
pub mod quarantine;
/// Per-chain sync passes
pub mod orchestrator;

// Validation Layer
/// Contract view calls used for validation
pub mod authority;
/// Order and bid validation gates
pub mod order_validator;
/// Listing and bid creation
pub mod market;

// Storage
/// Order ledger abstraction
pub mod ledger;
/// Block cursor persistence
pub mod cursor_store;
/// PostgreSQL database integration
pub mod database;

// Infrastructure
/// RPC provider pool with load balancing
pub mod rpc_pool;
/// Metrics and observability
pub mod metrics;
/// Marketplace contract ABI
pub mod contracts;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use classifiers::EventClassifier;
pub use ledger::{InMemoryLedger, OrderLedger};
pub use market::MarketService;
pub use order_validator::OrderValidator;
pub use orchestrator::SyncOrchestrator;
pub use settings::Settings;
