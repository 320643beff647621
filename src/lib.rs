//! TrinityChain node bootstrap - identity, storage and state export
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Identity
//! - [`crypto`] - secp256k1 keys and address derivation
//! - [`keys`] - Node key, validator key with sign state, legacy upgrade
//!
//! ## State
//! - [`storage`] - Versioned key/value store (SQLite)
//! - [`trace`] - Append-only application trace
//! - [`validator_set`] - Validator entries and checks
//! - [`reset`] - Destructive node reset
//!
//! ## Application
//! - [`app`] - Application factory and state exporter traits, reference kvstore
//! - [`export`] - Genesis export
//! - [`node`] - Bootstrap sequence and logging
//!
//! ## Operations & Utilities
//! - [`commands`] - Identity commands
//! - [`version`] - Engine/protocol versions
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`fsutil`] - Atomic file writes

#![forbid(unsafe_code)]

// ============================================================================
// Identity
// ============================================================================
pub mod crypto;
pub mod keys;

// ============================================================================
// State
// ============================================================================
pub mod reset;
pub mod storage;
pub mod trace;
pub mod validator_set;

// ============================================================================
// Application
// ============================================================================
pub mod app;
pub mod export;
pub mod node;

// ============================================================================
// Operations & Utilities
// ============================================================================
pub mod commands;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod version;

pub use error::{NodeError, Result};
