//! Node and validator key management
//!
//! Both loaders are idempotent: existing files are parsed and returned,
//! missing files are generated and persisted. A file that exists but
//! cannot be parsed is reported as corrupt and left untouched.

pub mod legacy;
pub mod node_key;
pub mod validator;

pub use legacy::{upgrade_legacy_validator, LegacyUpgrade};
pub use node_key::{load_or_generate_node_key, NodeKey};
pub use validator::{
    load_or_generate_validator_key, LastSignState, SignStep, ValidatorKey,
};
