//! Tamper-evident audit log of authentication decisions.
//!
//! Every event stores the hash of its predecessor and a SHA-256 over its own
//! content, starting from [`GENESIS_HASH`]. Editing, deleting or reordering
//! stored events breaks [`verify_chain`].

pub mod recorder;
pub mod models;

pub use recorder::AuditLog;
pub use models::{
    AuditAction, AuditEvent, ChainError, GENESIS_HASH, NewAuditEvent, audit_timestamp,
    canonical_json, verify_chain, verify_segment,
};
