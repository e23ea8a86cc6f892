//! Relational storage layer for the n-kudo control plane.
//!
//! Every repository function here is a thin, parameterized SQL query
//! scoped by `tenant_id` wherever the row carries one — tenant isolation
//! is structural (composite `(id, tenant_id)` foreign keys), not an
//! application-level filter that can be forgotten. This crate knows
//! nothing about HTTP, mTLS, or CSR validation; `nkudo-core` builds the
//! business rules on top of these primitives.

pub mod agent;
pub mod audit;
pub mod enrollment;
pub mod error;
pub mod execution_log;
pub mod host;
pub mod leader_lease;
pub mod microvm;
pub mod models;
pub mod plan;
pub mod pki_store;
pub mod pool;
pub mod site;
pub mod tenant;
pub mod token_store;

pub use error::StoreError;
pub use pool::connect;
