//! Core domain engines for the n-kudo control plane.
//!
//! Contains the CA/PKI engine, the enrollment and certificate-renewal
//! pipelines, the heartbeat/leasing orchestration, the offline sweeper, the
//! audit hash chain, and tenant administration. This crate depends on
//! `nkudo-storage` for persistence and knows nothing about HTTP, mTLS
//! termination, or the agent's own process.

pub mod admin;
pub mod audit;
pub mod enrollment;
pub mod error;
pub mod heartbeat;
pub mod pki;
pub mod renewal;
pub mod sweeper;
