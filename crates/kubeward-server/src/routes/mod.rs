//! HTTP route handlers for Kubeward.
//!
//! - `sys`: health, key fingerprint, key rotation
//! - `clusters`: registration, node queries, credential lifecycle
//! - `secrets`: SSH keys and generic credentials

pub mod clusters;
pub mod secrets;
pub mod sys;
