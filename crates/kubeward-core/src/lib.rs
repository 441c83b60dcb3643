//! Core library for Kubeward.
//!
//! Kubeward stores Kubernetes cluster credentials encrypted at rest and
//! queries registered clusters for live node state. This crate holds all of
//! that logic; the server and CLI crates are thin shells around it.
//!
//! Data flows through the modules like this:
//!
//! ```text
//! keyring ──► codec ──► registry ──► cluster (storage)
//!                 │        │
//!                 └──► secrets (storage)
//!                          │
//!                          └──► kube::auth ──► kube::query ──► kube::node
//! ```
//!
//! - [`keyring`] resolves the master key from an ordered list of sources.
//! - [`codec`] encrypts credential strings and supports hot key rotation.
//! - [`kube`] recovers credentials, talks to the API server and parses nodes.
//! - [`registry`] registers clusters and runs the query pipeline.
//! - [`secrets`] keeps SSH keys and generic credentials under the same codec.
//! - [`executor`] runs Ansible playbooks as a bounded black box.

pub mod cluster;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod keyring;
pub mod kube;
pub mod registry;
pub mod secrets;

pub use cluster::{AuthType, ClusterRecord, ClusterStatus};
pub use codec::EncryptionCodec;
pub use crypto::EncryptionKey;
pub use error::{CryptoError, ExecutorError, KeyError, QueryError, RegistryError, SecretError};
pub use registry::ClusterRegistry;
pub use secrets::SecretStore;
