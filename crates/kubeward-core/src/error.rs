//! Error types for `kubeward-core`.
//!
//! One enum per subsystem. Variants carry enough context to diagnose a
//! failure from the log line alone, but never key material, tokens, or
//! kubeconfig contents. Key errors name the source (env var or path), not
//! the value.

use kubeward_storage::StorageError;

/// Errors from the low-level cipher and from the codec built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// The blob could not be decrypted: wrong key, corrupted encoding,
    /// truncated input, or a tampered tag. Upstream this means the cluster
    /// must be re-registered.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Ciphertext is too short to contain a nonce and a tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
}

/// Errors from master-key resolution.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// No source produced a key and none could be generated.
    #[error("encryption key unavailable: {reason}")]
    Unavailable { reason: String },

    /// A key source was present but its value is not a valid key. Fatal at
    /// startup: falling through to another source would switch keys.
    #[error("invalid encryption key from {source_name}: {reason}")]
    InvalidFormat { source_name: String, reason: String },

    /// A key file exists but could not be read.
    #[error("failed to read key file '{path}': {reason}")]
    Read { path: String, reason: String },
}

/// Errors from a live cluster query.
///
/// All three are recoverable: callers keep the last-known counts and decide
/// on their own retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The API server was unreachable, refused the connection, or the query
    /// timed out.
    #[error("unable to connect to the Kubernetes API: {reason}")]
    Connect { reason: String },

    /// The API server rejected the credentials (401/403).
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// The query returned a non-zero status or output that is not a node list.
    #[error("unexpected response from the Kubernetes API: {reason}")]
    Parse { reason: String },
}

impl QueryError {
    /// Short machine-readable code for the failure class.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect_error",
            Self::Auth { .. } => "auth_error",
            Self::Parse { .. } => "parse_error",
        }
    }

    /// Client-facing description of the failure class. Unlike `Display`,
    /// never includes the raw diagnostic.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "unable to connect to the Kubernetes API server",
            Self::Auth { .. } => "the Kubernetes API server rejected the cluster credentials",
            Self::Parse { .. } => "unexpected response from the Kubernetes API server",
        }
    }
}

/// Errors from cluster registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registration or update input was rejected before any side effect.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Another cluster owned by the same user already has this name.
    #[error("cluster with name '{name}' already exists")]
    Conflict { name: String },

    /// No cluster with this id belongs to the caller.
    #[error("cluster not found: {id}")]
    NotFound { id: String },

    /// The stored credential blob cannot be decrypted with the active key.
    #[error("credentials for cluster {id} are unavailable; re-register the cluster")]
    CredentialsUnavailable { id: String },

    /// The codec failed while encrypting or decrypting a credential.
    #[error("registry crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A stored record could not be serialized or deserialized.
    #[error("corrupt cluster record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// The storage backend failed.
    #[error("registry storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the SSH key and credential store.
///
/// `kind` is `"ssh key"` or `"credential"`.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Input was rejected before anything was encrypted or stored.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The caller already has a secret of this kind with this name.
    #[error("{kind} with name '{name}' already exists")]
    Conflict { kind: &'static str, name: String },

    /// No secret with this id belongs to the caller.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A stored blob cannot be decrypted with the active key.
    #[error("{kind} {id} cannot be decrypted with the active key; store it again")]
    Unreadable { kind: &'static str, id: String },

    #[error("secret crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A stored record could not be serialized or deserialized.
    #[error("corrupt secret record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("secret storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from preparing a playbook run.
///
/// These never escape the executor: they are folded into a failed
/// [`ExecutionOutput`](crate::executor::ExecutionOutput).
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A temporary input file could not be created or written.
    #[error("failed to stage {what}: {reason}")]
    Staging { what: &'static str, reason: String },

    /// The executor binary could not be started.
    #[error("failed to launch '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// Extra variables could not be encoded.
    #[error("failed to encode extra vars: {reason}")]
    ExtraVars { reason: String },
}
