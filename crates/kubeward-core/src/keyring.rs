//! Master-key provisioning.
//!
//! The key is resolved from an ordered list of [`KeySource`]s. The first
//! source that yields a key wins. A source that is present but malformed is
//! a hard error: skipping it would silently switch keys mid-deployment and
//! orphan every blob encrypted under the real one.
//!
//! The default order is:
//!
//! 1. explicit configuration value (`KUBEWARD_ENCRYPTION_KEY` / `ENCRYPTION_KEY`)
//! 2. mounted secret file
//! 3. local key files, in order
//! 4. generate a new key and persist it to every local path

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use tracing::{info, warn};

use crate::crypto::{self, ENCODED_KEY_LEN, EncryptionKey, KEY_LEN};
use crate::error::KeyError;

/// One place a master key may come from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A configuration value, e.g. an environment variable. `value` is
    /// `None` when the variable is unset.
    EnvValue { name: String, value: Option<String> },
    /// A secret file mounted by the orchestrator.
    SecretFile(PathBuf),
    /// A local key file. Also a persistence target for [`KeySource::Generate`].
    LocalFile(PathBuf),
    /// Generate a fresh key and persist it to every `LocalFile` in the list.
    Generate,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvValue { name, value } => f
                .debug_struct("EnvValue")
                .field("name", name)
                .field("set", &value.is_some())
                .finish(),
            Self::SecretFile(path) => f.debug_tuple("SecretFile").field(path).finish(),
            Self::LocalFile(path) => f.debug_tuple("LocalFile").field(path).finish(),
            Self::Generate => f.write_str("Generate"),
        }
    }
}

/// Where the active key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    /// A configuration value with this name.
    Env(String),
    /// The mounted secret file.
    SecretFile(PathBuf),
    /// A local key file.
    LocalFile(PathBuf),
    /// Freshly generated; `persisted_to` lists the files it was written to
    /// and is empty when every write failed.
    Generated { persisted_to: Vec<PathBuf> },
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(name) => write!(f, "env:{name}"),
            Self::SecretFile(path) => write!(f, "secret-file:{}", path.display()),
            Self::LocalFile(path) => write!(f, "file:{}", path.display()),
            Self::Generated { persisted_to } => {
                write!(f, "generated ({} copies persisted)", persisted_to.len())
            }
        }
    }
}

/// A validated key plus its origin.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: EncryptionKey,
    pub origin: KeyOrigin,
}

/// Inputs for building the default source list.
#[derive(Clone, Default)]
pub struct KeyProviderConfig {
    /// `(name, value)` of the explicit configuration value, highest priority.
    pub explicit: Option<(String, String)>,
    /// Mounted secret file path.
    pub secret_file: Option<PathBuf>,
    /// Local key files, read in order and used as persistence targets.
    pub local_paths: Vec<PathBuf>,
    /// Whether a missing key may be generated.
    pub allow_generate: bool,
}

impl fmt::Debug for KeyProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProviderConfig")
            .field("explicit", &self.explicit.as_ref().map(|(name, _)| name))
            .field("secret_file", &self.secret_file)
            .field("local_paths", &self.local_paths)
            .field("allow_generate", &self.allow_generate)
            .finish()
    }
}

impl KeyProviderConfig {
    /// The ordered source list this configuration describes.
    #[must_use]
    pub fn sources(&self) -> Vec<KeySource> {
        let mut sources = Vec::with_capacity(self.local_paths.len().saturating_add(3));
        if let Some((name, value)) = &self.explicit {
            sources.push(KeySource::EnvValue {
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
        if let Some(path) = &self.secret_file {
            sources.push(KeySource::SecretFile(path.clone()));
        }
        sources.extend(self.local_paths.iter().cloned().map(KeySource::LocalFile));
        if self.allow_generate {
            sources.push(KeySource::Generate);
        }
        sources
    }

    /// Resolve the key from [`sources`](Self::sources).
    ///
    /// # Errors
    ///
    /// See [`resolve_key`].
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        resolve_key(&self.sources())
    }
}

/// Resolve the master key from `sources`, first success wins.
///
/// # Errors
///
/// - [`KeyError::InvalidFormat`] if a present source holds a malformed key.
/// - [`KeyError::Read`] if an existing key file cannot be read.
/// - [`KeyError::Unavailable`] if no source yields a key and generation is
///   not in the list.
pub fn resolve_key(sources: &[KeySource]) -> Result<ResolvedKey, KeyError> {
    for source in sources {
        let resolved = match source {
            KeySource::EnvValue { name, value } => match value.as_deref() {
                Some(v) if !v.trim().is_empty() => Some(ResolvedKey {
                    key: parse_key(v, name)?,
                    origin: KeyOrigin::Env(name.clone()),
                }),
                _ => None,
            },
            KeySource::SecretFile(path) => read_key_file(path)?.map(|key| ResolvedKey {
                key,
                origin: KeyOrigin::SecretFile(path.clone()),
            }),
            KeySource::LocalFile(path) => read_key_file(path)?.map(|key| ResolvedKey {
                key,
                origin: KeyOrigin::LocalFile(path.clone()),
            }),
            KeySource::Generate => Some(generate_and_persist(sources)),
        };

        if let Some(resolved) = resolved {
            info!(
                origin = %resolved.origin,
                fingerprint = %resolved.key.fingerprint(),
                "encryption key resolved"
            );
            return Ok(resolved);
        }
    }

    Err(KeyError::Unavailable {
        reason: format!("none of {} configured key sources produced a key", sources.len()),
    })
}

/// Parse and validate the 44-character base64-url form of a key.
///
/// Surrounding whitespace is ignored. The decoded key must be exactly 32
/// bytes and must survive an encrypt/decrypt self-test.
///
/// # Errors
///
/// Returns [`KeyError::InvalidFormat`] naming `source_name` on any failure.
pub fn parse_key(encoded: &str, source_name: &str) -> Result<EncryptionKey, KeyError> {
    let invalid = |reason: String| KeyError::InvalidFormat {
        source_name: source_name.to_owned(),
        reason,
    };

    let encoded = encoded.trim();
    if encoded.len() != ENCODED_KEY_LEN {
        return Err(invalid(format!(
            "expected {ENCODED_KEY_LEN} base64-url characters, got {}",
            encoded.len()
        )));
    }

    let decoded = zeroize::Zeroizing::new(
        URL_SAFE
            .decode(encoded)
            .map_err(|e| invalid(format!("not valid base64-url: {e}")))?,
    );
    let bytes: [u8; KEY_LEN] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| invalid(format!("decoded to {} bytes, expected {KEY_LEN}", decoded.len())))?;

    let key = EncryptionKey::from_bytes(bytes);
    crypto::self_test(&key).map_err(|e| invalid(format!("round-trip self-test failed: {e}")))?;
    Ok(key)
}

/// Read a key file. `Ok(None)` if it does not exist.
fn read_key_file(path: &Path) -> Result<Option<EncryptionKey>, KeyError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let contents = zeroize::Zeroizing::new(contents);
            parse_key(&contents, &path.display().to_string()).map(Some)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeyError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Generate a key and write it to every `LocalFile` source.
fn generate_and_persist(sources: &[KeySource]) -> ResolvedKey {
    let key = EncryptionKey::generate();
    let mut persisted_to = Vec::new();

    for source in sources {
        let KeySource::LocalFile(path) = source else {
            continue;
        };
        match write_key_file(path, &key) {
            Ok(()) => {
                info!(path = %path.display(), "generated encryption key persisted");
                persisted_to.push(path.clone());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to persist generated key"),
        }
    }

    if persisted_to.is_empty() {
        warn!(
            fingerprint = %key.fingerprint(),
            "generated encryption key could not be persisted anywhere; \
             data encrypted in this process will be unreadable after a restart"
        );
    }

    ResolvedKey {
        key,
        origin: KeyOrigin::Generated { persisted_to },
    }
}

/// Write `key` to a new file with owner-only permissions.
///
/// The file is created `0600` before any content is written and is never
/// overwritten if it already exists.
///
/// # Errors
///
/// Returns the I/O error from creating the directory or writing the file.
pub fn write_key_file(path: &Path, key: &EncryptionKey) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(key.to_encoded().as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()
}
