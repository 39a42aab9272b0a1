//! Key-material path resolution and loading.
//!
//! Resolves the default private-key/authorized-keys paths and reads their
//! raw bytes. Deliberately stays free of any cryptographic key types —
//! turning raw bytes into an X25519 keypair is `duplex_transport`'s job,
//! keeping this crate transport-agnostic.

use std::path::{Path, PathBuf};

use crate::error::DuplexError;

/// Default private key path, `~/.ssh/id_rsa`, expanded against `$HOME`.
pub fn default_private_key_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".ssh").join("id_rsa"))
}

/// Default authorized-keys path, `~/.ssh/authorized_keys`, expanded
/// against `$HOME`.
pub fn default_authorized_keys_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".ssh").join("authorized_keys"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Expand a leading `~` or `~/...` in `path` against `$HOME`. Paths that
/// don't start with `~` are returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(text) = path.to_str().ok_or(()) else {
        return path.to_path_buf();
    };
    if text == "~" {
        return home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Load a private key's raw bytes from `path`, expanding `~`.
pub fn load_private_key(path: &Path) -> Result<Vec<u8>, DuplexError> {
    let resolved = expand_tilde(path);
    std::fs::read(&resolved)
        .map_err(|e| DuplexError::auth(format!("failed to read private key {}: {e}", resolved.display())))
}

/// Parse an `authorized_keys`-style file: one hex-encoded public key per
/// line, blank lines and `#`-prefixed comments ignored.
pub fn load_authorized_keys(path: &Path) -> Result<Vec<[u8; 32]>, DuplexError> {
    let resolved = expand_tilde(path);
    let text = std::fs::read_to_string(&resolved)
        .map_err(|e| DuplexError::auth(format!("failed to read authorized keys {}: {e}", resolved.display())))?;

    let mut keys = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bytes = hex::decode(line).map_err(|e| {
            DuplexError::auth(format!("{}:{}: invalid hex-encoded key: {e}", resolved.display(), lineno + 1))
        })?;
        let key: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            DuplexError::auth(format!(
                "{}:{}: expected 32-byte key, got {} bytes",
                resolved.display(),
                lineno + 1,
                v.len()
            ))
        })?;
        keys.push(key);
    }
    Ok(keys)
}
