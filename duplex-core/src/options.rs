//! Peer configuration options.
//!
//! Mirrors the option surface spelled out by the wire spec: `PrivateKey`,
//! `AuthorizedKeys`, `Name`, `ReconnectInterval`, `ReconnectIntervalMax`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DuplexError;

/// Per-channel queue capacity bound (inbound, outbound, and the Peer's
/// routing/accept queues all share this default).
pub const CHANNEL_QUEUE_HWM: usize = 1024;

/// The reconnect-interval option: either disabled, or a base delay in
/// milliseconds fed to the backoff policy (see [`crate::reconnect`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectInterval {
    /// `Connect` makes one attempt and does not retry on failure.
    Disabled,
    /// Base delay between attempts, in milliseconds.
    Millis(u64),
}

impl Default for ReconnectInterval {
    fn default() -> Self {
        Self::Millis(100)
    }
}

/// The recognized keys for [`PeerOptions::set`]/[`PeerOptions::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    PrivateKey,
    AuthorizedKeys,
    Name,
    ReconnectInterval,
    ReconnectIntervalMax,
}

impl FromStr for OptionKey {
    type Err = DuplexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PrivateKey" => Ok(Self::PrivateKey),
            "AuthorizedKeys" => Ok(Self::AuthorizedKeys),
            "Name" => Ok(Self::Name),
            "ReconnectInterval" => Ok(Self::ReconnectInterval),
            "ReconnectIntervalMax" => Ok(Self::ReconnectIntervalMax),
            other => Err(DuplexError::config(format!("unknown option: {other}"))),
        }
    }
}

/// A typed option value, as passed to `SetOption`/returned by `GetOption`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Path(PathBuf),
    Text(String),
    Millis(i64),
}

/// The live configuration of a `Peer`.
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Path to the private key used for mutual auth. Defaults to
    /// `~/.ssh/id_rsa` (see [`crate::auth::default_private_key_path`]).
    pub private_key: Option<PathBuf>,
    /// Path to the list of permitted remote public keys. Defaults to
    /// `~/.ssh/authorized_keys`.
    pub authorized_keys: Option<PathBuf>,
    /// Textual peer name; if unset, a fresh [`crate::id::PeerId`] is
    /// generated at construction.
    pub name: Option<String>,
    /// Base reconnect delay / whether retry is enabled at all.
    pub reconnect_interval: ReconnectInterval,
    /// `Duration::ZERO` selects the constant-with-jitter policy; non-zero
    /// selects exponential-with-cap, capped at this value.
    pub reconnect_interval_max: Duration,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            private_key: None,
            authorized_keys: None,
            name: None,
            reconnect_interval: ReconnectInterval::default(),
            reconnect_interval_max: Duration::ZERO,
        }
    }
}

impl PeerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `SetOption(opt, value)` call.
    pub fn set(&mut self, key: OptionKey, value: OptionValue) -> Result<(), DuplexError> {
        match (key, value) {
            (OptionKey::PrivateKey, OptionValue::Path(p)) => self.private_key = Some(p),
            (OptionKey::PrivateKey, OptionValue::Text(s)) => self.private_key = Some(PathBuf::from(s)),
            (OptionKey::AuthorizedKeys, OptionValue::Path(p)) => self.authorized_keys = Some(p),
            (OptionKey::AuthorizedKeys, OptionValue::Text(s)) => {
                self.authorized_keys = Some(PathBuf::from(s));
            }
            (OptionKey::Name, OptionValue::Text(s)) => self.name = Some(s),
            (OptionKey::ReconnectInterval, OptionValue::Millis(ms)) => {
                self.reconnect_interval = if ms < 0 {
                    ReconnectInterval::Disabled
                } else {
                    ReconnectInterval::Millis(ms as u64)
                };
            }
            (OptionKey::ReconnectIntervalMax, OptionValue::Millis(ms)) => {
                let ms = ms.max(0) as u64;
                self.reconnect_interval_max = Duration::from_millis(ms);
            }
            (key, value) => {
                return Err(DuplexError::config(format!(
                    "option {key:?} does not accept value {value:?}"
                )));
            }
        }
        Ok(())
    }

    /// Read back a previously set option.
    #[must_use]
    pub fn get(&self, key: OptionKey) -> Option<OptionValue> {
        match key {
            OptionKey::PrivateKey => self.private_key.clone().map(OptionValue::Path),
            OptionKey::AuthorizedKeys => self.authorized_keys.clone().map(OptionValue::Path),
            OptionKey::Name => self.name.clone().map(OptionValue::Text),
            OptionKey::ReconnectInterval => Some(OptionValue::Millis(match self.reconnect_interval {
                ReconnectInterval::Disabled => -1,
                ReconnectInterval::Millis(ms) => ms as i64,
            })),
            OptionKey::ReconnectIntervalMax => {
                Some(OptionValue::Millis(self.reconnect_interval_max.as_millis() as i64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = PeerOptions::default();
        assert_eq!(opts.reconnect_interval, ReconnectInterval::Millis(100));
        assert_eq!(opts.reconnect_interval_max, Duration::ZERO);
        assert!(opts.name.is_none());
    }

    #[test]
    fn negative_reconnect_interval_disables_retry() {
        let mut opts = PeerOptions::new();
        opts.set(OptionKey::ReconnectInterval, OptionValue::Millis(-1)).unwrap();
        assert_eq!(opts.reconnect_interval, ReconnectInterval::Disabled);
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut opts = PeerOptions::new();
        opts.set(OptionKey::Name, OptionValue::Text("fixed-name".into())).unwrap();
        assert_eq!(opts.get(OptionKey::Name), Some(OptionValue::Text("fixed-name".into())));
    }

    #[test]
    fn unknown_option_key_errors() {
        assert!("Bogus".parse::<OptionKey>().is_err());
    }

    #[test]
    fn type_mismatch_is_config_error() {
        let mut opts = PeerOptions::new();
        let err = opts.set(OptionKey::Name, OptionValue::Millis(5)).unwrap_err();
        assert!(matches!(err, DuplexError::Config(_)));
    }
}
