//! Stable peer identity.
//!
//! A [`PeerId`] is a 128-bit random value, rendered as the familiar 36-char
//! hyphenated UUID text form. It is generated once per `Peer` (or supplied
//! via the `Name` option) and exchanged verbatim in the greeting (see
//! `duplex_transport::greeting`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A 128-bit peer identifier, textually a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 16]);

impl PeerId {
    /// Generate a fresh, random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Build a `PeerId` from its raw bytes (as carried on the wire).
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw 16 bytes, as exchanged in the greeting.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

/// Error returned when parsing a textual `PeerId` fails.
#[derive(Debug, Error)]
#[error("invalid peer id: {0}")]
pub struct PeerIdParseError(String);

impl FromStr for PeerId {
    type Err = PeerIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(PeerIdParseError(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(&hex, &mut bytes).map_err(|_| PeerIdParseError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_text() {
        let id = PeerId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        let parsed: PeerId = text.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn two_generated_ids_differ() {
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("not-a-uuid".parse::<PeerId>().is_err());
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn bytes_roundtrip() {
        let bytes = [7u8; 16];
        let id = PeerId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }
}
