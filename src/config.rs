//! Transform configuration.
//!
//! Everything here is validated once at startup. Nothing is persisted and
//! nothing changes while traffic flows.

use std::fmt;

use crate::checksum::ChecksumMode;
use crate::error::ConfigError;
use crate::modifier::LeadingToken;

/// Longest key accepted by the XOR cipher.
pub const MAX_KEY_LEN: usize = 32;

/// Immutable XOR key, 1..=32 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TransformKey {
    bytes: Vec<u8>,
}

impl TransformKey {
    pub fn from_raw(raw: &[u8]) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(ConfigError::KeyTooLong {
                len: raw.len(),
                max: MAX_KEY_LEN,
            });
        }
        Ok(Self {
            bytes: raw.to_vec(),
        })
    }

    pub fn from_hex(digits: &str) -> Result<Self, ConfigError> {
        if digits.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if digits.len() > MAX_KEY_LEN * 2 {
            return Err(ConfigError::HexKeyTooLong {
                digits: digits.len(),
                max: MAX_KEY_LEN * 2,
            });
        }
        if digits.len() % 2 != 0 {
            return Err(ConfigError::OddHexDigits);
        }
        let bytes = hex::decode(digits).map_err(|e| match e {
            hex::FromHexError::InvalidHexCharacter { c, index } => {
                ConfigError::InvalidHexChar { c, index }
            }
            _ => ConfigError::OddHexDigits,
        })?;
        Self::from_raw(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Keys with any non-printable byte are rendered as hex.
    fn needs_hex(&self) -> bool {
        self.bytes.iter().any(|b| !(0x20..=0x7e).contains(b))
    }

    /// Option form that reproduces this key on the command line.
    pub fn save(&self) -> String {
        if self.needs_hex() {
            format!("--hex-key \"{}\"", hex::encode(&self.bytes))
        } else {
            format!("--key {}", self)
        }
    }
}

// Keys are secrets; keep them out of `{:?}` output in logs.
impl fmt::Debug for TransformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformKey")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl fmt::Display for TransformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_hex() {
            return write!(f, "\"{}\"", hex::encode(&self.bytes));
        }
        f.write_str("\"")?;
        for &b in &self.bytes {
            if b == b'\\' || b == b'"' {
                write!(f, "\\{}", b as char)?;
            } else {
                write!(f, "{}", b as char)?;
            }
        }
        f.write_str("\"")
    }
}

/// The two mutually exclusive ways of supplying a key.
#[derive(Debug, Clone, Default)]
pub struct KeyArgs {
    pub key: Option<String>,
    pub hex_key: Option<String>,
}

impl KeyArgs {
    pub fn resolve(&self) -> Result<TransformKey, ConfigError> {
        match (&self.key, &self.hex_key) {
            (Some(raw), None) => TransformKey::from_raw(raw.as_bytes()),
            (None, Some(digits)) => TransformKey::from_hex(digits),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingKeys),
            (None, None) => Err(ConfigError::NoKey),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransformSpec {
    Xor(KeyArgs),
    Uwu(LeadingToken),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub transform: TransformSpec,
    pub checksum: ChecksumMode,
}
