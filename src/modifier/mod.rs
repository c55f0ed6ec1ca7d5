use std::fmt;

use crate::packet::Packet;

mod uwu;
mod xor;

pub use uwu::{LeadingToken, UwuFilter};
pub use xor::XorCipher;

/// A byte transform applied to the application payload one contiguous
/// sub-range at a time. `State` carries whatever must survive a fragment
/// boundary so the result does not depend on where the packet is split.
pub trait PayloadModifier {
    type State;

    /// Fresh per-packet state. Runs before any byte is rewritten and may look
    /// at the whole payload starting at `payload_offset`.
    fn start(&self, packet: &Packet<'_>, payload_offset: usize) -> Self::State;

    fn transform(&self, chunk: &mut [u8], state: Self::State) -> Self::State;
}

/// The configured transform, chosen once at startup. The engine dispatches
/// on the variant and drives the inner modifier with its own state type.
#[derive(Debug, Clone)]
pub enum Transform {
    Xor(XorCipher),
    Uwu(UwuFilter),
}

impl Transform {
    /// Command-line form that reproduces this transform.
    pub fn save(&self) -> String {
        match self {
            Transform::Xor(x) => format!("xor {}", x.key().save()),
            Transform::Uwu(u) => format!("uwu --leading-token {}", u.leading_token()),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Xor(x) => write!(f, "xor(key_len={})", x.key().len()),
            Transform::Uwu(u) => write!(f, "uwu(leading_token={})", u.leading_token()),
        }
    }
}
