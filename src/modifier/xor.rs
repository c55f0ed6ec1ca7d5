use crate::config::TransformKey;
use crate::modifier::PayloadModifier;
use crate::packet::Packet;

/// Cyclic-key XOR. The key cursor carries across sub-ranges, so the
/// keystream is the same as XOR-ing the whole payload in one go.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: TransformKey,
}

impl XorCipher {
    pub fn new(key: TransformKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &TransformKey {
        &self.key
    }
}

impl PayloadModifier for XorCipher {
    type State = usize;

    fn start(&self, _packet: &Packet<'_>, _payload_offset: usize) -> usize {
        0
    }

    fn transform(&self, chunk: &mut [u8], mut key_off: usize) -> usize {
        let key = self.key.as_bytes();
        for b in chunk {
            *b ^= key[key_off];
            key_off += 1;
            if key_off == key.len() {
                key_off = 0;
            }
        }
        key_off
    }
}
