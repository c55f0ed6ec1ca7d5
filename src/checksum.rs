//! Internet checksum (RFC 1071) and transport checksum repair.

use std::net::Ipv4Addr;

use crate::error::DropReason;
use crate::header::HeaderView;
use crate::modifier::PayloadModifier;
use crate::packet::{ChecksumState, Packet, Writable};

/// How the transport checksum is restored after the payload changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ChecksumMode {
    /// Write the final checksum. The payload part is summed during the walk.
    #[default]
    Full,
    /// Seed the field with the pseudo-header sum and mark the packet partial,
    /// leaving the rest to whoever transmits it.
    Deferred,
}

/// One's complement running sum that can be fed arbitrarily split byte
/// ranges. A trailing odd byte is carried into the next `add`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    sum: u64,
    odd: Option<u8>,
}

impl Accumulator {
    pub fn add(&mut self, mut bytes: &[u8]) {
        if let Some(hi) = self.odd.take() {
            match bytes.split_first() {
                Some((&lo, rest)) => {
                    self.sum += u16::from_be_bytes([hi, lo]) as u64;
                    bytes = rest;
                }
                None => {
                    self.odd = Some(hi);
                    return;
                }
            }
        }
        let mut words = bytes.chunks_exact(2);
        for w in &mut words {
            self.sum += u16::from_be_bytes([w[0], w[1]]) as u64;
        }
        if let [last] = words.remainder() {
            self.odd = Some(*last);
        }
    }

    /// Adds a 16-bit word. Only valid on an even byte boundary.
    pub fn add_word(&mut self, word: u16) {
        self.sum += word as u64;
    }

    /// Appends a sum taken over bytes that start on an even boundary right
    /// after this one's bytes.
    pub fn append(&mut self, other: Accumulator) {
        self.sum += other.fold() as u64;
    }

    /// Folded 16-bit sum, not complemented. A dangling odd byte is padded
    /// with zero.
    pub fn fold(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(hi) = self.odd {
            sum += (hi as u64) << 8;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        sum as u16
    }
}

/// Sum of the IPv4 pseudo-header.
///
/// ```text
/// +--------+--------+--------+--------+
/// |          Source Address           |
/// +--------+--------+--------+--------+
/// |        Destination Address        |
/// +--------+--------+--------+--------+
/// |  Zero  |Protocol| Transport Length|
/// +--------+--------+--------+--------+
/// ```
pub fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: usize) -> Accumulator {
    let mut acc = Accumulator::default();
    acc.add(&src.octets());
    acc.add(&dst.octets());
    acc.add_word(protocol as u16);
    // lengths above 0xFFFF cannot come from a valid IPv4 packet; fold keeps
    // the arithmetic total anyway
    acc.add_word((len & 0xFFFF) as u16);
    acc.add_word((len >> 16) as u16);
    acc
}

/// Checksum of a contiguous transport segment, for verification. Returns 0
/// when `segment` already carries a correct checksum.
#[cfg(test)]
pub fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut acc = pseudo_header(src, dst, protocol, segment.len());
    acc.add(segment);
    !acc.fold()
}

/// Wraps a modifier so the rewritten payload bytes are summed as they are
/// produced. The payload is never read a second time for the checksum.
pub struct Summed<'m, M>(pub &'m M);

impl<M: PayloadModifier> PayloadModifier for Summed<'_, M> {
    type State = (M::State, Accumulator);

    fn start(&self, packet: &Packet<'_>, payload_offset: usize) -> Self::State {
        (self.0.start(packet, payload_offset), Accumulator::default())
    }

    fn transform(&self, chunk: &mut [u8], (state, mut acc): Self::State) -> Self::State {
        let state = self.0.transform(chunk, state);
        acc.add(chunk);
        (state, acc)
    }
}

/// UDP arriving with a zero checksum has checksumming disabled and keeps it
/// that way.
fn wants_checksum(view: &HeaderView) -> bool {
    !(view.protocol.is_udp() && view.transport_checksum == 0)
}

/// Writes the final checksum. `payload_sum` covers `[payload_offset, len)`
/// after mutation.
pub fn fix_full(
    packet: &mut Writable<'_, '_>,
    view: &HeaderView,
    payload_sum: Accumulator,
) -> Result<(), DropReason> {
    if !wants_checksum(view) {
        return Ok(());
    }

    let header_len = view.payload_offset - view.thoff;
    let mut header = [0u8; 60];
    let header = &mut header[..header_len];
    packet
        .packet()
        .copy_bits(view.thoff, header)
        .ok_or(DropReason::ChecksumUnwritable)?;
    let field = view.protocol.checksum_offset();
    header[field..field + 2].fill(0);

    let mut acc = pseudo_header(view.src, view.dst, view.protocol.number(), view.transport_len());
    acc.add(header);
    acc.append(payload_sum);
    let mut csum = !acc.fold();
    if view.protocol.is_udp() && csum == 0 {
        csum = 0xFFFF;
    }

    packet.write_bits(view.thoff + field, &csum.to_be_bytes())?;
    packet.set_checksum_state(ChecksumState::Complete);
    Ok(())
}

/// Seeds the checksum field with the pseudo-header sum and marks the packet
/// for deferred completion.
pub fn fix_deferred(packet: &mut Writable<'_, '_>, view: &HeaderView) -> Result<(), DropReason> {
    if !wants_checksum(view) {
        return Ok(());
    }

    let field = view.protocol.checksum_offset();
    let seed = pseudo_header(view.src, view.dst, view.protocol.number(), view.transport_len()).fold();
    packet.write_bits(view.thoff + field, &seed.to_be_bytes())?;
    packet.set_checksum_state(ChecksumState::Partial {
        start: view.thoff,
        offset: field,
        mangle_zero: view.protocol.is_udp(),
    });
    Ok(())
}
