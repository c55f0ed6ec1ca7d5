//! In-memory packet made of a chain of discontiguous fragments.
//!
//! Logical byte order is: a fragment's own head bytes, then each of its
//! sub-fragments in order, recursively. Storage is `Cow`, borrowed storage is
//! shared and never written. Mutation is only reachable through [`Writable`],
//! which [`Packet::make_writable`] hands out once every fragment is owned.

use std::borrow::Cow;

use crate::checksum::Accumulator;
use crate::error::DropReason;

pub mod walker;

pub use walker::walk;

#[derive(Debug, Clone)]
pub struct Fragment<'a> {
    data: Cow<'a, [u8]>,
    frags: Vec<Fragment<'a>>,
}

impl<'a> Fragment<'a> {
    pub fn borrowed(data: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(data),
            frags: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn owned(data: Vec<u8>) -> Self {
        Self {
            data: Cow::Owned(data),
            frags: Vec::new(),
        }
    }

    /// Attach a sub-chain that follows this fragment's head bytes.
    #[cfg(test)]
    pub fn with_frags(mut self, frags: Vec<Fragment<'a>>) -> Self {
        self.frags = frags;
        self
    }

    #[cfg(test)]
    pub fn is_shared(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }
}

// Iterative, so nesting depth never reaches the call stack.
impl Drop for Fragment<'_> {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.frags);
        while let Some(mut frag) = pending.pop() {
            pending.append(&mut frag.frags);
        }
    }
}

/// Transport checksum status, the userspace analogue of `ip_summed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumState {
    /// The checksum field holds a final value (or UDP "no checksum").
    Complete,
    /// The field holds the folded pseudo-header sum. Whoever transmits the
    /// packet must sum `[start, len)` and store the complement at
    /// `start + offset`.
    Partial {
        start: usize,
        offset: usize,
        /// UDP: a computed zero goes out as `0xFFFF`.
        mangle_zero: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Packet<'a> {
    frags: Vec<Fragment<'a>>,
    checksum: ChecksumState,
}

impl<'a> Packet<'a> {
    pub fn new(frags: Vec<Fragment<'a>>) -> Self {
        Self {
            frags,
            checksum: ChecksumState::Complete,
        }
    }

    /// A single shared fragment over `data`, e.g. an NFQUEUE payload.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(vec![Fragment::borrowed(data)])
    }

    pub fn len(&self) -> usize {
        self.heads().map(<[u8]>::len).sum()
    }

    #[cfg(test)]
    pub fn checksum_state(&self) -> ChecksumState {
        self.checksum
    }

    /// Head regions of every fragment, in logical byte order.
    pub fn heads(&self) -> Heads<'_, 'a> {
        Heads {
            stack: self.frags.iter().rev().collect(),
        }
    }

    /// Logical bytes starting at `offset`.
    pub fn bytes_from(&self, offset: usize) -> impl Iterator<Item = u8> + '_ {
        self.heads().flatten().copied().skip(offset)
    }

    /// Copies `buf.len()` bytes at `offset` out of the chain, crossing
    /// fragment boundaries as needed. `None` if the range runs off the end.
    pub fn copy_bits(&self, offset: usize, buf: &mut [u8]) -> Option<()> {
        let end = offset.checked_add(buf.len())?;
        let mut pos = 0;
        let mut copied = 0;
        for head in self.heads() {
            let next = pos + head.len();
            if next > offset && pos < end {
                let from = offset.max(pos);
                let to = end.min(next);
                buf[from - offset..to - offset].copy_from_slice(&head[from - pos..to - pos]);
                copied += to - from;
            }
            if next >= end {
                break;
            }
            pos = next;
        }
        (copied == buf.len()).then_some(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for head in self.heads() {
            out.extend_from_slice(head);
        }
        out
    }

    /// Copy-on-write step. Every shared fragment is copied into owned storage
    /// before the token is returned, so a failure here leaves no byte mutated.
    pub fn make_writable(&mut self) -> Result<Writable<'_, 'a>, DropReason> {
        let mut stack: Vec<&mut Fragment<'a>> = self.frags.iter_mut().collect();
        while let Some(frag) = stack.pop() {
            if let Cow::Borrowed(shared) = frag.data {
                let mut owned = Vec::new();
                owned
                    .try_reserve_exact(shared.len())
                    .map_err(|_| DropReason::NotWritable)?;
                owned.extend_from_slice(shared);
                frag.data = Cow::Owned(owned);
            }
            stack.extend(frag.frags.iter_mut());
        }
        Ok(Writable { packet: self })
    }

    /// Completes a deferred checksum the way offload hardware would.
    pub fn finish_checksum(&mut self) -> Result<(), DropReason> {
        let ChecksumState::Partial {
            start,
            offset,
            mangle_zero,
        } = self.checksum
        else {
            return Ok(());
        };

        let mut acc = Accumulator::default();
        let mut pos = 0;
        for head in self.heads() {
            let next = pos + head.len();
            if next > start {
                acc.add(&head[start.saturating_sub(pos)..]);
            }
            pos = next;
        }
        let mut csum = !acc.fold();
        if mangle_zero && csum == 0 {
            csum = 0xFFFF;
        }

        let mut writable = self
            .make_writable()
            .map_err(|_| DropReason::ChecksumUnwritable)?;
        writable.write_bits(start + offset, &csum.to_be_bytes())?;
        writable.set_checksum_state(ChecksumState::Complete);
        Ok(())
    }
}

/// Pre-order iterator over fragment head regions.
pub struct Heads<'p, 'a> {
    stack: Vec<&'p Fragment<'a>>,
}

impl<'p, 'a> Iterator for Heads<'p, 'a> {
    type Item = &'p [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let frag = self.stack.pop()?;
        self.stack.extend(frag.frags.iter().rev());
        Some(&*frag.data)
    }
}

/// Proof of exclusive, writable ownership of every fragment of a packet.
pub struct Writable<'p, 'a> {
    packet: &'p mut Packet<'a>,
}

impl<'p, 'a> Writable<'p, 'a> {
    pub fn packet(&self) -> &Packet<'a> {
        &*self.packet
    }

    pub fn len(&self) -> usize {
        self.packet.len()
    }

    pub fn heads_mut(&mut self) -> HeadsMut<'_, 'a> {
        HeadsMut {
            stack: self.packet.frags.iter_mut().rev().collect(),
        }
    }

    /// Overwrites `src.len()` bytes at `offset`, crossing fragment
    /// boundaries as needed. Nothing is written if the range runs off the end.
    pub fn write_bits(&mut self, offset: usize, src: &[u8]) -> Result<(), DropReason> {
        let end = offset
            .checked_add(src.len())
            .ok_or(DropReason::ChecksumUnwritable)?;
        if end > self.len() {
            return Err(DropReason::ChecksumUnwritable);
        }
        let mut pos = 0;
        for head in self.heads_mut() {
            let next = pos + head.len();
            if next > offset && pos < end {
                let from = offset.max(pos);
                let to = end.min(next);
                head[from - pos..to - pos].copy_from_slice(&src[from - offset..to - offset]);
            }
            if next >= end {
                break;
            }
            pos = next;
        }
        Ok(())
    }

    pub fn set_checksum_state(&mut self, state: ChecksumState) {
        self.packet.checksum = state;
    }
}

/// Pre-order iterator over mutable head regions. The explicit stack keeps
/// traversal depth off the call stack.
pub struct HeadsMut<'p, 'a> {
    stack: Vec<&'p mut Fragment<'a>>,
}

impl<'p, 'a> Iterator for HeadsMut<'p, 'a> {
    type Item = &'p mut [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let Fragment { data, frags } = self.stack.pop()?;
        self.stack.extend(frags.iter_mut().rev());
        Some(data.to_mut().as_mut_slice())
    }
}
