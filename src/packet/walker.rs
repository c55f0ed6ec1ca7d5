use crate::modifier::PayloadModifier;
use crate::packet::Writable;

/// Runs `modifier` over every byte from `start` to the end of the packet,
/// exactly once and in logical order, threading its state across fragment
/// boundaries. Bytes before `start` are never handed to the modifier.
pub fn walk<M: PayloadModifier>(
    packet: &mut Writable<'_, '_>,
    start: usize,
    modifier: &M,
    mut state: M::State,
) -> M::State {
    let mut offset = start;
    for head in packet.heads_mut() {
        if head.len() > offset {
            state = modifier.transform(&mut head[offset..], state);
            offset = 0;
        } else {
            offset -= head.len();
        }
    }
    state
}
