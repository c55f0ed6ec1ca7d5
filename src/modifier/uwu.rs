use std::fmt;

use crate::modifier::PayloadModifier;
use crate::packet::Packet;

/// What happens to an all-caps first word of the payload.
///
/// Heuristic, unverified. Protecting the word is meant to keep line-oriented
/// command tokens such as IRC's `PRIVMSG` intact. Nothing checks that the
/// payload actually is such a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LeadingToken {
    /// Leave an all-caps first word untouched.
    #[default]
    Protect,
    /// Rewrite every byte, first word included.
    Substitute,
}

impl fmt::Display for LeadingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LeadingToken::Protect => "protect",
            LeadingToken::Substitute => "substitute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UwuState {
    /// Payload bytes still covered by the protected first word.
    pub protect_remaining: usize,
}

/// `l`/`r` become `w`, `L`/`R` become `W`. Lossy, not reversible.
#[derive(Debug, Clone)]
pub struct UwuFilter {
    leading: LeadingToken,
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\r' || b == b'\n'
}

impl UwuFilter {
    pub fn new(leading: LeadingToken) -> Self {
        Self { leading }
    }

    pub fn leading_token(&self) -> LeadingToken {
        self.leading
    }
}

impl PayloadModifier for UwuFilter {
    type State = UwuState;

    /// Decides up front whether the first word is protected. The scan walks
    /// the packet, so a word split across fragments is judged as a whole.
    fn start(&self, packet: &Packet<'_>, payload_offset: usize) -> UwuState {
        if self.leading == LeadingToken::Substitute {
            return UwuState::default();
        }
        let mut word = 0;
        for b in packet.bytes_from(payload_offset) {
            if is_space(b) {
                break;
            }
            if !b.is_ascii_uppercase() {
                return UwuState::default();
            }
            word += 1;
        }
        UwuState {
            protect_remaining: word,
        }
    }

    fn transform(&self, chunk: &mut [u8], state: UwuState) -> UwuState {
        let skip = state.protect_remaining.min(chunk.len());
        for b in &mut chunk[skip..] {
            if *b == b'l' || *b == b'r' {
                *b = b'w';
            } else if *b == b'L' || *b == b'R' {
                *b = b'W';
            }
        }
        UwuState {
            protect_remaining: state.protect_remaining - skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Fragment, walk};

    /// Runs the filter over `payload` split at `cuts`, as a packet whose
    /// payload starts after a 3-byte stand-in header.
    fn run(filter: &UwuFilter, payload: &[u8], cuts: &[usize]) -> Vec<u8> {
        let mut data = b"hdr".to_vec();
        data.extend_from_slice(payload);
        let mut bounds: Vec<usize> = cuts.iter().map(|c| c + 3).collect();
        bounds.push(data.len());
        let mut frags = Vec::new();
        let mut prev = 0;
        for cut in bounds {
            frags.push(Fragment::owned(data[prev..cut].to_vec()));
            prev = cut;
        }
        let mut pkt = Packet::new(frags);
        let state = filter.start(&pkt, 3);
        {
            let mut w = pkt.make_writable().unwrap();
            walk(&mut w, 3, filter, state);
        }
        let out = pkt.to_vec();
        assert_eq!(&out[..3], b"hdr");
        out[3..].to_vec()
    }

    #[test]
    fn test_protects_leading_caps_word() {
        let f = UwuFilter::new(LeadingToken::Protect);
        assert_eq!(run(&f, b"HELP me", &[]), b"HELP me");
        assert_eq!(run(&f, b"PRIVMSG #rust :hello world", &[]), b"PRIVMSG #wust :hewwo wowwd");
        assert_eq!(run(&f, b"RRR", &[]), b"RRR");
    }

    #[test]
    fn test_no_caps_word_substitutes_everything() {
        let f = UwuFilter::new(LeadingToken::Protect);
        assert_eq!(run(&f, b"roll call", &[]), b"woww caww");
        assert_eq!(run(&f, b"Really LOUD", &[]), b"Weawwy WOUD");
        // empty first word: nothing to protect
        assert_eq!(run(&f, b" RL", &[]), b" WW");
        assert_eq!(run(&f, b"", &[]), b"");
    }

    #[test]
    fn test_substitute_policy_rewrites_first_word() {
        let f = UwuFilter::new(LeadingToken::Substitute);
        assert_eq!(run(&f, b"HELP me", &[]), b"HEWP me");
        assert_eq!(run(&f, b"PRIVMSG #rust", &[]), b"PWIVMSG #wust");
    }

    #[test]
    fn test_other_bytes_untouched() {
        let f = UwuFilter::new(LeadingToken::Substitute);
        let all: Vec<u8> = (0..=255).collect();
        let out = run(&f, &all, &[]);
        for (i, (&a, &b)) in all.iter().zip(out.iter()).enumerate() {
            match a {
                b'l' | b'r' => assert_eq!(b, b'w'),
                b'L' | b'R' => assert_eq!(b, b'W'),
                _ => assert_eq!(a, b, "byte {i}"),
            }
        }
    }

    // A protected word cut by a fragment boundary. The decision comes from
    // the pre-scan, so every split point gives the same output.
    #[test]
    fn test_protected_word_split_across_fragments() {
        let f = UwuFilter::new(LeadingToken::Protect);
        let payload = b"PRIVMSG roll";
        for cut in 0..=payload.len() {
            assert_eq!(run(&f, payload, &[cut]), b"PRIVMSG woww", "cut={cut}");
        }
        // lower-case byte after the split disqualifies the whole word
        let payload = b"RELAy rr";
        for cut in 0..=payload.len() {
            assert_eq!(run(&f, payload, &[cut]), b"WEWAy ww", "cut={cut}");
        }
    }

    #[test]
    fn test_state_counts_down() {
        let f = UwuFilter::new(LeadingToken::Protect);
        let mut buf = *b"RR";
        let s = f.transform(&mut buf, UwuState { protect_remaining: 5 });
        assert_eq!(&buf, b"RR");
        assert_eq!(s.protect_remaining, 3);

        let mut buf = *b"RRRR";
        let s = f.transform(&mut buf, s);
        assert_eq!(&buf, b"RRRW");
        assert_eq!(s.protect_remaining, 0);
    }
}
