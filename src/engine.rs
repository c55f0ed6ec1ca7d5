//! Per-packet pipeline:
//! validate headers, locate payload, make writable, transform, fix checksum.

use tracing::{debug, trace};

use crate::checksum::{self, ChecksumMode, Summed};
use crate::config::{EngineConfig, TransformSpec};
use crate::error::{ConfigError, DropReason};
use crate::header::{Dispatch, HeaderView};
use crate::modifier::{PayloadModifier, Transform, UwuFilter, XorCipher};
use crate::packet::{Packet, walk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Drop,
}

/// What happened to a packet that was not dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Payload transformed and checksum repaired.
    Mangled,
    /// Not a target of the transform; left as it was.
    PassedThrough,
}

impl From<&Result<Outcome, DropReason>> for Verdict {
    fn from(result: &Result<Outcome, DropReason>) -> Self {
        match result {
            Ok(_) => Verdict::Continue,
            Err(_) => Verdict::Drop,
        }
    }
}

/// Configured transform plus checksum policy. Immutable once built, so one
/// engine can serve any number of packets on any number of threads.
#[derive(Debug, Clone)]
pub struct Engine {
    transform: Transform,
    checksum: ChecksumMode,
}

impl Engine {
    pub fn new(transform: Transform, checksum: ChecksumMode) -> Self {
        Self { transform, checksum }
    }

    pub fn configure(config: EngineConfig) -> Result<Self, ConfigError> {
        let transform = match config.transform {
            TransformSpec::Xor(args) => Transform::Xor(XorCipher::new(args.resolve()?)),
            TransformSpec::Uwu(leading) => Transform::Uwu(UwuFilter::new(leading)),
        };
        Ok(Self::new(transform, config.checksum))
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn checksum_mode(&self) -> ChecksumMode {
        self.checksum
    }

    #[cfg(test)]
    pub fn apply(&self, packet: &mut Packet<'_>, thoff_hint: Option<usize>) -> Verdict {
        Verdict::from(&self.process(packet, thoff_hint))
    }

    /// Verdict for `packet` along with why. On `Err` the packet must not be
    /// sent: its payload may already be rewritten.
    pub fn process(
        &self,
        packet: &mut Packet<'_>,
        thoff_hint: Option<usize>,
    ) -> Result<Outcome, DropReason> {
        let result = self.run(packet, thoff_hint);
        if let Err(reason) = &result {
            debug!(%reason, len = packet.len(), "dropping packet");
        }
        result
    }

    fn run(&self, packet: &mut Packet<'_>, thoff_hint: Option<usize>) -> Result<Outcome, DropReason> {
        let view = match HeaderView::parse(packet, thoff_hint)? {
            Dispatch::Transform(view) => view,
            Dispatch::PassThrough => return Ok(Outcome::PassedThrough),
        };
        trace!(flow = %view, payload = view.payload_len(), "transforming");

        match &self.transform {
            Transform::Xor(cipher) => self.mangle(packet, &view, cipher)?,
            Transform::Uwu(filter) => self.mangle(packet, &view, filter)?,
        }
        Ok(Outcome::Mangled)
    }

    fn mangle<M: PayloadModifier>(
        &self,
        packet: &mut Packet<'_>,
        view: &HeaderView,
        modifier: &M,
    ) -> Result<(), DropReason> {
        match self.checksum {
            ChecksumMode::Full => {
                let summed = Summed(modifier);
                let state = summed.start(packet, view.payload_offset);
                let mut writable = packet.make_writable()?;
                let (_, payload_sum) = walk(&mut writable, view.payload_offset, &summed, state);
                checksum::fix_full(&mut writable, view, payload_sum)
            }
            ChecksumMode::Deferred => {
                let state = modifier.start(packet, view.payload_offset);
                let mut writable = packet.make_writable()?;
                walk(&mut writable, view.payload_offset, modifier, state);
                checksum::fix_deferred(&mut writable, view)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use hex_literal::hex;

    use super::*;
    use crate::checksum::transport_checksum;
    use crate::config::{KeyArgs, TransformKey};
    use crate::header::tests::{tcp_packet, udp_packet};
    use crate::modifier::LeadingToken;
    use crate::packet::{ChecksumState, Fragment};

    fn xor_engine(key: &[u8], mode: ChecksumMode) -> Engine {
        Engine::new(
            Transform::Xor(XorCipher::new(TransformKey::from_raw(key).unwrap())),
            mode,
        )
    }

    fn split(bytes: &[u8], cuts: &[usize]) -> Packet<'static> {
        let mut bounds = cuts.to_vec();
        bounds.push(bytes.len());
        let mut frags = Vec::new();
        let mut prev = 0;
        for cut in bounds {
            frags.push(Fragment::owned(bytes[prev..cut].to_vec()));
            prev = cut;
        }
        Packet::new(frags)
    }

    fn verify(bytes: &[u8], proto: u8) -> u16 {
        let src = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
        let dst = Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]);
        transport_checksum(src, dst, proto, &bytes[20..])
    }

    #[test]
    fn test_hello_scenario_every_split() {
        let bytes = udp_packet(b"HELLO", 0x1111);
        let engine = xor_engine(b"AB", ChecksumMode::Full);
        for cut in 0..=bytes.len() {
            let mut pkt = split(&bytes, &[cut]);
            assert_eq!(engine.process(&mut pkt, None), Ok(Outcome::Mangled));
            let out = pkt.to_vec();
            assert_eq!(&out[28..], &hex!("09 07 0d 0e 0e"), "cut={cut}");
            assert_eq!(&out[..26], &bytes[..26], "header touched, cut={cut}");
            assert_eq!(verify(&out, 17), 0, "cut={cut}");
        }
    }

    #[test]
    fn test_cycle_continuity_all_key_lengths() {
        let payload: Vec<u8> = (0..97).map(|i: u32| (i * 31 + 7) as u8).collect();
        let bytes = udp_packet(&payload, 0xffff);
        for key_len in 1..=32 {
            let key: Vec<u8> = (0..key_len).map(|i| (i * 13 + 1) as u8).collect();
            let engine = xor_engine(&key, ChecksumMode::Full);
            let expected: Vec<u8> = payload
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ key[i % key.len()])
                .collect();
            for (a, b) in [(0, 0), (10, 28), (28, 29), (30, 64), (29, 100), (40, 41)] {
                let mut pkt = split(&bytes, &[a, b]);
                assert_eq!(engine.apply(&mut pkt, None), Verdict::Continue);
                let out = pkt.to_vec();
                assert_eq!(&out[28..], &expected[..], "key_len={key_len} cuts={a},{b}");
            }
        }
    }

    #[test]
    fn test_xor_twice_restores_payload() {
        let bytes = tcp_packet(b"attack at dawn", 4);
        let engine = xor_engine(&hex!("01 02 03"), ChecksumMode::Full);
        let mut pkt = split(&bytes, &[30, 50]);
        engine.apply(&mut pkt, None);
        let once = pkt.to_vec();
        assert_ne!(&once[44..], b"attack at dawn");
        engine.apply(&mut pkt, None);
        let twice = pkt.to_vec();
        assert_eq!(&twice[44..], b"attack at dawn");
        assert_eq!(verify(&twice, 6), 0);
    }

    #[test]
    fn test_tcp_checksum_full_and_deferred_agree() {
        for payload in [&b""[..], &b"x"[..], &b"odd length!"[..], &b"even length!"[..]] {
            let bytes = tcp_packet(payload, 8);
            let mut full = split(&bytes, &[33]);
            xor_engine(b"key", ChecksumMode::Full).apply(&mut full, None);
            assert_eq!(full.checksum_state(), ChecksumState::Complete);
            let full = full.to_vec();
            assert_eq!(verify(&full, 6), 0);

            let mut deferred = split(&bytes, &[21, 45]);
            xor_engine(b"key", ChecksumMode::Deferred).apply(&mut deferred, None);
            assert_eq!(
                deferred.checksum_state(),
                ChecksumState::Partial {
                    start: 20,
                    offset: 16,
                    mangle_zero: false
                }
            );
            deferred.finish_checksum().unwrap();
            assert_eq!(deferred.checksum_state(), ChecksumState::Complete);
            assert_eq!(deferred.to_vec(), full);
        }
    }

    #[test]
    fn test_deferred_seed_is_pseudo_header_sum() {
        let bytes = udp_packet(b"abc", 0x0001);
        let mut pkt = Packet::from_slice(&bytes);
        xor_engine(b"k", ChecksumMode::Deferred).apply(&mut pkt, None);
        let out = pkt.to_vec();
        let seed = checksum::pseudo_header(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(198, 51, 100, 7),
            17,
            11,
        )
        .fold();
        assert_eq!(u16::from_be_bytes([out[26], out[27]]), seed);
    }

    #[test]
    fn test_udp_zero_checksum_stays_zero() {
        for mode in [ChecksumMode::Full, ChecksumMode::Deferred] {
            let bytes = udp_packet(b"no checksum here", 0);
            let mut pkt = split(&bytes, &[27]);
            assert_eq!(xor_engine(b"AB", mode).process(&mut pkt, None), Ok(Outcome::Mangled));
            assert_eq!(pkt.checksum_state(), ChecksumState::Complete);
            let out = pkt.to_vec();
            assert_eq!(&out[26..28], &[0, 0]);
            assert_ne!(&out[28..], b"no checksum here");
        }
    }

    #[test]
    fn test_fragmented_ip_is_dropped_untouched() {
        let mut bytes = udp_packet(b"HELLO", 0x1234);
        bytes[6] |= 0x20;
        let mut pkt = Packet::from_slice(&bytes);
        let engine = xor_engine(b"AB", ChecksumMode::Full);
        assert_eq!(engine.process(&mut pkt, None), Err(DropReason::IpFragment));
        assert_eq!(engine.apply(&mut pkt, None), Verdict::Drop);
        assert_eq!(pkt.to_vec(), bytes);
    }

    #[test]
    fn test_other_protocols_pass_through() {
        let mut bytes = udp_packet(b"ICMP-ish", 0x1234);
        bytes[9] = 1;
        let mut pkt = Packet::from_slice(&bytes);
        let engine = xor_engine(b"AB", ChecksumMode::Full);
        assert_eq!(engine.process(&mut pkt, None), Ok(Outcome::PassedThrough));
        assert_eq!(pkt.to_vec(), bytes);
    }

    #[test]
    fn test_borrowed_input_never_written() {
        let bytes = udp_packet(b"HELLO", 0x1234);
        let copy = bytes.clone();
        let mut pkt = Packet::from_slice(&bytes);
        xor_engine(b"AB", ChecksumMode::Full).apply(&mut pkt, None);
        assert_ne!(pkt.to_vec(), copy);
        assert_eq!(bytes, copy);
    }

    #[test]
    fn test_uwu_engine_fixes_tcp_checksum() {
        let bytes = tcp_packet(b"PRIVMSG #rust :hello world\r\n", 0);
        let engine = Engine::new(
            Transform::Uwu(UwuFilter::new(LeadingToken::Protect)),
            ChecksumMode::Full,
        );
        let mut pkt = split(&bytes, &[44, 49]);
        assert_eq!(engine.process(&mut pkt, None), Ok(Outcome::Mangled));
        let out = pkt.to_vec();
        assert_eq!(&out[40..], b"PRIVMSG #wust :hewwo wowwd\r\n");
        assert_eq!(verify(&out, 6), 0);
    }

    #[test]
    fn test_each_transform_rewrites_in_both_modes() {
        let bytes = udp_packet(b"roll call", 0x1234);
        for mode in [ChecksumMode::Full, ChecksumMode::Deferred] {
            let uwu = Engine::new(Transform::Uwu(UwuFilter::new(LeadingToken::Protect)), mode);
            let mut pkt = split(&bytes, &[30]);
            assert_eq!(uwu.process(&mut pkt, None), Ok(Outcome::Mangled));
            pkt.finish_checksum().unwrap();
            let out = pkt.to_vec();
            assert_eq!(&out[28..], b"woww caww", "mode={mode:?}");
            assert_eq!(verify(&out, 17), 0, "mode={mode:?}");

            let mut pkt = split(&bytes, &[30]);
            assert_eq!(xor_engine(b"\x01", mode).process(&mut pkt, None), Ok(Outcome::Mangled));
            pkt.finish_checksum().unwrap();
            let out = pkt.to_vec();
            let expected: Vec<u8> = b"roll call".iter().map(|b| b ^ 1).collect();
            assert_eq!(&out[28..], &expected[..], "mode={mode:?}");
            assert_eq!(verify(&out, 17), 0, "mode={mode:?}");
        }
    }

    #[test]
    fn test_configure_rejects_bad_keys() {
        let cfg = |key: Option<&str>, hex_key: Option<&str>| EngineConfig {
            transform: TransformSpec::Xor(KeyArgs {
                key: key.map(String::from),
                hex_key: hex_key.map(String::from),
            }),
            checksum: ChecksumMode::Full,
        };
        assert!(Engine::configure(cfg(Some("AB"), None)).is_ok());
        assert_eq!(
            Engine::configure(cfg(Some(""), None)).unwrap_err(),
            ConfigError::EmptyKey
        );
        assert!(matches!(
            Engine::configure(cfg(Some(&"x".repeat(33)), None)),
            Err(ConfigError::KeyTooLong { .. })
        ));
        assert_eq!(
            Engine::configure(cfg(None, Some("123"))).unwrap_err(),
            ConfigError::OddHexDigits
        );
        assert!(matches!(
            Engine::configure(cfg(None, Some("zz"))),
            Err(ConfigError::InvalidHexChar { .. })
        ));
        assert_eq!(
            Engine::configure(cfg(None, None)).unwrap_err(),
            ConfigError::NoKey
        );
        assert_eq!(
            Engine::configure(cfg(Some("a"), Some("61"))).unwrap_err(),
            ConfigError::ConflictingKeys
        );
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
