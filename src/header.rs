//! Protocol dispatch: locate the application payload of an IPv4 TCP/UDP
//! packet.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::DropReason;
use crate::packet::Packet;

pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const TCP_MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

const IP_MF: u16 = 0x2000;
const IP_OFFSET_MASK: u16 = 0x1FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            6 => Some(Transport::Tcp),
            17 => Some(Transport::Udp),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Transport::Tcp => 6,
            Transport::Udp => 17,
        }
    }

    /// Offset of the checksum field inside the transport header.
    pub fn checksum_offset(self) -> usize {
        match self {
            Transport::Tcp => 16,
            Transport::Udp => 6,
        }
    }

    pub fn is_udp(self) -> bool {
        self == Transport::Udp
    }
}

/// Transient read of the IPv4 and transport headers of one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderView {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: Transport,
    pub src_port: u16,
    pub dst_port: u16,
    /// Offset of the transport header.
    pub thoff: usize,
    /// Offset of the first application byte.
    pub payload_offset: usize,
    pub packet_len: usize,
    /// Checksum field as it arrived.
    pub transport_checksum: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Transform(HeaderView),
    /// Not IPv4 TCP/UDP; accepted untouched.
    PassThrough,
}

impl HeaderView {
    /// Reads the headers of `packet`. `thoff_hint` is the transport header
    /// offset when the caller already knows it, otherwise it comes from IHL.
    pub fn parse(packet: &Packet<'_>, thoff_hint: Option<usize>) -> Result<Dispatch, DropReason> {
        let mut version = [0u8; 1];
        packet
            .copy_bits(0, &mut version)
            .ok_or(DropReason::TruncatedIpHeader)?;
        if version[0] >> 4 != 4 {
            return Ok(Dispatch::PassThrough);
        }

        let mut ip = [0u8; IPV4_MIN_HEADER_LEN];
        packet
            .copy_bits(0, &mut ip)
            .ok_or(DropReason::TruncatedIpHeader)?;

        let ihl = (ip[0] & 0x0F) as usize * 4;
        if ihl < IPV4_MIN_HEADER_LEN {
            return Err(DropReason::BadIpHeaderLength);
        }
        let packet_len = packet.len();
        if packet_len < ihl {
            return Err(DropReason::TruncatedIpHeader);
        }

        let frag = u16::from_be_bytes([ip[6], ip[7]]);
        if frag & (IP_MF | IP_OFFSET_MASK) != 0 {
            return Err(DropReason::IpFragment);
        }

        let Some(protocol) = Transport::from_u8(ip[9]) else {
            return Ok(Dispatch::PassThrough);
        };

        let thoff = thoff_hint.unwrap_or(ihl);
        if thoff < ihl {
            return Err(DropReason::BadTransportOffset);
        }

        let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
        let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);

        let (header_len, ports, transport_checksum) = match protocol {
            Transport::Tcp => {
                let mut tcp = [0u8; TCP_MIN_HEADER_LEN];
                packet
                    .copy_bits(thoff, &mut tcp)
                    .ok_or(DropReason::TruncatedTcpHeader)?;
                let doff = (tcp[12] >> 4) as usize * 4;
                if doff < TCP_MIN_HEADER_LEN {
                    return Err(DropReason::BadTcpDataOffset);
                }
                (doff, read_ports(&tcp), u16::from_be_bytes([tcp[16], tcp[17]]))
            }
            Transport::Udp => {
                let mut udp = [0u8; UDP_HEADER_LEN];
                packet
                    .copy_bits(thoff, &mut udp)
                    .ok_or(DropReason::TruncatedUdpHeader)?;
                (UDP_HEADER_LEN, read_ports(&udp), u16::from_be_bytes([udp[6], udp[7]]))
            }
        };

        let payload_offset = thoff + header_len;
        if packet_len < payload_offset {
            return Err(DropReason::PayloadBeyondPacket);
        }

        Ok(Dispatch::Transform(HeaderView {
            src,
            dst,
            protocol,
            src_port: ports.0,
            dst_port: ports.1,
            thoff,
            payload_offset,
            packet_len,
            transport_checksum,
        }))
    }

    /// Length of the transport segment, header included.
    pub fn transport_len(&self) -> usize {
        self.packet_len - self.thoff
    }

    pub fn payload_len(&self) -> usize {
        self.packet_len - self.payload_offset
    }
}

fn read_ports(header: &[u8]) -> (u16, u16) {
    (
        u16::from_be_bytes([header[0], header[1]]),
        u16::from_be_bytes([header[2], header[3]]),
    )
}

impl fmt::Display for HeaderView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        };
        write!(
            f,
            "{} {}:{} -> {}:{}",
            proto, self.src, self.src_port, self.dst, self.dst_port
        )
    }
}
