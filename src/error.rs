use std::io;

/// Rejected transform configuration. Raised before any packet flows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("you must specify `--key' or `--hex-key'")]
    NoKey,

    #[error("`--key' and `--hex-key' are mutually exclusive")]
    ConflictingKeys,

    #[error("KEY must not be empty")]
    EmptyKey,

    #[error("KEY is too long ({len} bytes, at most {max})")]
    KeyTooLong { len: usize, max: usize },

    #[error("KEY is too long ({digits} hex digits, at most {max})")]
    HexKeyTooLong { digits: usize, max: usize },

    #[error("odd number of hex digits")]
    OddHexDigits,

    #[error("invalid hex char {c:?} at index {index}")]
    InvalidHexChar { c: char, index: usize },
}

/// Why a single packet got a DROP verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DropReason {
    #[error("IPv4 header missing or truncated")]
    TruncatedIpHeader,

    #[error("IPv4 header length field is invalid")]
    BadIpHeaderLength,

    #[error("packet is an IP fragment")]
    IpFragment,

    #[error("transport header offset is inside the IPv4 header")]
    BadTransportOffset,

    #[error("TCP header missing or truncated")]
    TruncatedTcpHeader,

    #[error("TCP data offset is smaller than the minimum header")]
    BadTcpDataOffset,

    #[error("UDP header missing or truncated")]
    TruncatedUdpHeader,

    #[error("payload offset lies beyond the end of the packet")]
    PayloadBeyondPacket,

    #[error("could not obtain writable packet storage")]
    NotWritable,

    #[error("transport checksum field not writable after mutation")]
    ChecksumUnwritable,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
