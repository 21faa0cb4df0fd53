//! Binary relay frame codec.
//!
//! A relay frame is what a connected client sends to have its payload
//! delivered to another live connection:
//!
//! ```text
//! offset  size  field
//! 0       1     magic (always 1)
//! 1       1     destination kind (1 = by connection id)
//! 2       4     reserved address (zero)
//! 6       2     reserved port, big-endian (zero)
//! 8       8     destination connection id, big-endian
//! 16      ..    payload
//! ```
//!
//! The address and port fields only exist so a future "relay to network
//! address" kind can share the layout. [`decode`] reads them without judging
//! them; [`RelayFrame::connection_target`] refuses to route a frame whose
//! reserved fields are not zero.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::ids::ConnectionId;

/// First byte of every relay frame.
pub const FRAME_MAGIC: u8 = 1;

/// Length of the fixed header preceding the payload for the by-id kind.
pub const HEADER_LEN: usize = 16;

const ADDRESS_RANGE: std::ops::Range<usize> = 2..6;
const PORT_RANGE: std::ops::Range<usize> = 6..8;
const ID_RANGE: std::ops::Range<usize> = 8..16;

/// Destination kind carried in byte 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DestinationKind {
    /// Loopback relay to another connection on this server, by id.
    ById = 1,
}

impl TryFrom<u8> for DestinationKind {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(Self::ById),
            other => Err(DecodeError::UnsupportedKind(other)),
        }
    }
}

/// Reasons a binary message is not a usable relay frame.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Byte 0 is not [`FRAME_MAGIC`].
    #[error("invalid magic byte {0:#04x}")]
    InvalidMagic(u8),
    /// Byte 1 names a destination kind this server does not implement.
    #[error("unsupported destination kind {0}")]
    UnsupportedKind(u8),
    /// Fewer bytes than the header requires.
    #[error("truncated frame: need {needed} bytes, got {actual}")]
    Truncated {
        /// Minimum length for the frame read so far.
        needed: usize,
        /// Length actually received.
        actual: usize,
    },
    /// The reserved address/port fields are set.
    #[error("relay to {address}:{port} is not supported")]
    UnsupportedDestination {
        /// Address from the frame.
        address: Ipv4Addr,
        /// Port from the frame.
        port: u16,
    },
}

/// A decoded relay frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayFrame {
    /// Destination kind.
    pub kind: DestinationKind,
    /// Reserved address field.
    pub address: Ipv4Addr,
    /// Reserved port field.
    pub port: u16,
    /// Destination connection.
    pub destination: ConnectionId,
    /// Bytes forwarded verbatim to the destination.
    pub payload: Bytes,
}

impl RelayFrame {
    /// Build a by-id frame with zeroed reserved fields.
    pub fn to_connection(destination: ConnectionId, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: DestinationKind::ById,
            address: Ipv4Addr::UNSPECIFIED,
            port: 0,
            destination,
            payload: payload.into(),
        }
    }

    /// Resolve the connection this frame should be relayed to.
    ///
    /// Only frames whose reserved address and port are zero are routable.
    pub fn connection_target(&self) -> Result<ConnectionId, DecodeError> {
        if self.address.is_unspecified() && self.port == 0 {
            Ok(self.destination)
        } else {
            Err(DecodeError::UnsupportedDestination {
                address: self.address,
                port: self.port,
            })
        }
    }

    /// Serialize to the wire layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(FRAME_MAGIC);
        buf.put_u8(self.kind as u8);
        buf.put_slice(&self.address.octets());
        buf.put_u16(self.port);
        buf.put_u64(self.destination.get());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Decode a binary message into a [`RelayFrame`].
///
/// The payload is a zero-copy slice of `data`.
pub fn decode(data: Bytes) -> Result<RelayFrame, DecodeError> {
    let Some(&magic) = data.first() else {
        return Err(DecodeError::Truncated {
            needed: 2,
            actual: 0,
        });
    };
    if magic != FRAME_MAGIC {
        return Err(DecodeError::InvalidMagic(magic));
    }
    let Some(&kind) = data.get(1) else {
        return Err(DecodeError::Truncated {
            needed: 2,
            actual: data.len(),
        });
    };
    let kind = DestinationKind::try_from(kind)?;

    match kind {
        DestinationKind::ById => {
            if data.len() < HEADER_LEN {
                return Err(DecodeError::Truncated {
                    needed: HEADER_LEN,
                    actual: data.len(),
                });
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&data[ADDRESS_RANGE]);
            let mut port = [0u8; 2];
            port.copy_from_slice(&data[PORT_RANGE]);
            let mut id = [0u8; 8];
            id.copy_from_slice(&data[ID_RANGE]);

            Ok(RelayFrame {
                kind,
                address: Ipv4Addr::from(octets),
                port: u16::from_be_bytes(port),
                destination: ConnectionId::new(u64::from_be_bytes(id)),
                payload: data.slice(HEADER_LEN..),
            })
        }
    }
}
