//! UDP IP discovery packets.
//!
//! Both the request and the response are 74 bytes, big-endian:
//! `[type: u16][length: u16][ssrc: u32][address: 64 bytes, zero padded][port: u16]`

use crate::error::ProtocolError;
use crate::io::{Reader, Writer};

/// Total size of a discovery packet on the wire.
pub const DISCOVERY_PACKET_LEN: usize = 74;

/// Value of the length field: everything after the type and length fields.
pub const DISCOVERY_BODY_LEN: u16 = 70;

/// Width of the zero-padded address field.
pub const DISCOVERY_ADDRESS_LEN: usize = 64;

pub const DISCOVERY_REQUEST: u16 = 0x0001;
pub const DISCOVERY_RESPONSE: u16 = 0x0002;

/// One IP discovery packet, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpDiscovery {
    pub packet_type: u16,
    pub ssrc: u32,
    pub address: String,
    pub port: u16,
}

impl IpDiscovery {
    /// Builds the request sent to the voice server's UDP endpoint.
    #[must_use]
    pub fn request(ssrc: u32, address: &str, port: u16) -> Self {
        Self {
            packet_type: DISCOVERY_REQUEST,
            ssrc,
            address: address.to_string(),
            port,
        }
    }

    /// Encode to the 74-byte wire format.
    ///
    /// # Errors
    /// Returns [`ProtocolError::AddressTooLong`] if the address does not fit in 64 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::with_capacity(DISCOVERY_PACKET_LEN);
        w.write_u16(self.packet_type);
        w.write_u16(DISCOVERY_BODY_LEN);
        w.write_u32(self.ssrc);
        w.write_padded(self.address.as_bytes(), DISCOVERY_ADDRESS_LEN)?;
        w.write_u16(self.port);
        Ok(w.into_vec())
    }

    /// Decode a packet; bytes past the first 74 are ignored.
    ///
    /// # Errors
    /// Returns an error if the packet is truncated or the address is not valid UTF-8.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < DISCOVERY_PACKET_LEN {
            return Err(ProtocolError::PacketTooShort {
                expected: DISCOVERY_PACKET_LEN,
                got: data.len(),
            });
        }

        let mut r = Reader::new(data);
        let packet_type = r.read_u16()?;
        let _length = r.read_u16()?;
        let ssrc = r.read_u32()?;
        let address = r.read_padded_str(DISCOVERY_ADDRESS_LEN)?;
        let port = r.read_u16()?;

        Ok(Self {
            packet_type,
            ssrc,
            address,
            port,
        })
    }
}
