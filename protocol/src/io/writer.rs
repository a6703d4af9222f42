use crate::error::ProtocolError;

/// Helper for building big-endian binary payloads
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes `bytes` right-padded with zeros to exactly `width` bytes.
    pub fn write_padded(&mut self, bytes: &[u8], width: usize) -> Result<(), ProtocolError> {
        if bytes.len() > width {
            return Err(ProtocolError::AddressTooLong(bytes.len()));
        }
        self.buf.extend_from_slice(bytes);
        self.buf.resize(self.buf.len() + width - bytes.len(), 0);
        Ok(())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}
