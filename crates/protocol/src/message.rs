//! Message header codec and blocking read/write over byte streams.

use byteorder::{BigEndian, ByteOrder};
use std::io::{self, Read, Write};

use crate::{Op, ProtocolError, Status};

/// Size of the fixed message header in bytes.
pub const HEADER_LEN: usize = 20;

/// Longest key representable in the 16-bit length field.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Decoded fixed header, before the payloads are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub op: u8,
    pub status: u8,
    pub key_len: u16,
    pub value_len: u64,
    pub expires: u64,
}

impl Header {
    /// Encodes the header into its 20-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut b = [0u8; HEADER_LEN];
        b[0] = self.op;
        b[1] = self.status;
        BigEndian::write_u16(&mut b[2..4], self.key_len);
        BigEndian::write_u64(&mut b[4..12], self.value_len);
        BigEndian::write_u64(&mut b[12..20], self.expires);
        b
    }

    /// Decodes a complete 20-byte header.
    #[must_use]
    pub fn decode(b: &[u8; HEADER_LEN]) -> Self {
        Self {
            op: b[0],
            status: b[1],
            key_len: BigEndian::read_u16(&b[2..4]),
            value_len: BigEndian::read_u64(&b[4..12]),
            expires: BigEndian::read_u64(&b[12..20]),
        }
    }
}

/// One protocol exchange unit, used for both requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub op: u8,
    pub status: u8,
    /// Unix seconds; 0 means the key never expires.
    pub expires: u64,
    pub key: String,
    pub value: Vec<u8>,
}

impl Message {
    /// Builds a request with no expiry.
    pub fn request(op: Op, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            op: op as u8,
            key: key.into(),
            value,
            ..Self::default()
        }
    }

    /// Builds an empty response echoing `op`.
    #[must_use]
    pub fn response(op: u8, status: Status) -> Self {
        Self {
            op,
            status: status as u8,
            ..Self::default()
        }
    }

    /// Returns the header describing this message.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::KeyTooLong`] if the key exceeds [`MAX_KEY_LEN`].
    pub fn header(&self) -> Result<Header, ProtocolError> {
        let key_len =
            u16::try_from(self.key.len()).map_err(|_| ProtocolError::KeyTooLong(self.key.len()))?;
        Ok(Header {
            op: self.op,
            status: self.status,
            key_len,
            value_len: self.value.len() as u64,
            expires: self.expires,
        })
    }

    /// Writes header, key and value, in that order.
    ///
    /// A failure part way through leaves a partial frame on the sink; the
    /// caller must treat the connection as broken.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtocolError> {
        let header = self.header()?;
        w.write_all(&header.encode())?;
        w.write_all(self.key.as_bytes())?;
        w.write_all(&self.value)?;
        w.flush()?;
        Ok(())
    }

    /// Reads exactly one message.
    ///
    /// # Termination
    ///
    /// - **No bytes before EOF** -> [`ProtocolError::ConnectionClosed`].
    /// - **EOF inside the header** -> [`ProtocolError::TruncatedHeader`].
    /// - **EOF inside key or value** -> [`ProtocolError::TruncatedPayload`].
    ///
    /// A partial header never yields a zero-valued message.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ProtocolError> {
        let mut hb = [0u8; HEADER_LEN];
        let read = read_fully(r, &mut hb)?;
        if read == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        if read < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader { read });
        }
        let header = Header::decode(&hb);

        let key = if header.key_len > 0 {
            let bytes = read_payload(r, u64::from(header.key_len))?;
            String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidKey)?
        } else {
            String::new()
        };

        let value = if header.value_len > 0 {
            read_payload(r, header.value_len)?
        } else {
            Vec::new()
        };

        Ok(Self {
            op: header.op,
            status: header.status,
            expires: header.expires,
            key,
            value,
        })
    }

    /// Encodes the whole frame into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.key.len() + self.value.len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Convenience for the `Count` response: a u64 carried big-endian in the value.
    #[must_use]
    pub fn with_count(mut self, n: u64) -> Self {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, n);
        self.value = buf.to_vec();
        self
    }

    /// Reads the count carried by [`Message::with_count`].
    #[must_use]
    pub fn count(&self) -> Option<u64> {
        (self.value.len() == 8).then(|| BigEndian::read_u64(&self.value))
    }
}

/// Fills `buf` as far as the stream allows, returning the number of bytes read.
fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

/// Reads exactly `len` payload bytes.
///
/// Grows the buffer as bytes arrive instead of trusting `len` for a single
/// up-front allocation.
fn read_payload<R: Read>(r: &mut R, len: u64) -> Result<Vec<u8>, ProtocolError> {
    let cap = usize::try_from(len).map_err(|_| ProtocolError::ValueTooLarge(len))?;
    let mut buf = Vec::with_capacity(cap.min(64 * 1024));
    let read = r.by_ref().take(len).read_to_end(&mut buf)? as u64;
    if read < len {
        return Err(ProtocolError::TruncatedPayload {
            expected: len,
            read,
        });
    }
    Ok(buf)
}
