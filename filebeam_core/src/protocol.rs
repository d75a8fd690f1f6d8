//! Wire formats shared by sender, receiver and discovery.
//!
//! TCP stream layout (one file per connection):
//!
//! ```text
//! [u16 BE name length][name bytes][u64 BE file size][file size payload bytes]
//! ```
//!
//! The name bytes use "modified UTF-8" (NUL as `C0 80`, supplementary characters as
//! surrogate pairs) so existing peers interoperate. The decoder also accepts plain UTF-8.
//!
//! UDP discovery is plain text: the probe is [`DISCOVERY_REQUEST`] and a reply is
//! `RECEIVER_AVAILABLE|<device name>|<tcp port>`.

use crate::error::{Result, TransferError};
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default TCP port for file transfer
pub const TRANSFER_PORT: u16 = 5050;

/// Default UDP port the discovery responder listens on
pub const DISCOVERY_PORT: u16 = 8888;

/// Where discovery probes are sent
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Probe payload, sent as the whole datagram
pub const DISCOVERY_REQUEST: &str = "FILEBEAM_DISCOVERY";

/// Every reply starts with this prefix (delimiter included)
pub const DISCOVERY_RESPONSE_PREFIX: &str = "RECEIVER_AVAILABLE|";

const FIELD_DELIMITER: char = '|';

/// Largest discovery datagram we read
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Largest encoded file name the u16 length prefix can carry
pub const MAX_ENCODED_NAME_LEN: usize = u16::MAX as usize;

/// Metadata written before the payload of every transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub file_name: String,
    pub file_size: u64,
}

impl TransferHeader {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
        }
    }

    /// Encode the header exactly as it appears on the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let name = encode_modified_utf8(&self.file_name);
        if name.len() > MAX_ENCODED_NAME_LEN {
            return Err(TransferError::InvalidInput(format!(
                "File name too long ({} encoded bytes, max {})",
                name.len(),
                MAX_ENCODED_NAME_LEN
            )));
        }

        let mut buf = Vec::with_capacity(2 + name.len() + 8);
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        Ok(buf)
    }

    /// Write the header to a stream. The caller flushes.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.encode()?;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Read one header, blocking until both fields are complete.
    ///
    /// A stream that ends before the header is complete is a framing error.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut len_buf = [0u8; 2];
        read_field(reader, &mut len_buf, "file name length").await?;
        let name_len = u16::from_be_bytes(len_buf) as usize;

        let mut name_buf = vec![0u8; name_len];
        read_field(reader, &mut name_buf, "file name").await?;
        let file_name = decode_modified_utf8(&name_buf)?;

        let mut size_buf = [0u8; 8];
        read_field(reader, &mut size_buf, "file size").await?;
        let file_size = u64::from_be_bytes(size_buf);

        Ok(Self {
            file_name,
            file_size,
        })
    }
}

async fn read_field<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    field: &str,
) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(TransferError::Framing(format!(
            "Stream ended while reading {}",
            field
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Encode a string as modified UTF-8, without the length prefix.
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8, also accepting the 4-byte sequences of standard UTF-8.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let malformed = |pos: usize| TransferError::Framing(format!("Malformed file name at byte {}", pos));
    let continuation = |pos: usize| -> Result<u16> {
        match bytes.get(pos) {
            Some(b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
            _ => Err(malformed(pos)),
        }
    };

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let unit = ((b as u16 & 0x1F) << 6) | continuation(i + 1)?;
            units.push(unit);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let unit =
                ((b as u16 & 0x0F) << 12) | (continuation(i + 1)? << 6) | continuation(i + 2)?;
            units.push(unit);
            i += 3;
        } else if b & 0xF8 == 0xF0 {
            let code = ((b as u32 & 0x07) << 18)
                | ((continuation(i + 1)? as u32) << 12)
                | ((continuation(i + 2)? as u32) << 6)
                | continuation(i + 3)? as u32;
            let ch = char::from_u32(code).ok_or_else(|| malformed(i))?;
            let mut pair = [0u16; 2];
            units.extend_from_slice(ch.encode_utf16(&mut pair));
            i += 4;
        } else {
            return Err(malformed(i));
        }
    }

    String::from_utf16(&units)
        .map_err(|_| TransferError::Framing("File name contains an unpaired surrogate".to_string()))
}

/// Whether a datagram is exactly the discovery probe.
pub fn is_discovery_request(payload: &[u8]) -> bool {
    payload == DISCOVERY_REQUEST.as_bytes()
}

/// Answer from a responder: who it is and where its listener is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub device_name: String,
    pub tcp_port: u16,
}

impl DiscoveryReply {
    /// Reply for `device_name`, made encodable: `|` becomes `-` and the name is
    /// cut (on a character boundary) so the whole reply fits one datagram.
    pub fn new(device_name: &str, tcp_port: u16) -> Self {
        let mut name: String = device_name
            .chars()
            .map(|c| if c == FIELD_DELIMITER { '-' } else { c })
            .collect();

        let max_name = MAX_DATAGRAM_SIZE
            - DISCOVERY_RESPONSE_PREFIX.len()
            - FIELD_DELIMITER.len_utf8()
            - tcp_port.to_string().len();
        if name.len() > max_name {
            let mut cutoff = max_name;
            while !name.is_char_boundary(cutoff) {
                cutoff -= 1;
            }
            name.truncate(cutoff);
        }

        Self {
            device_name: name,
            tcp_port,
        }
    }

    /// Encode the reply datagram.
    ///
    /// A name containing the delimiter, or a reply larger than one datagram,
    /// could not be parsed back and is rejected.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.device_name.contains(FIELD_DELIMITER) {
            return Err(TransferError::InvalidInput(format!(
                "Device name {:?} contains '{}'",
                self.device_name, FIELD_DELIMITER
            )));
        }

        let bytes = format!(
            "{}{}{}{}",
            DISCOVERY_RESPONSE_PREFIX, self.device_name, FIELD_DELIMITER, self.tcp_port
        )
        .into_bytes();
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransferError::InvalidInput(format!(
                "Discovery reply too long ({} bytes, max {})",
                bytes.len(),
                MAX_DATAGRAM_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Parse a reply datagram. Anything malformed yields `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        if !text.starts_with(DISCOVERY_RESPONSE_PREFIX) {
            return None;
        }

        let parts: Vec<&str> = text.split(FIELD_DELIMITER).collect();
        if parts.len() < 3 {
            return None;
        }

        let tcp_port: u16 = parts[2].parse().ok()?;
        if tcp_port == 0 {
            return None;
        }

        Some(Self {
            device_name: parts[1].to_string(),
            tcp_port,
        })
    }
}
