/*!
 * ADB message framing.
 *
 * A message is a 24 byte little-endian header followed by `data_length`
 * payload bytes:
 *
 * | offset | field         |
 * |--------|---------------|
 * | 0      | command       |
 * | 4      | arg0          |
 * | 8      | arg1          |
 * | 12     | data_length   |
 * | 16     | data_crc32    |
 * | 20     | magic         |
 *
 * `magic` is `command ^ 0xffffffff`. The checksum is CRC-32 over the payload
 * and is always validated on decode.
 */
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed header
pub const HEADER_LEN: usize = 24;

/// Protocol version advertised in CNXN
pub const VERSION: u32 = 0x0100_0000;

/// AUTH arg0: the device sent a token to sign
pub const AUTH_TOKEN: u32 = 1;
/// AUTH arg0: the host answers with a signature
pub const AUTH_SIGNATURE: u32 = 2;

/// Message opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Connection banner exchange
    Cnxn = 0x4e58_4e43,
    /// Authentication challenge or answer
    Auth = 0x4854_5541,
    /// Open a stream
    Open = 0x4e45_504f,
    /// Stream ready / write acknowledged
    Okay = 0x5941_4b4f,
    /// Close a stream
    Clse = 0x4553_4c43,
    /// Stream data
    Wrte = 0x4554_5257,
}

impl Command {
    /// Decode an opcode
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x4e58_4e43 => Some(Command::Cnxn),
            0x4854_5541 => Some(Command::Auth),
            0x4e45_504f => Some(Command::Open),
            0x5941_4b4f => Some(Command::Okay),
            0x4553_4c43 => Some(Command::Clse),
            0x4554_5257 => Some(Command::Wrte),
            _ => None,
        }
    }

    /// Wire value
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Expected magic for this opcode
    pub fn magic(self) -> u32 {
        self.as_u32() ^ 0xffff_ffff
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Cnxn => "CNXN",
            Command::Auth => "AUTH",
            Command::Open => "OPEN",
            Command::Okay => "OKAY",
            Command::Clse => "CLSE",
            Command::Wrte => "WRTE",
        };
        f.write_str(name)
    }
}

/// Why a buffer did not yield a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than 24 bytes are buffered
    #[error("frame too short: {available} of 24 header bytes")]
    FrameTooShort {
        /// Bytes available
        available: usize,
    },

    /// The header is valid but the payload is not fully buffered yet
    #[error("incomplete payload: {available} of {expected} bytes")]
    IncompletePayload {
        /// Payload bytes announced by the header
        expected: usize,
        /// Payload bytes available
        available: usize,
    },

    /// The frame failed validation and must be skipped
    #[error("corrupt frame ({reason}), discarding {consumed} bytes")]
    Corrupt {
        /// What was wrong
        reason: String,
        /// Bytes to drop before trying again
        consumed: usize,
    },
}

/// A decoded ADB message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbMessage {
    /// Opcode
    pub command: Command,
    /// First argument
    pub arg0: u32,
    /// Second argument
    pub arg1: u32,
    /// Payload
    pub payload: Bytes,
}

impl AdbMessage {
    /// Create a message
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// CNXN banner: `system_identity` followed by a NUL
    pub fn connect(max_payload: u32, system_identity: &str) -> Self {
        Self::new(Command::Cnxn, VERSION, max_payload, nul_terminated(system_identity))
    }

    /// AUTH answer carrying a signed token
    pub fn auth_signature(signature: Vec<u8>) -> Self {
        Self::new(Command::Auth, AUTH_SIGNATURE, 0, signature)
    }

    /// OPEN for `destination` (for example `shell:input keyevent 26`)
    pub fn open(local_id: u32, destination: &str) -> Self {
        Self::new(Command::Open, local_id, 0, nul_terminated(destination))
    }

    /// OKAY from `local_id` to `remote_id`
    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Okay, local_id, remote_id, Bytes::new())
    }

    /// WRTE from `local_id` to `remote_id`
    pub fn write(local_id: u32, remote_id: u32, data: impl Into<Bytes>) -> Self {
        Self::new(Command::Wrte, local_id, remote_id, data)
    }

    /// CLSE from `local_id` to `remote_id`
    pub fn close(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Clse, local_id, remote_id, Bytes::new())
    }

    /// Encoded size
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the wire form to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32_le(self.command.as_u32());
        dst.put_u32_le(self.arg0);
        dst.put_u32_le(self.arg1);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_u32_le(crc32fast::hash(&self.payload));
        dst.put_u32_le(self.command.magic());
        dst.put_slice(&self.payload);
    }

    /// The wire form
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode one message from the front of `src` with no payload cap
    pub fn decode(src: &[u8]) -> Result<(AdbMessage, usize), FrameError> {
        Self::decode_with_limit(src, u32::MAX)
    }

    /// Decode one message from the front of `src`
    ///
    /// Returns the message and the number of bytes it occupied.
    pub fn decode_with_limit(src: &[u8], max_payload: u32) -> Result<(AdbMessage, usize), FrameError> {
        if src.len() < HEADER_LEN {
            return Err(FrameError::FrameTooShort { available: src.len() });
        }

        let mut header = &src[..HEADER_LEN];
        let raw_command = header.get_u32_le();
        let arg0 = header.get_u32_le();
        let arg1 = header.get_u32_le();
        let data_length = header.get_u32_le();
        let data_crc32 = header.get_u32_le();
        let magic = header.get_u32_le();

        let corrupt_header = |reason: String| FrameError::Corrupt {
            reason,
            consumed: HEADER_LEN,
        };

        if magic != raw_command ^ 0xffff_ffff {
            return Err(corrupt_header(format!(
                "magic {:#010x} does not match command {:#010x}",
                magic, raw_command
            )));
        }
        let command = Command::from_u32(raw_command)
            .ok_or_else(|| corrupt_header(format!("unknown command {:#010x}", raw_command)))?;
        if data_length > max_payload {
            return Err(corrupt_header(format!(
                "payload of {} bytes exceeds limit of {}",
                data_length, max_payload
            )));
        }

        let expected = data_length as usize;
        let available = src.len() - HEADER_LEN;
        if available < expected {
            return Err(FrameError::IncompletePayload { expected, available });
        }

        let consumed = HEADER_LEN + expected;
        let payload = &src[HEADER_LEN..consumed];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != data_crc32 {
            return Err(FrameError::Corrupt {
                reason: format!(
                    "{} payload checksum {:#010x}, header says {:#010x}",
                    command, actual_crc, data_crc32
                ),
                consumed,
            });
        }

        Ok((
            AdbMessage {
                command,
                arg0,
                arg1,
                payload: Bytes::copy_from_slice(payload),
            },
            consumed,
        ))
    }

    /// Payload as text with any trailing NUL removed
    pub fn payload_text(&self) -> String {
        let trimmed = self.payload.strip_suffix(b"\0").unwrap_or(&self.payload[..]);
        String::from_utf8_lossy(trimmed).into_owned()
    }
}

impl fmt::Display for AdbMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:#x}, {:#x}, {} bytes)",
            self.command,
            self.arg0,
            self.arg1,
            self.payload.len()
        )
    }
}

fn nul_terminated(s: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(s.len() + 1);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Accumulates socket reads and yields whole messages
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_payload: u32,
}

impl FrameBuffer {
    /// Create a buffer rejecting payloads over `max_payload`
    pub fn new(max_payload: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(HEADER_LEN + 4096),
            max_payload,
        }
    }

    /// Append bytes read from the socket
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffered byte count
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Mutable access for reads straight into the buffer
    pub fn as_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Next whole message
    ///
    /// `Ok(None)` means more bytes are needed. A corrupt frame is dropped from
    /// the buffer before the error is returned, so the caller can keep going.
    pub fn next_message(&mut self) -> Result<Option<AdbMessage>, FrameError> {
        match AdbMessage::decode_with_limit(&self.buf, self.max_payload) {
            Ok((message, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(message))
            }
            Err(FrameError::FrameTooShort { .. }) | Err(FrameError::IncompletePayload { .. }) => Ok(None),
            Err(FrameError::Corrupt { reason, consumed }) => {
                self.buf.advance(consumed.min(self.buf.len()));
                Err(FrameError::Corrupt { reason, consumed })
            }
        }
    }
}
