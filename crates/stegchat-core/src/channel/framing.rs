//! `[u32 little endian length][body]` frames, the only framing on the wire.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::StegchatError;
use crate::result::Result;

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Upper bound for a frame body, larger announcements are treated as garbage
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Writes the length prefix and the complete body, then flushes.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME_LEN {
        return Err(StegchatError::ProtocolViolation(format!(
            "frame of {} bytes exceeds the limit of {MAX_FRAME_LEN} bytes",
            body.len()
        )));
    }

    writer.write_u32::<LittleEndian>(body.len() as u32)?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Reads a length prefix and checks it against [`MAX_FRAME_LEN`].
pub fn read_frame_len<R: Read>(reader: &mut R) -> Result<usize> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    if len > MAX_FRAME_LEN {
        return Err(StegchatError::ProtocolViolation(format!(
            "peer announced a frame of {len} bytes"
        )));
    }
    Ok(len)
}

/// Reads exactly `len` body bytes, a stream that ends early is a transport error.
pub fn read_frame_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_frame_len(reader)?;
    read_frame_body(reader, len)
}
