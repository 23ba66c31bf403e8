//! Component B: RFC 6455 header encode/decode and the constraints spec
//! §4.2 enforces during decode. Payload reading and fragment-sequencing
//! live in [`crate::reader`]; this module only knows about one frame's
//! header at a time, grounded on the teacher's `read.rs::read_frame` /
//! `write.rs::write_frame_{client,server}` bit-twiddling, generalized to
//! the full constraint list spec §4.2 names.

use crate::connection::Role;
use crate::error::Error;
use crate::frame::{OpCode, MAX_CONTROL_PAYLOAD, MAX_PAYLOAD_SIZE};
use crate::transport::InputTransport;
use tokio::io::AsyncRead;

/// A decoded frame header, payload not yet read.
#[derive(Debug, Clone, Copy)]
pub struct DecodedHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

/// Read and validate one frame header per spec §4.2. Does not read the
/// payload itself (spec §4.4 step 4/5 reads that in chunks).
pub async fn read_header<R>(
    transport: &mut InputTransport<R>,
    role: Role,
) -> Result<DecodedHeader, Error>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    transport.post_read_exact(&mut head).await?;

    let fin = head[0] & 0b1000_0000 != 0;
    let rsv = head[0] & 0b0111_0000;
    if rsv != 0 {
        return Err(Error::RsvNotZero(rsv));
    }
    let opcode = OpCode::from_byte(head[0] & 0b0000_1111)?;

    if !fin && opcode.is_control() {
        return Err(Error::ControlFrameFragmented);
    }

    let masked = head[1] & 0b1000_0000 != 0;
    let len7 = head[1] & 0b0111_1111;

    if opcode.is_control() && len7 > MAX_CONTROL_PAYLOAD as u8 {
        return Err(Error::ControlFramePayloadTooLarge(len7 as usize));
    }

    // Server role requires every incoming frame to be masked; client role
    // accepts a mask bit (unusual, but not an error) per spec §4.2.
    if role == Role::Server && !masked {
        return Err(Error::UnmaskedFrameFromClient);
    }

    let payload_len: u64 = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            transport.post_read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            transport.post_read_exact(&mut ext).await?;
            let len = u64::from_be_bytes(ext);
            if len >= MAX_PAYLOAD_SIZE {
                return Err(Error::PayloadTooLarge(len));
            }
            len
        }
        n => n as u64,
    };

    if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD as u64 {
        return Err(Error::ControlFramePayloadTooLarge(payload_len as usize));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        transport.post_read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    Ok(DecodedHeader { fin, opcode, masked, mask, payload_len })
}

/// Build the header bytes for an outgoing frame (the mask key, if any, is
/// appended after the length field, matching the wire layout; the payload
/// itself is written separately by [`crate::writer`]).
pub fn encode_header(fin: bool, opcode: OpCode, payload_len: usize, mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(14);
    let first_byte = ((fin as u8) << 7) | opcode.as_byte();
    out.push(first_byte);

    let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };

    if payload_len <= 125 {
        out.push(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        // Top four bytes are always zero: the sanity cap (spec §4.2, §9
        // OQ-3) keeps payloads under 2^32, so the high word is always 0.
        out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }

    if let Some(key) = mask {
        out.extend_from_slice(&key);
    }

    out
}
