//! Component D: the Message Reader (spec §4.4), the most intricate piece
//! of the protocol layer. Reads one message at a time, interleaving
//! control-frame handling, and either fills a caller-supplied buffer or
//! assembles a dynamically grown one up to `input_data_max`.
//!
//! Grounded on the teacher's `src/read.rs` (`ReadStream::poll_messages`/
//! `read_frame`), generalized for dynamic-vs-fixed buffering, content-mode
//! transcoding, and the streaming UTF-8 fast-fail spec §4.1/§4.4 demand.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::codec::{self, DecodedHeader};
use crate::connection::{ContentMode, Role};
use crate::error::Error;
use crate::frame::OpCode;
use crate::scratch::unmask_byte;
use crate::transport::InputTransport;
use crate::utf8::{self, ACCEPT, REJECT};
use crate::writer::MessageWriter;

/// Bytes read from the transport per chunk while assembling a frame's
/// payload (spec §4.4 step 5, `input-mrs`). Exposed so `Connection` can
/// size it from `WEBSOCKET_INPUT_MRS` (spec §6).
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// A completed message, ready to hand to the caller. When the reader
/// assembled it dynamically, ownership of the backing buffer transfers on
/// [`ReaderMessage::grab`] (spec §4.4 "Dynamic buffering ownership",
/// §9 "Buffer grab transfer"). Rust's ownership model makes the original's
/// explicit "release if not grabbed" step automatic: if the caller never
/// grabs, `Drop` simply deallocates the `Vec`.
pub struct ReaderMessage {
    pub opcode: OpCode,
    buffer: Option<Vec<u8>>,
}

impl ReaderMessage {
    /// Transfers ownership of the assembled buffer to the caller. Calling
    /// this a second time is a usage bug (spec §9): there is nothing left
    /// to grab, so this panics rather than silently returning garbage.
    pub fn grab(&mut self) -> Vec<u8> {
        self.buffer.take().expect("double-grab of a message buffer")
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one call to [`MessageReader::read_message`] produced.
pub enum ReadOutcome {
    Message(ReaderMessage),
    /// A pong frame arrived; payload is handed back so the caller (the
    /// Connection, typically) can invoke its on-pong callback and rearm
    /// watchdog timers (spec §4.7).
    Pong(Vec<u8>),
    /// The peer sent a close frame. The reader has already queued (not
    /// necessarily flushed) nothing on its own — the state transition and
    /// reciprocal close frame are the Connection's job (spec §4.6), since
    /// only it knows whether this side is already closed.
    PeerClose { code: Option<u16>, reason: String },
}

struct FragmentState {
    opcode: OpCode,
    buffer: Vec<u8>,
    utf8_state: u32,
}

/// Drives [`InputTransport`] through [`crate::codec`] to assemble one
/// message at a time. Holds a shared handle to the connection's writer so
/// it can answer pings inline (spec §4.4 step 6) without waiting for the
/// caller.
pub struct MessageReader<R, W> {
    input: InputTransport<R>,
    writer: Arc<Mutex<MessageWriter<W>>>,
    role: Role,
    content_mode: ContentMode,
    chunk_size: usize,
    fragment: Option<FragmentState>,
}

impl<R, W> MessageReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        input: InputTransport<R>,
        writer: Arc<Mutex<MessageWriter<W>>>,
        role: Role,
        content_mode: ContentMode,
    ) -> Self {
        Self {
            input,
            writer,
            role,
            content_mode,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fragment: None,
        }
    }

    pub fn queued_input(&self) -> i64 {
        self.input.queued_input()
    }

    pub fn total_bytes_in(&self) -> i64 {
        self.input.total_bytes_in()
    }

    /// Reads one complete message, assembling a dynamically grown buffer
    /// capped at `max` bytes (0 means effectively uncapped, spec §4.4).
    /// Transparently answers pings and reports pongs/peer-close without
    /// requiring another call.
    pub async fn read_message(&mut self, max: usize) -> Result<ReadOutcome, Error> {
        let cap = if max == 0 { u32::MAX as usize } else { max };

        loop {
            let header = codec::read_header(&mut self.input, self.role).await?;

            if header.opcode.is_control() {
                let payload = self.read_control_payload(&header).await?;
                match header.opcode {
                    OpCode::Ping => {
                        self.writer.lock().await.send_control(OpCode::Pong, payload).await?;
                        continue;
                    }
                    OpCode::Pong => return Ok(ReadOutcome::Pong(payload)),
                    OpCode::Close => {
                        let (code, reason) = parse_close_payload(&payload);
                        return Ok(ReadOutcome::PeerClose { code, reason });
                    }
                    _ => unreachable!("is_control() only matches close/ping/pong"),
                }
            }

            // Data or continuation frame.
            match (&mut self.fragment, header.opcode) {
                (None, OpCode::Continuation) => return Err(Error::UnexpectedContinuation),
                (Some(_), op) if op.is_data() => return Err(Error::FragmentedMessageInProgress),
                (None, op) if !op.is_data() => return Err(Error::InvalidFirstFrameOpcode),
                (None, op) => {
                    self.fragment =
                        Some(FragmentState { opcode: op, buffer: Vec::new(), utf8_state: ACCEPT });
                }
                (Some(_), OpCode::Continuation) => {}
                _ => unreachable!(),
            }

            self.read_payload_into_fragment(&header, cap).await?;

            if header.fin {
                let fragment = self.fragment.take().expect("fragment set above");
                if fragment.opcode == OpCode::Text && fragment.utf8_state != ACCEPT {
                    return Err(Error::InvalidUtf8);
                }
                let data = self.apply_content_mode(fragment.opcode, fragment.buffer);
                return Ok(ReadOutcome::Message(ReaderMessage {
                    opcode: fragment.opcode,
                    buffer: Some(data),
                }));
            }
        }
    }

    /// Same pipeline, but fills a caller-supplied fixed buffer instead of
    /// growing one dynamically (spec §4.4 "buf: optional"). Returns the
    /// opcode and number of bytes written.
    pub async fn read_message_into(&mut self, buf: &mut [u8]) -> Result<(OpCode, usize), Error> {
        match self.read_message(buf.len()).await? {
            ReadOutcome::Message(mut msg) => {
                let data = msg.grab();
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((msg.opcode, n))
            }
            ReadOutcome::Pong(_) => {
                // Caller asked for a data message; a pong on its own
                // carries nothing to deliver here, so keep reading.
                Box::pin(self.read_message_into(buf)).await
            }
            ReadOutcome::PeerClose { code, reason } => Err(Error::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    format!("peer closed ({code:?}): {reason}"),
                ),
            }),
        }
    }

    async fn read_control_payload(&mut self, header: &DecodedHeader) -> Result<Vec<u8>, Error> {
        let mut payload = vec![0u8; header.payload_len as usize];
        if !payload.is_empty() {
            self.input.post_read_exact(&mut payload).await?;
        }
        if let Some(key) = header.mask {
            for (i, b) in payload.iter_mut().enumerate() {
                *b = unmask_byte(*b, key, i);
            }
        }
        Ok(payload)
    }

    async fn read_payload_into_fragment(
        &mut self,
        header: &DecodedHeader,
        cap: usize,
    ) -> Result<(), Error> {
        let mut remaining = header.payload_len as usize;
        let mut cursor = 0usize;
        let is_text = self.fragment.as_ref().map(|f| f.opcode == OpCode::Text).unwrap_or(false);

        while remaining > 0 {
            let take = remaining.min(self.chunk_size);
            let mut chunk = vec![0u8; take];
            self.input.post_read_exact(&mut chunk).await?;

            for byte in chunk.iter_mut() {
                if let Some(key) = header.mask {
                    *byte = unmask_byte(*byte, key, cursor);
                }
                cursor += 1;

                if is_text {
                    let fragment = self.fragment.as_mut().expect("fragment set by caller");
                    fragment.utf8_state = utf8::feed(fragment.utf8_state, *byte);
                    if fragment.utf8_state == REJECT {
                        self.fragment = None;
                        return Err(Error::InvalidUtf8);
                    }
                }
            }

            let fragment = self.fragment.as_mut().expect("fragment set by caller");
            if fragment.buffer.len() + chunk.len() > cap {
                let attempted = fragment.buffer.len() + chunk.len();
                self.fragment = None;
                return Err(Error::MessageTooLarge(attempted, cap));
            }
            fragment.buffer.extend_from_slice(&chunk);
            remaining -= take;
        }

        Ok(())
    }

    fn apply_content_mode(&self, opcode: OpCode, bytes: Vec<u8>) -> Vec<u8> {
        if opcode != OpCode::Text {
            return bytes;
        }
        match self.content_mode {
            ContentMode::Utf8 | ContentMode::Binary => bytes,
            ContentMode::Ascii(policy) => crate::connection::utf8_to_ascii(&bytes, policy),
        }
    }
}

fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason_bytes = &payload[2..payload.len().min(2 + 123)];
    let reason = String::from_utf8_lossy(reason_bytes).into_owned();
    (Some(code), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AsciiSubstitution;
    use crate::writer::MessageWriter;
    use std::io::Cursor;

    fn writer_arc() -> Arc<Mutex<MessageWriter<Vec<u8>>>> {
        Arc::new(Mutex::new(MessageWriter::new(
            crate::transport::OutputTransport::new(Vec::new()),
            Role::Server,
            None,
        )))
    }

    fn reader_over(bytes: Vec<u8>) -> MessageReader<Cursor<Vec<u8>>, Vec<u8>> {
        MessageReader::new(
            InputTransport::new(Cursor::new(bytes)),
            writer_arc(),
            Role::Server,
            ContentMode::Utf8,
        )
    }

    /// Server role requires every incoming frame to be masked
    /// (spec §4.2); tests that only care about fragmentation/UTF-8/
    /// overflow behavior and hand-write raw unmasked frame bytes build
    /// the reader in client role instead, so `codec::read_header` doesn't
    /// reject the frame before the behavior under test ever runs.
    fn reader_over_unmasked(bytes: Vec<u8>) -> MessageReader<Cursor<Vec<u8>>, Vec<u8>> {
        MessageReader::new(
            InputTransport::new(Cursor::new(bytes)),
            writer_arc(),
            Role::Client,
            ContentMode::Utf8,
        )
    }

    #[tokio::test]
    async fn b1_minimal_text_frame() {
        let mut reader = reader_over(vec![0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58]);
        match reader.read_message(0).await.unwrap() {
            ReadOutcome::Message(mut m) => {
                assert_eq!(m.opcode, OpCode::Text);
                assert_eq!(m.grab(), b"Hello");
            }
            _ => panic!("expected message"),
        }
    }

    #[tokio::test]
    async fn b3_fragmented_utf8_split_at_code_point_boundary() {
        let mut bytes = vec![0x01, 0x01, 0xC3]; // text, fin=0, len=1, payload C3
        bytes.extend_from_slice(&[0x80, 0x01, 0xA9]); // continuation, fin=1, len=1, payload A9
        let mut reader = reader_over_unmasked(bytes);
        match reader.read_message(0).await.unwrap() {
            ReadOutcome::Message(mut m) => {
                assert_eq!(m.grab(), "é".as_bytes());
            }
            _ => panic!("expected message"),
        }
    }

    #[tokio::test]
    async fn b4_illegal_utf8_fast_fails_without_fin() {
        // text, fin=0 (!), len=1, payload 0xC0 (overlong lead byte, always illegal)
        let bytes = vec![0x01, 0x01, 0xC0];
        let mut reader = reader_over_unmasked(bytes);
        let err = reader.read_message(0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8));
    }

    #[tokio::test]
    async fn b5_control_frame_interleaved_in_fragmented_message() {
        let mut bytes = vec![0x01, 0x02, b'H', b'i']; // text fin=0 "Hi"
        bytes.extend_from_slice(&[0x89, 0x02, b'a', b'b']); // ping fin=1 "ab"
        bytes.extend_from_slice(&[0x80, 0x01, b'!']); // continuation fin=1 "!"
        let mut reader = reader_over_unmasked(bytes);
        match reader.read_message(0).await.unwrap() {
            ReadOutcome::Message(mut m) => assert_eq!(m.grab(), b"Hi!"),
            _ => panic!("expected message"),
        }
        let pong_sent = reader.writer.lock().await.sent_frames_for_test();
        assert_eq!(pong_sent, 1);
    }

    #[tokio::test]
    async fn overflow_resets_fragment_state_and_errors() {
        let mut bytes = vec![0x82, 0x04]; // binary, fin=1, len=4
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        let mut reader = reader_over_unmasked(bytes);
        let err = reader.read_message(2).await.unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge(4, 2)));
        assert!(reader.fragment.is_none());
    }

    #[tokio::test]
    async fn continuation_without_message_in_progress_is_protocol_error() {
        let bytes = vec![0x80, 0x00];
        let mut reader = reader_over_unmasked(bytes);
        let err = reader.read_message(0).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedContinuation));
    }

    #[tokio::test]
    async fn ascii_content_mode_downcodes_latin1_range() {
        // "é" = U+00E9 = 0xC3 0xA9 in UTF-8; ascii mode maps any 2-byte
        // sequence whose code point is <= 0xFF down to a single byte.
        let bytes = vec![0x81, 0x02, 0xC3, 0xA9];
        let mut reader = MessageReader::new(
            InputTransport::new(Cursor::new(bytes)),
            writer_arc(),
            Role::Client,
            ContentMode::Ascii(AsciiSubstitution::Drop),
        );
        match reader.read_message(0).await.unwrap() {
            ReadOutcome::Message(mut m) => assert_eq!(m.grab(), vec![0xE9]),
            _ => panic!("expected message"),
        }
    }
}
