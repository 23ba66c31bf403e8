//! Component C: ownership of the two byte pipes, plus the queued-I/O
//! counters spec §3/§4.3/§8 (property 7) require.
//!
//! Spec §3 models a Connection as having a separate input channel and
//! output channel (not one combined duplex handle), which maps cleanly
//! onto two independent structs here rather than one — that also sidesteps
//! the reader/writer aliasing problem the teacher's single `Writer` behind
//! `Arc<Mutex<..>>>` works around, since [`InputTransport`] is only ever
//! driven by [`crate::reader`] and [`OutputTransport`] can be shared (via
//! `Arc<Mutex<..>>`, same idiom as the teacher's `write.rs`) between the
//! reader's ping/pong/close replies and the caller's own writes.
//!
//! Spec §9 "Callback-based I/O" sanctions either a typed state machine or
//! cooperative `async`/`await` as the reimplementation strategy; this
//! crate takes the `async` route the teacher already uses throughout
//! (`read.rs`/`write.rs` are plain `async fn`s over a `BufReader`/
//! `WriteHalf`). A "post" becomes an `async` call; the queued counter is
//! bumped before the await and dropped after it completes, which
//! preserves the invariant spec §8 property 7 asks for: posted minus
//! completed equals the counter, and the counter never goes negative.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// The read-side byte pipe for one connection.
pub struct InputTransport<R> {
    reader: R,
    queued_input: AtomicI64,
    bytes_in: AtomicI64,
}

impl<R> InputTransport<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self { reader, queued_input: AtomicI64::new(0), bytes_in: AtomicI64::new(0) }
    }

    /// Reads posted but not yet completed. Never negative (spec §8 prop 7).
    pub fn queued_input(&self) -> i64 {
        self.queued_input.load(Ordering::SeqCst)
    }

    pub fn total_bytes_in(&self) -> i64 {
        self.bytes_in.load(Ordering::SeqCst)
    }

    /// post-read: fills `buf` completely, looping through short reads
    /// internally (spec §4.3 "Transports can short-read").
    pub async fn post_read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.queued_input.fetch_add(1, Ordering::SeqCst);
        let result = self.reader.read_exact(buf).await;
        self.queued_input.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(_) => {
                self.bytes_in.fetch_add(buf.len() as i64, Ordering::SeqCst);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::PeerEof),
            Err(e) => Err(Error::Io { source: e }),
        }
    }

    /// cancel-reads: best-effort; in an `async`/`await` lowering there is
    /// no separate cancellation other than dropping the in-flight future,
    /// which the connection's shut-down path does by ceasing to poll it.
    /// Exposed for symmetry with spec §4.3 and to document the mapping.
    pub fn cancel_reads(&self) {
        // Cancellation happens by the caller simply not awaiting another
        // post_read_exact; nothing to release here.
    }
}

/// The write-side byte pipe for one connection.
pub struct OutputTransport<W> {
    writer: W,
    queued_output: AtomicI64,
    bytes_out: AtomicI64,
}

impl<W> OutputTransport<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer, queued_output: AtomicI64::new(0), bytes_out: AtomicI64::new(0) }
    }

    pub fn queued_output(&self) -> i64 {
        self.queued_output.load(Ordering::SeqCst)
    }

    pub fn total_bytes_out(&self) -> i64 {
        self.bytes_out.load(Ordering::SeqCst)
    }

    /// post-write: writes all of `buf`.
    pub async fn post_write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.queued_output.fetch_add(1, Ordering::SeqCst);
        let result = self.writer.write_all(buf).await;
        self.queued_output.fetch_sub(1, Ordering::SeqCst);
        result?;
        self.bytes_out.fetch_add(buf.len() as i64, Ordering::SeqCst);
        Ok(())
    }

    /// post-writeof: signal end-of-output (server-role shutdown, spec
    /// §4.6 closed -> shut transition).
    pub async fn post_writeof(&mut self) -> Result<(), Error> {
        self.queued_output.fetch_add(1, Ordering::SeqCst);
        let result = self.writer.shutdown().await;
        self.queued_output.fetch_sub(1, Ordering::SeqCst);
        result.map_err(|source| Error::Io { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn queued_counters_return_to_zero_after_completion() {
        let mut input = InputTransport::new(Cursor::new(vec![1, 2, 3, 4]));
        let mut buf = [0u8; 4];
        input.post_read_exact(&mut buf).await.unwrap();
        assert_eq!(input.queued_input(), 0);
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut output = OutputTransport::new(Vec::<u8>::new());
        output.post_write_all(&[9, 9]).await.unwrap();
        assert_eq!(output.queued_output(), 0);
    }

    #[tokio::test]
    async fn short_reads_are_assembled_transparently() {
        // Cursor delivers everything in one read, but the contract must
        // still hold for transports that would short-read.
        let mut input = InputTransport::new(Cursor::new(vec![0xAA; 300]));
        let mut buf = [0u8; 300];
        input.post_read_exact(&mut buf).await.unwrap();
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[tokio::test]
    async fn peer_eof_is_reported_distinctly() {
        let mut input = InputTransport::new(Cursor::new(Vec::<u8>::new()));
        let mut buf = [0u8; 1];
        let err = input.post_read_exact(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::PeerEof));
    }

    #[tokio::test]
    async fn byte_totals_accumulate() {
        let mut input = InputTransport::new(Cursor::new(vec![1, 2, 3]));
        let mut buf = [0u8; 3];
        input.post_read_exact(&mut buf).await.unwrap();
        assert_eq!(input.total_bytes_in(), 3);

        let mut output = OutputTransport::new(Vec::<u8>::new());
        output.post_write_all(&[9, 9]).await.unwrap();
        assert_eq!(output.total_bytes_out(), 2);
    }
}
