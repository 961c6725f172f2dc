use {
    crate::{Error, Result},
    tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
};

/// Bound on lines exchanged during the handshake.
pub const HANDSHAKE_LINE_LIMIT: usize = 4096;

/// Bound on lines exchanged after authentication.
pub const RPC_LINE_LIMIT: usize = 1 << 20;

/// A buffered byte stream that reads newline-terminated lines of bounded length.
pub struct BufferedStream<S> {
    inner: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> BufferedStream<S> {
    pub fn new(inner: S) -> Self {
        BufferedStream {
            inner: BufReader::with_capacity(HANDSHAKE_LINE_LIMIT, inner),
        }
    }

    /// Reads one line including its trailing newline. Fails with [`Error::LineTooLong`]
    /// once more than `limit` bytes arrive without a newline.
    pub async fn read_line(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut line = Vec::with_capacity(200);
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            let (len, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if line.len() + len > limit {
                return Err(Error::LineTooLong);
            }
            line.extend_from_slice(&available[..len]);
            self.inner.consume(len);
            if complete {
                return Ok(line);
            }
        }
    }

    pub async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.inner.write_all(line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}
