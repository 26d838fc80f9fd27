//! Stream transport: one connection, whole frames in and out, strict request/response alternation.

use std::io;
use std::time::Duration;

use blockpost_core::wire::{self, FrameHeader, HEADER_SIZE};
use blockpost_core::{Frame, FrameDecodeError, FrameEncodeError, Token};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` when the peer closed the stream, wherever in the frame that happened.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_SIZE];
    if !read_full(reader, &mut raw).await? {
        return Ok(None);
    }
    let header = FrameHeader::parse(&raw)?;
    let mut metadata = vec![0u8; header.metadata_len as usize];
    if !read_full(reader, &mut metadata).await? {
        return Ok(None);
    }
    let metadata = wire::decode_metadata(&metadata)?;
    let mut payload = vec![0u8; header.payload_len as usize];
    if !read_full(reader, &mut payload).await? {
        return Ok(None);
    }
    Ok(Some(Frame { metadata, payload }))
}

/// Fill `buf`, awaiting as many partial reads as needed. False on end of stream.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool, TransportError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// One connection to the peer plus the most recent session token.
pub struct Session<S = TcpStream> {
    stream: Option<S>,
    io_timeout: Option<Duration>,
    token: Option<Token>,
}

impl Session<TcpStream> {
    /// Connect to `host:port`.
    pub async fn connect(
        host: &str,
        port: u16,
        io_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", host, port);
        let connect = TcpStream::connect(addr.as_str());
        let stream = match io_timeout {
            Some(d) => tokio::time::timeout(d, connect)
                .await
                .map_err(|_| TransportError::TimedOut)?,
            None => connect.await,
        }
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, error = %e, "cannot disable nagle");
        }
        debug!(%addr, "connected");
        Ok(Self::from_stream(stream, io_timeout))
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S, io_timeout: Option<Duration>) -> Self {
        Self {
            stream: Some(stream),
            io_timeout,
            token: None,
        }
    }

    /// Token from the most recent successful login.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        debug!(
            operation = ?frame.metadata.operation,
            payload = frame.payload.len(),
            "send frame"
        );
        with_deadline(deadline, write_frame(stream, frame)).await
    }

    /// Next frame from the peer; `Ok(None)` at end of stream.
    pub async fn receive(&mut self) -> Result<Option<Frame>, TransportError> {
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let frame = with_deadline(deadline, read_frame(stream)).await?;
        match &frame {
            Some(f) => debug!(
                operation = ?f.metadata.operation,
                status = ?f.metadata.status,
                payload = f.payload.len(),
                "received frame"
            ),
            None => debug!("peer closed the stream"),
        }
        Ok(frame)
    }

    /// Send one request and await its response. End of stream here is a connection error.
    pub async fn request(&mut self, frame: &Frame) -> Result<Frame, TransportError> {
        self.send(frame).await?;
        self.receive().await?.ok_or(TransportError::Closed)
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("session closed");
        }
    }
}

async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| TransportError::TimedOut)?,
        None => fut.await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connection closed")]
    Closed,
    #[error("timed out waiting for peer")]
    TimedOut,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol decode error: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("frame encode error: {0}")]
    Encode(#[from] FrameEncodeError),
}
