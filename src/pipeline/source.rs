//! Message sources - the seam to the external transport
//!
//! The transport owns retries and offsets; a source only hands over raw
//! payloads in order and can be closed on shutdown.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// One raw payload with its position in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: String,
    pub offset: u64,
}

#[async_trait]
pub trait MessageSource: Send {
    /// Next message; `None` once the source is exhausted
    async fn next_message(&mut self) -> Option<Result<Message, SourceError>>;

    /// Release the transport (commit offsets, close connections)
    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Source type for logging
    fn source_type(&self) -> &'static str;
}

/// Payloads pushed through an in-process channel
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
    offset: u64,
    closed: bool,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self {
            rx,
            offset: 0,
            closed: false,
        }
    }

    /// Source plus the sender feeding it
    pub fn channel(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Option<Result<Message, SourceError>> {
        loop {
            let payload = self.rx.recv().await?;
            if payload.trim().is_empty() {
                continue;
            }

            let offset = self.offset;
            self.offset += 1;
            return Some(Ok(Message { payload, offset }));
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.rx.close();
        self.closed = true;
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "Channel"
    }
}

/// One payload per line of an async reader (stdin, file)
///
/// Blank lines are skipped; the offset is the 0-based line number.
pub struct LineSource<R> {
    lines: Lines<R>,
    line_number: u64,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl LineSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl LineSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, SourceError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for LineSource<R> {
    async fn next_message(&mut self) -> Option<Result<Message, SourceError>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(SourceError::Io(e))),
            };

            let offset = self.line_number;
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }
            return Some(Ok(Message {
                payload: line,
                offset,
            }));
        }
    }

    fn source_type(&self) -> &'static str {
        "Lines"
    }
}
