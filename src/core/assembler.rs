use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::core::error::AssembleError;

/// Truncates or creates the output file.
pub async fn create_output(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    File::create(path).await
}

/// Opens an existing output for appending and reports its length; `None` if it does not exist.
pub async fn open_for_append(path: &Path) -> std::io::Result<Option<(File, u64)>> {
    let file = match OpenOptions::new().append(true).open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let len = file.metadata().await?.len();
    Ok(Some((file, len)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenSegment {
    pub index: usize,
    pub len: u64,
}

/// Writes fetched segments to the sink strictly in index order.
///
/// Results ahead of the cursor wait in `pending`; a result at the cursor is
/// written together with every buffered successor that became contiguous.
/// The window bounds the buffer: each index is held at most once.
pub struct Reassembler<W> {
    sink: W,
    cursor: usize,
    end: usize,
    pending: BTreeMap<usize, Bytes>,
    segments_written: usize,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> Reassembler<W> {
    pub fn new(sink: W, start: usize, end: usize) -> Self {
        Self {
            sink,
            cursor: start,
            end,
            pending: BTreeMap::new(),
            segments_written: 0,
            bytes_written: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.cursor > self.end
    }

    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn accept(&mut self, index: usize, body: Bytes) -> Result<Vec<WrittenSegment>, AssembleError> {
        if index > self.end {
            return Err(AssembleError::OutOfWindow { index, end: self.end });
        }
        if index < self.cursor || self.pending.contains_key(&index) {
            return Err(AssembleError::Duplicate { index, cursor: self.cursor });
        }

        if index != self.cursor {
            self.pending.insert(index, body);
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        let mut next = Some(body);
        while let Some(body) = next {
            let index = self.cursor;
            self.sink
                .write_all(&body)
                .await
                .map_err(|source| AssembleError::Io { index, source })?;
            let len = body.len() as u64;
            drop(body);

            self.segments_written += 1;
            self.bytes_written += len;
            written.push(WrittenSegment { index, len });

            self.cursor += 1;
            next = self.pending.remove(&self.cursor);
        }

        let last = self.cursor - 1;
        self.sink
            .flush()
            .await
            .map_err(|source| AssembleError::Io { index: last, source })?;

        Ok(written)
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush().await
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
