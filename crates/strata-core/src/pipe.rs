//! Bounded in-process byte pipe.
//!
//! Connects the concat producer to the matcher during commit, and the
//! recipe reader to the file writer during restore. Built on a bounded
//! `crossbeam-channel`, so a slow consumer applies backpressure to the
//! producer. The writer half can carry an error to the reader, which
//! surfaces it as the reader's own I/O error.

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, Sender};

enum Block {
    Data(Vec<u8>),
    Failed(io::Error),
}

pub struct PipeWriter {
    tx: Sender<Block>,
    buf: Vec<u8>,
    block_size: usize,
}

pub struct PipeReader {
    rx: Receiver<Block>,
    current: Vec<u8>,
    pos: usize,
}

/// Create a pipe holding at most `depth` blocks of `block_size` bytes.
pub fn pipe(depth: usize, block_size: usize) -> (PipeReader, PipeWriter) {
    let (tx, rx) = bounded(depth);
    (
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
        },
        PipeWriter {
            tx,
            buf: Vec::with_capacity(block_size),
            block_size,
        },
    )
}

impl PipeWriter {
    /// Abort the stream: the reader's next read fails with `err`.
    /// Consumes the writer, closing the pipe.
    pub fn fail(mut self, err: io::Error) {
        let _ = self.flush();
        let _ = self.tx.send(Block::Failed(err));
    }

    fn send_buf(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(&mut self.buf, Vec::with_capacity(self.block_size));
        self.tx
            .send(Block::Data(block))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader disconnected"))
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.block_size - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == self.block_size {
                self.send_buf()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buf()
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let _ = self.send_buf();
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.current.len() {
            match self.rx.recv() {
                Ok(Block::Data(block)) => {
                    self.current = block;
                    self.pos = 0;
                }
                Ok(Block::Failed(err)) => return Err(err),
                // Writer dropped: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let take = buf.len().min(self.current.len() - self.pos);
        buf[..take].copy_from_slice(&self.current[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::gen_text;

    #[test]
    fn bytes_cross_the_pipe_intact() {
        let data = gen_text(1, 40_000);
        let (mut reader, mut writer) = pipe(4, 1024);
        let expected = data.clone();

        std::thread::scope(|s| {
            s.spawn(move || {
                writer.write_all(&data).unwrap();
                writer.flush().unwrap();
            });
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, expected);
        });
    }

    #[test]
    fn dropping_the_writer_ends_the_stream() {
        let (mut reader, writer) = pipe(2, 64);
        drop(writer);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn failure_reaches_the_reader_after_buffered_data() {
        let (mut reader, mut writer) = pipe(4, 64);
        writer.write_all(b"partial").unwrap();
        writer.fail(io::Error::new(io::ErrorKind::Other, "source went away"));

        let mut out = [0u8; 7];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"partial");
        let err = reader.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.to_string(), "source went away");
    }

    #[test]
    fn writer_errors_when_reader_is_gone() {
        let (reader, mut writer) = pipe(1, 8);
        drop(reader);
        // First block may land in the channel buffer; keep writing until the
        // disconnect surfaces.
        let err = loop {
            if let Err(e) = writer.write_all(&[0u8; 8]) {
                break e;
            }
        };
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
