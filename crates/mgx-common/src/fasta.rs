//! Streaming FASTA codec
//!
//! Records are framed as `>identifier\nBODY\n`. Decoding is incremental: the
//! [`FastaCodec`] is fed whatever bytes the transport delivers and only emits a
//! record once the *next* record delimiter (or end of stream) proves the
//! record is complete, so a network chunk may end anywhere inside a record.
//!
//! A `>` only delimits a record when it starts a line. A `>` inside an
//! identifier or a sequence body (no newline between the previous split and
//! the `>`) is accumulated as ordinary data.
//!
//! # Examples
//!
//! ```rust
//! use mgx_common::fasta::{Compression, FastaReader, SequenceRecord};
//!
//! let data = b">read_1\nacgt\nACGT\n>read_2\nNNNN\n";
//! let records: Vec<SequenceRecord> = FastaReader::new(&data[..], Compression::None)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! assert_eq!(records[0].id, b"read_1");
//! assert_eq!(records[0].body, b"acgtACGT");
//! assert_eq!(records[0].encode(), b">read_1\nACGTACGT\n");
//! ```

use bytes::BytesMut;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::borrow::Cow;
use std::io::{self, Read, Write};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::error::{MgxError, Result};

/// Byte that introduces every record
pub const RECORD_DELIMITER: u8 = b'>';

/// Size of each read from a synchronous source
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A single decoded sequence record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Identifier line, without the leading delimiter
    pub id: Vec<u8>,
    /// Sequence body with line breaks removed, case preserved
    pub body: Vec<u8>,
}

impl SequenceRecord {
    pub fn new(id: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }

    /// Identifier as text, lossy for non UTF-8 input
    pub fn id_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.id)
    }

    /// Length of the encoded form in bytes
    pub fn encoded_len(&self) -> usize {
        self.id.len() + self.body.len() + 3
    }

    /// Encode as `>id\nBODY\n` with the body uppercased
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Append the encoded form to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(RECORD_DELIMITER);
        out.extend_from_slice(&self.id);
        out.push(b'\n');
        out.extend(self.body.iter().map(u8::to_ascii_uppercase));
        out.push(b'\n');
    }
}

/// Incremental FASTA decoder
///
/// Implements [`Decoder`] so it can sit behind a `FramedRead` on any async
/// byte stream. [`FastaReader`] drives the same codec over a blocking reader.
#[derive(Debug)]
pub struct FastaCodec {
    /// Bytes of the pending buffer already searched for a delimiter
    scanned: usize,
    /// Whether the pending buffer begins at the start of a line
    at_line_start: bool,
}

impl Default for FastaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FastaCodec {
    pub fn new() -> Self {
        Self {
            scanned: 0,
            at_line_start: true,
        }
    }

    /// Position of the next delimiter that starts a line, if buffered
    fn next_boundary(&mut self, buf: &[u8]) -> Option<usize> {
        while let Some(offset) = buf[self.scanned..]
            .iter()
            .position(|&b| b == RECORD_DELIMITER)
        {
            let pos = self.scanned + offset;
            self.scanned = pos + 1;

            let starts_line = if pos == 0 {
                self.at_line_start
            } else {
                buf[pos - 1] == b'\n'
            };
            if starts_line {
                return Some(pos);
            }
        }

        self.scanned = buf.len();
        None
    }
}

impl Decoder for FastaCodec {
    type Item = SequenceRecord;
    type Error = MgxError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<SequenceRecord>> {
        while let Some(pos) = self.next_boundary(buf) {
            let chunk = buf.split_to(pos + 1);
            self.scanned = 0;
            self.at_line_start = false;

            if let Some(record) = parse_record(&chunk[..pos])? {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<SequenceRecord>> {
        if let Some(record) = self.decode(buf)? {
            return Ok(Some(record));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let chunk = buf.split();
        self.scanned = 0;
        parse_record(&chunk)
    }
}

/// Parse the bytes between two delimiters
///
/// Returns `Ok(None)` for an empty or all-whitespace split.
fn parse_record(content: &[u8]) -> Result<Option<SequenceRecord>> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let mut lines = content.split(|&b| b == b'\n');
    let id = lines.next().map(<[u8]>::trim_ascii).unwrap_or_default();
    if id.is_empty() {
        return Err(MgxError::invalid_record("record has an empty identifier"));
    }

    let mut body = Vec::with_capacity(content.len() - id.len());
    for line in lines {
        body.extend_from_slice(line.trim_ascii());
    }

    Ok(Some(SequenceRecord::new(id, body)))
}

/// Compression applied to a record stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain bytes
    #[default]
    None,
    /// Gzip; concatenated members are read as one stream
    Gzip,
}

enum Source<R: Read> {
    Plain(R),
    Gzip(MultiGzDecoder<R>),
}

impl<R: Read> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Plain(r) => r.read(buf),
            Source::Gzip(r) => r.read(buf),
        }
    }
}

/// Blocking record iterator over a reader
pub struct FastaReader<R: Read> {
    source: Source<R>,
    codec: FastaCodec,
    buf: BytesMut,
    eof: bool,
    done: bool,
}

impl<R: Read> FastaReader<R> {
    /// Create a reader; `compression` selects the decompression layer
    pub fn new(reader: R, compression: Compression) -> Self {
        let source = match compression {
            Compression::None => Source::Plain(reader),
            Compression::Gzip => Source::Gzip(MultiGzDecoder::new(reader)),
        };

        Self {
            source,
            codec: FastaCodec::new(),
            buf: BytesMut::new(),
            eof: false,
            done: false,
        }
    }

    /// Read the next record, `Ok(None)` once the stream is exhausted
    pub fn read_record(&mut self) -> Result<Option<SequenceRecord>> {
        loop {
            if self.eof {
                return self.codec.decode_eof(&mut self.buf);
            }
            if let Some(record) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(record));
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK_SIZE, 0);

        let read = loop {
            match self.source.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A gzip member cut short by a killed writer: keep what decoded
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(error = %e, "Input ended inside a compressed member");
                    break 0;
                },
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                },
            }
        };

        self.buf.truncate(start + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: Read> Iterator for FastaReader<R> {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let next = self.read_record().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

enum Sink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

/// Appends encoded records to a writer
pub struct FastaWriter<W: Write> {
    sink: Sink<W>,
}

impl<W: Write> FastaWriter<W> {
    /// Create a writer; `compression` selects the compression layer
    pub fn new(writer: W, compression: Compression) -> Self {
        let sink = match compression {
            Compression::None => Sink::Plain(writer),
            Compression::Gzip => {
                Sink::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
            },
        };
        Self { sink }
    }

    /// Write one already-encoded record
    pub fn write_encoded(&mut self, record: &[u8]) -> io::Result<()> {
        match &mut self.sink {
            Sink::Plain(w) => w.write_all(record),
            Sink::Gzip(w) => w.write_all(record),
        }
    }

    /// Encode and write one record
    pub fn write_record(&mut self, record: &SequenceRecord) -> io::Result<()> {
        self.write_encoded(&record.encode())
    }

    /// Underlying writer
    pub fn get_ref(&self) -> &W {
        match &self.sink {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w.get_ref(),
        }
    }

    /// Push everything written so far down to the underlying writer
    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }

    /// Close the compression layer and return the underlying writer
    pub fn finish(self) -> io::Result<W> {
        match self.sink {
            Sink::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            },
            Sink::Gzip(w) => w.finish(),
        }
    }
}
