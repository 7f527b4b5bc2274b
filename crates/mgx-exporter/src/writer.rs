//! Single-writer file rotation engine
//!
//! The engine owns the open output file and, while exporting, the ledger.
//! It consumes [`WriterMessage`]s from a bounded channel on a blocking
//! thread:
//!
//! - `Record` appends the encoded bytes to the current `<n>.fasta.gz`,
//!   updating the open ledger entry and rotating once the file reaches the
//!   size threshold.
//! - `Boundary` closes the open entry, makes its records durable, persists the
//!   ledger and opens the next entry. Two boundaries in a row end the engine.
//! - `Terminate` closes the open entry (if it saw records) and ends the engine.
//!
//! A replay engine (used when truncating a file) writes only: no ledger, no
//! rotation.

use mgx_common::fasta::{Compression, FastaWriter};
use std::fs::{File, OpenOptions};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RECORD_QUEUE_CAPACITY;
use crate::error::{ExportError, Result};
use crate::layout::ExportLayout;
use crate::ledger::{Ledger, LedgerCursor};
use crate::record::TaggedRecord;

/// A message sent from the producer to the writer
#[derive(Debug)]
pub enum WriterMessage {
    /// Append one record
    Record(TaggedRecord),

    /// The producer moved on to another project
    ///
    /// - `ack`: signalled once the previous project is finalized and the
    ///   ledger snapshot persisted.
    Boundary { ack: oneshot::Sender<()> },

    /// The producer is done; finalize and end
    Terminate { ack: oneshot::Sender<()> },
}

impl WriterMessage {
    /// A boundary message and the receiver of its acknowledgment
    pub fn boundary() -> (Self, oneshot::Receiver<()>) {
        let (ack, done) = oneshot::channel();
        (Self::Boundary { ack }, done)
    }

    /// A terminate message and the receiver of its acknowledgment
    pub fn terminate() -> (Self, oneshot::Receiver<()>) {
        let (ack, done) = oneshot::channel();
        (Self::Terminate { ack }, done)
    }
}

/// Whether the engine keeps going after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Owns the current output file and the ledger tail
pub struct WriterEngine {
    layout: ExportLayout,
    threshold: u64,
    /// `None` in replay mode
    ledger: Option<Ledger>,
    cursor: LedgerCursor,
    file: u32,
    record: u64,
    output: Option<FastaWriter<File>>,
    /// Records written since the last boundary
    pending: bool,
    /// The previous message was a boundary
    at_boundary: bool,
    written: u64,
}

impl WriterEngine {
    /// Engine that appends after the ledger's last record and tracks entries
    pub fn tracking(layout: ExportLayout, mut ledger: Ledger, threshold: u64) -> Result<Self> {
        let (mut file, mut record) = match ledger.last() {
            Some(last) if last.end_file > 0 => (last.end_file, last.end_record + 1),
            _ => (1, 1),
        };

        if layout.file_size(file)?.is_some_and(|size| size >= threshold) {
            file += 1;
            record = 1;
        }

        ledger.open_entry();
        info!(file, record, threshold, "Writer positioned");

        Ok(Self {
            layout,
            threshold,
            ledger: Some(ledger),
            cursor: LedgerCursor::new(),
            file,
            record,
            output: None,
            pending: false,
            at_boundary: false,
            written: 0,
        })
    }

    /// Engine that rewrites `file` from its first record, without a ledger
    pub fn replay(layout: ExportLayout, file: u32) -> Self {
        Self {
            layout,
            threshold: u64::MAX,
            ledger: None,
            cursor: LedgerCursor::new(),
            file,
            record: 1,
            output: None,
            pending: false,
            at_boundary: false,
            written: 0,
        }
    }

    /// Current `(file, record)` position of the next write
    pub fn position(&self) -> (u32, u64) {
        (self.file, self.record)
    }

    /// Records written by this engine
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn ledger(&self) -> Option<&Ledger> {
        self.ledger.as_ref()
    }

    /// Process one message
    pub fn handle(&mut self, message: WriterMessage) -> Result<Flow> {
        match message {
            WriterMessage::Record(record) => {
                self.write(record)?;
                Ok(Flow::Continue)
            },
            WriterMessage::Boundary { ack } => {
                let flow = if self.at_boundary {
                    debug!("Second consecutive boundary, closing writer");
                    self.close()?;
                    Flow::Stop
                } else {
                    self.boundary()?;
                    Flow::Continue
                };
                let _ = ack.send(());
                Ok(flow)
            },
            WriterMessage::Terminate { ack } => {
                if self.pending {
                    self.boundary()?;
                }
                self.close()?;
                let _ = ack.send(());
                Ok(Flow::Stop)
            },
        }
    }

    /// Append one record, rotating when the file reaches the threshold
    pub fn write(&mut self, record: TaggedRecord) -> Result<()> {
        if let Some(ledger) = &self.ledger {
            if let Err(violation) = self.cursor.check(ledger, &record.project) {
                error!(
                    error = %violation,
                    sample = %record.sample,
                    "Protocol violation, dropping record"
                );
                return Ok(());
            }
        }

        let (file, position) = (self.file, self.record);
        let size = {
            let output = self.open_output()?;
            if let Err(e) = output.write_encoded(&record.bytes) {
                error!(file, record = position, error = %e, "Failed to write record, skipping");
                return Ok(());
            }
            output.get_ref().metadata().map(|m| m.len())
        };

        self.written += 1;
        self.at_boundary = false;

        let Some(ledger) = &mut self.ledger else {
            self.record += 1;
            return Ok(());
        };

        if let Err(violation) =
            self.cursor.observe(ledger, &record.project, &record.sample, file, position)
        {
            error!(error = %violation, "Ledger rejected a written record");
        }
        self.pending = true;

        match size {
            Ok(size) if size >= self.threshold => self.rotate()?,
            Ok(_) => self.record += 1,
            Err(e) => {
                warn!(file, error = %e, "Unable to read export file size");
                self.record += 1;
            },
        }
        Ok(())
    }

    /// Finalize the open entry and persist the ledger
    fn boundary(&mut self) -> Result<()> {
        self.at_boundary = true;
        if !self.pending {
            return Ok(());
        }
        self.pending = false;

        let Some(ledger) = &mut self.ledger else {
            return Ok(());
        };
        if !self.cursor.finalize(ledger) {
            return Ok(());
        }

        if let Some(output) = &mut self.output {
            output.flush()?;
            output.get_ref().sync_data()?;
        }
        ledger.save(self.layout.index_path())?;

        if let Some(entry) = ledger.last() {
            info!(
                project = %entry.project,
                samples = entry.samples.len(),
                start = %format!("{}:{}", entry.start_file, entry.start_record),
                end = %format!("{}:{}", entry.end_file, entry.end_record),
                "Project exported"
            );
        }
        ledger.open_entry();
        Ok(())
    }

    fn open_output(&mut self) -> Result<&mut FastaWriter<File>> {
        if self.output.is_none() {
            let path = self.layout.file_path(self.file);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| ExportError::FatalIo {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "Opened export file");
            self.output = Some(FastaWriter::new(file, Compression::Gzip));
        }

        self.output.as_mut().ok_or(ExportError::WriterStopped)
    }

    fn rotate(&mut self) -> Result<()> {
        self.close()?;
        self.file += 1;
        self.record = 1;
        debug!(file = self.file, "Rotated export file");
        Ok(())
    }

    /// Close the current file, ending its gzip member
    fn close(&mut self) -> Result<()> {
        if let Some(output) = self.output.take() {
            let file = output.finish()?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Consume messages until told to stop or the producer goes away
    ///
    /// Returns the ledger in tracking mode, without a trailing empty entry.
    pub fn run(mut self, mut rx: mpsc::Receiver<WriterMessage>) -> Result<Option<Ledger>> {
        while let Some(message) = rx.blocking_recv() {
            if self.handle(message)? == Flow::Stop {
                return Ok(self.into_ledger());
            }
        }

        warn!(
            written = self.written,
            "Producer went away; closing export file without finalizing"
        );
        self.close()?;
        Ok(self.into_ledger())
    }

    fn into_ledger(self) -> Option<Ledger> {
        let mut ledger = self.ledger?;
        ledger.discard_empty_tail();
        Some(ledger)
    }

    /// Run the engine on a blocking thread behind a bounded channel
    pub fn spawn(self) -> WriterHandle {
        let (tx, rx) = mpsc::channel(RECORD_QUEUE_CAPACITY);
        let join = tokio::task::spawn_blocking(move || self.run(rx));
        WriterHandle { tx, join }
    }
}

/// Producer side of a spawned [`WriterEngine`]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterMessage>,
    join: JoinHandle<Result<Option<Ledger>>>,
}

impl WriterHandle {
    /// Queue a record, waiting while the queue is full
    pub async fn send(&self, record: TaggedRecord) -> Result<()> {
        self.tx
            .send(WriterMessage::Record(record))
            .await
            .map_err(|_| ExportError::WriterStopped)
    }

    /// Signal a project boundary and wait until it is persisted
    pub async fn boundary(&self) -> Result<()> {
        self.signal(WriterMessage::boundary()).await
    }

    /// Ask the writer to finalize and stop, waiting for it to do so
    pub async fn terminate(&self) -> Result<()> {
        self.signal(WriterMessage::terminate()).await
    }

    async fn signal(&self, (message, done): (WriterMessage, oneshot::Receiver<()>)) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ExportError::WriterStopped)?;
        done.await.map_err(|_| ExportError::WriterStopped)
    }

    /// Wait for the engine to end and take back its ledger
    ///
    /// Dropping the sender first lets an engine still waiting on messages
    /// close its file without finalizing.
    pub async fn join(self) -> Result<Option<Ledger>> {
        drop(self.tx);
        self.join
            .await
            .map_err(|e| ExportError::Io(std::io::Error::other(e)))?
    }
}
