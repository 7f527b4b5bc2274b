//! Export orchestration
//!
//! [`Exporter`] runs one of the four operations against an export directory:
//!
//! - [`Exporter::export`] streams new projects from a [`NodeSource`] into the
//!   rotating output files, resuming after the last exported project.
//! - [`Exporter::rebuild_index`] reconstructs `export.index` from the output
//!   files alone.
//! - [`Exporter::clean`] removes files the index does not know about and cuts
//!   the last file back to the last indexed record.
//! - [`Exporter::remove`] rolls back the last entries of the index.

use futures::StreamExt;
use mgx_common::fasta::{Compression, FastaCodec, FastaReader};
use mgx_common::MgxError;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::layout::{describe_files, ExportLayout};
use crate::ledger::{Ledger, LedgerCursor};
use crate::progress::ExportProgress;
use crate::record::{RecordHeader, TaggedRecord};
use crate::source::{NodeSource, SourceItem};
use crate::writer::{WriterEngine, WriterHandle, WriterMessage};

/// Totals of one export run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Projects started in this run
    pub projects: usize,
    /// Sequence files downloaded
    pub samples: usize,
    /// Records handed to the writer
    pub records: u64,
    /// Listed files that were not exported
    pub skipped: usize,
}

/// Runs exporter operations against one export directory
pub struct Exporter {
    config: ExportConfig,
    layout: ExportLayout,
    show_progress: bool,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Self {
        let layout = ExportLayout::new(config.directory.clone());
        Self {
            config,
            layout,
            show_progress: false,
        }
    }

    /// Draw a spinner while exporting
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn layout(&self) -> &ExportLayout {
        &self.layout
    }

    pub fn load_ledger(&self) -> Result<Ledger> {
        Ledger::load(self.layout.index_path())
    }

    /// Check that the ledger and the output files agree
    pub fn validate(&self, ledger: &Ledger) -> Result<()> {
        let interrupted = self.layout.temp_files()?;
        if !interrupted.is_empty() {
            return Err(ExportError::validation(format!(
                "interrupted truncation of {}, run clean",
                interrupted
                    .iter()
                    .map(|&n| self.layout.temp_path(n).display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if let Some((position, project)) = ledger.first_incomplete() {
            return Err(ExportError::validation(format!(
                "project {} ({} out of {} exports) is incomplete",
                project,
                position,
                ledger.len()
            )));
        }

        let missing = self.layout.missing_files(&ledger.file_numbers(0));
        if !missing.is_empty() {
            return Err(ExportError::validation(format!(
                "directory missing files: {}",
                describe_files(&self.layout, &missing)
            )));
        }

        let unindexed = ledger.unindexed(&self.layout.export_files()?);
        if !unindexed.is_empty() {
            return Err(ExportError::validation(format!(
                "index missing files: {}",
                describe_files(&self.layout, &unindexed)
            )));
        }

        Ok(())
    }

    /// Export every listed project not yet in the index
    pub async fn export<S>(&self, source: &mut S) -> Result<ExportSummary>
    where
        S: NodeSource + ?Sized,
    {
        let started = Instant::now();
        self.layout.create()?;

        let ledger = self.load_ledger()?;
        self.validate(&ledger)?;

        let mut known: HashSet<String> =
            ledger.entries().iter().map(|e| e.project.clone()).collect();
        info!(
            directory = %self.layout.root().display(),
            exported_projects = known.len(),
            "Starting export"
        );

        let engine = WriterEngine::tracking(
            self.layout.clone(),
            ledger,
            self.config.rotate_threshold(),
        )?;
        let writer = engine.spawn();

        let mut progress = if self.show_progress {
            ExportProgress::new()
        } else {
            ExportProgress::hidden()
        };

        let produced = match self
            .produce(source, &writer, &mut known, &mut progress)
            .await
        {
            Ok(summary) => close_writer(&writer).await.map(|()| summary),
            Err(e) => Err(e),
        };
        progress.finish();

        // Dropping the queue lets an interrupted writer close its file
        let joined = writer.join().await;
        match (produced, joined) {
            (_, Err(writer_error)) => Err(writer_error),
            (Err(e), Ok(_)) => {
                warn!(error = %e, "Export interrupted; run clean before exporting again");
                Err(e)
            },
            (Ok(summary), Ok(ledger)) => {
                info!(
                    projects = summary.projects,
                    samples = summary.samples,
                    records = summary.records,
                    skipped = summary.skipped,
                    index_entries = ledger.map_or(0, |l| l.len()),
                    duration_secs = started.elapsed().as_secs_f64(),
                    "Export complete"
                );
                Ok(summary)
            },
        }
    }

    /// Walk the listing and feed tagged records to the writer
    async fn produce<S>(
        &self,
        source: &mut S,
        writer: &WriterHandle,
        known: &mut HashSet<String>,
        progress: &mut ExportProgress,
    ) -> Result<ExportSummary>
    where
        S: NodeSource + ?Sized,
    {
        let mut summary = ExportSummary::default();
        let mut current: Option<String> = None;

        while let Some(item) = source.next_item().await? {
            if item.project_id.is_empty() || item.sample_id.is_empty() {
                debug!(node = %item.node_id, "Skipping node without project or sample");
                summary.skipped += 1;
                continue;
            }

            if current.as_deref() != Some(item.project_id.as_str()) {
                if known.contains(&item.project_id) {
                    info!(
                        project = %item.project_id,
                        sample = %item.sample_id,
                        node = %item.node_id,
                        "Skipping exported project"
                    );
                    summary.skipped += 1;
                    continue;
                }

                if current.is_some() {
                    writer.boundary().await?;
                }
                known.insert(item.project_id.clone());
                current = Some(item.project_id.clone());
                summary.projects += 1;
                progress.set_project(&item.project_id);
            }

            summary.records += self.export_item(source, &item, writer, progress).await?;
            summary.samples += 1;
        }

        Ok(summary)
    }

    async fn export_item<S>(
        &self,
        source: &S,
        item: &SourceItem,
        writer: &WriterHandle,
        progress: &mut ExportProgress,
    ) -> Result<u64>
    where
        S: NodeSource + ?Sized,
    {
        info!(
            project = %item.project_id,
            sample = %item.sample_id,
            node = %item.node_id,
            "Exporting"
        );

        let stream = source.fetch(&item.node_id).await?;
        let mut records = FramedRead::new(StreamReader::new(stream), FastaCodec::new());

        let mut count = 0;
        while let Some(record) = records.next().await {
            let record = record.map_err(|e| match e {
                MgxError::Io(e) => ExportError::Io(e),
                e => ExportError::Decode(e),
            })?;
            let tagged = TaggedRecord::tag(&item.project_id, &item.sample_id, record);
            progress.record(tagged.bytes.len());
            writer.send(tagged).await?;
            count += 1;
        }

        debug!(sample = %item.sample_id, records = count, "Sample exported");
        Ok(count)
    }

    /// Rebuild `export.index` by re-reading every output file
    ///
    /// Refuses to replace an existing index unless `force` is set. A forced
    /// rebuild keeps the old index until the new one is saved over it.
    pub fn rebuild_index(&self, force: bool) -> Result<Ledger> {
        let index_path = self.layout.index_path();
        if index_path.exists() && !force {
            return Err(ExportError::config(format!(
                "index file {} already exists, use --force to overwrite",
                index_path.display()
            )));
        }

        let mut ledger = Ledger::new();
        let mut cursor = LedgerCursor::new();

        for ordinal in self.layout.export_files()? {
            let path = self.layout.file_path(ordinal);
            info!(file = %path.display(), "Indexing export file");

            let reader = FastaReader::new(BufReader::new(File::open(&path)?), Compression::Gzip);
            for (record, number) in reader.zip(1u64..) {
                let record = record?;
                let header = RecordHeader::parse(&record.id)?;

                if ledger
                    .open_project()
                    .is_some_and(|open| open != header.project)
                {
                    cursor.finalize(&mut ledger);
                }
                cursor
                    .observe(&mut ledger, &header.project, &header.sample, ordinal, number)
                    .map_err(|v| ExportError::validation(v.to_string()))?;
            }
        }
        cursor.finalize(&mut ledger);

        ledger.save(&index_path)?;
        info!(entries = ledger.len(), "Index rebuilt");
        Ok(ledger)
    }

    /// Remove unindexed files and truncate the last file to the index
    pub fn clean(&self) -> Result<()> {
        let ledger = self.load_ledger()?;

        for ordinal in ledger.unindexed(&self.layout.export_files()?) {
            info!(
                file = %self.layout.file_path(ordinal).display(),
                "Removing non-indexed file"
            );
            self.layout.remove_file(ordinal)?;
        }

        let Some(last) = ledger.last() else {
            info!("Index is empty, nothing to truncate");
            return Ok(());
        };
        if !last.completed || last.end_file == 0 || last.end_record == 0 {
            return Err(ExportError::validation(format!(
                "last index (project {}) is incomplete",
                last.project
            )));
        }

        self.truncate(last.end_file, last.end_record)
    }

    /// Drop the last `count` index entries and the records they cover
    pub fn remove(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(ExportError::config("count must be at least 1"));
        }

        let mut ledger = self.load_ledger()?;
        if ledger.is_empty() {
            info!("Index is empty, nothing to remove");
            return Ok(());
        }

        if ledger.len() <= count {
            info!(entries = ledger.len(), "Removing all indexes and export files");
            for ordinal in ledger.file_numbers(0) {
                self.layout.remove_file(ordinal)?;
            }
            match std::fs::remove_file(self.layout.index_path()) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {},
            }
            return Ok(());
        }

        info!(count, "Removing last indexes and their files");
        let new_last_pos = ledger.len() - count - 1;
        let new_last = ledger.entries()[new_last_pos].clone();
        if !new_last.completed || new_last.end_file == 0 || new_last.end_record == 0 {
            return Err(ExportError::validation(format!(
                "new last index (position={}, project={}) is incomplete",
                new_last_pos + 1,
                new_last.project
            )));
        }

        for ordinal in ledger.file_numbers(new_last_pos + 1) {
            if ordinal != new_last.end_file {
                self.layout.remove_file(ordinal)?;
            }
        }

        ledger.remove_last(count);
        ledger.save(self.layout.index_path())?;

        self.truncate(new_last.end_file, new_last.end_record)
    }

    /// Cut output file `file` back to its first `records` records
    ///
    /// The file is moved aside to `<n>.fasta.gz.temp` and the kept records are
    /// replayed into a fresh file. A temp copy left by an interrupted run is
    /// reused as the source.
    pub fn truncate(&self, file: u32, records: u64) -> Result<()> {
        let target = self.layout.file_path(file);
        let temp = self.layout.temp_path(file);

        if temp.exists() {
            warn!(file = %temp.display(), "Resuming interrupted truncation");
            self.layout.remove_file(file)?;
        } else {
            std::fs::rename(&target, &temp)?;
        }
        info!(file = %target.display(), records, "Truncating export file");

        let mut engine = WriterEngine::replay(self.layout.clone(), file);
        let mut reader = FastaReader::new(BufReader::new(File::open(&temp)?), Compression::Gzip);

        for number in 1..=records {
            let record = match reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Err(ExportError::validation(format!(
                        "file {} reached end of file before last record read: {} of {} records",
                        target.display(),
                        number,
                        records
                    )))
                },
                Err(MgxError::Io(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(ExportError::validation(format!(
                        "file {} has an invalid record: {} of {} records ({})",
                        target.display(),
                        number,
                        records,
                        e
                    )))
                },
            };
            engine.write(TaggedRecord::replay(&record))?;
        }

        let (message, _ack) = WriterMessage::terminate();
        engine.handle(message)?;

        if engine.written() != records {
            return Err(ExportError::Io(std::io::Error::other(format!(
                "only {} of {} records rewritten to {}",
                engine.written(),
                records,
                target.display()
            ))));
        }

        drop(reader);
        std::fs::remove_file(&temp)?;
        Ok(())
    }
}

/// Finalize the last project, then stop the writer
async fn close_writer(writer: &WriterHandle) -> Result<()> {
    writer.boundary().await?;
    writer.terminate().await
}
