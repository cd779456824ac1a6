//! File Processing
//!
//! Drives one file through ingestion and routing and folds the per-row
//! outcomes into a [`FileSummary`]. Several files are processed in parallel,
//! one Tokio task per file.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::{
    error::{PipelineError, PipelineResult},
    pipeline::{PriorityRouter, RowOutcome, StreamIngestor},
    types::Priority,
};

/// Per-file counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    /// Source name (path or caller-provided label)
    pub source: String,
    /// Data rows read
    pub rows: u64,
    /// Rows handed to a channel
    pub routed: u64,
    /// Rows sent to the high-priority channel
    pub high: u64,
    /// Rows sent to the low-priority channel
    pub low: u64,
    /// Rows dropped by validation or enrichment
    pub skipped: u64,
    /// Rows whose dispatch failed
    pub failed: u64,
}

impl FileSummary {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }
}

/// Ingests files and routes their records
#[derive(Debug, Clone)]
pub struct FileProcessor {
    ingestor: Arc<StreamIngestor>,
    router: Arc<PriorityRouter>,
    worker_threads: usize,
}

impl FileProcessor {
    /// Create a processor running up to `worker_threads` files at once
    #[must_use]
    pub fn new(
        ingestor: Arc<StreamIngestor>,
        router: Arc<PriorityRouter>,
        worker_threads: usize,
    ) -> Self {
        Self {
            ingestor,
            router,
            worker_threads: worker_threads.max(1),
        }
    }

    /// Process an already opened file
    ///
    /// Rows dispatched before a file fault stay dispatched.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::FileFault` if the file cannot be read to the end
    pub async fn process_reader<R>(&self, source: &str, reader: R) -> PipelineResult<FileSummary>
    where
        R: Read + Send,
    {
        let start = Instant::now();
        tracing::info!(source, "Processing file");

        let mut summary = FileSummary::new(source);
        let mut rows = self.ingestor.ingest(reader)?;

        while let Some(outcome) = rows.next().await {
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        source,
                        rows_read = summary.rows,
                        routed = summary.routed,
                        code = e.code().as_u16(),
                        "Error processing file: {e}"
                    );
                    return Err(e);
                }
            };

            summary.rows += 1;
            match outcome {
                RowOutcome::Enriched(record) => match self.router.route(record).await {
                    Ok(routed) => {
                        summary.routed += 1;
                        match routed.priority {
                            Priority::High => summary.high += 1,
                            Priority::Low => summary.low += 1,
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(source, code = e.code().as_u16(), "Error routing row: {e}");
                    }
                },
                RowOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }

        tracing::info!(
            source,
            rows = summary.rows,
            routed = summary.routed,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "File processed"
        );
        Ok(summary)
    }

    /// Open and process a file on disk
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::FileFault` if the file cannot be opened or read
    pub async fn process_path(&self, path: &Path) -> PipelineResult<FileSummary> {
        let source = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| {
            tracing::error!(source, "Cannot open file: {e}");
            PipelineError::file_fault(format!("{source}: {e}"))
        })?;

        self.process_reader(&source, std::io::BufReader::new(file))
            .await
    }

    /// Process several files concurrently
    ///
    /// Each file runs on its own Tokio task, at most `worker_threads` at a
    /// time. File reads are buffered synchronous reads on that task.
    /// Results are returned in input order. A fault in one file does not
    /// affect the others.
    pub async fn process_files(&self, paths: Vec<PathBuf>) -> Vec<PipelineResult<FileSummary>> {
        let mut results: Vec<(usize, PipelineResult<FileSummary>)> =
            stream::iter(paths.into_iter().enumerate())
                .map(|(index, path)| {
                    let processor = self.clone();
                    async move {
                        let source = path.display().to_string();
                        let worker =
                            tokio::spawn(async move { processor.process_path(&path).await });
                        let result = worker.await.unwrap_or_else(|e| {
                            tracing::error!(source = %source, "File worker stopped: {e}");
                            Err(PipelineError::internal(format!("{source}: worker failed: {e}")))
                        });
                        (index, result)
                    }
                })
                .buffer_unordered(self.worker_threads)
                .collect()
                .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Ingestor used for every file
    #[must_use]
    pub fn ingestor(&self) -> &Arc<StreamIngestor> {
        &self.ingestor
    }

    /// Router used for every file
    #[must_use]
    pub fn router(&self) -> &Arc<PriorityRouter> {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, MetadataCache};
    use crate::config::CacheConfig;
    use crate::pipeline::{Channel, MpscChannel};
    use async_trait::async_trait;
    use std::io;

    const HEADER: &str = "vehicle_id,timestamp,lat,lon,speed_kmh,engine_status,fuel_level\n";

    /// Accepts idle records only
    struct FlakyHighChannel;

    #[async_trait]
    impl Channel for FlakyHighChannel {
        fn name(&self) -> &str {
            "high"
        }

        async fn send(&self, _body: String) -> PipelineResult<String> {
            Err(PipelineError::dispatch("high", "throttled"))
        }
    }

    /// Reader that yields some bytes and then fails
    struct BrokenReader {
        data: io::Cursor<Vec<u8>>,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"));
            }
            Ok(n)
        }
    }

    fn ingestor() -> PipelineResult<Arc<StreamIngestor>> {
        let metadata = MetadataCache::new(
            Arc::new(MemoryCache::with_capacity(128)?),
            &CacheConfig::default(),
        );
        Ok(Arc::new(StreamIngestor::new(Arc::new(metadata))))
    }

    #[tokio::test]
    async fn test_summary_counts() -> PipelineResult<()> {
        let (high, mut high_rx) = MpscChannel::new("high", 16);
        let (low, mut low_rx) = MpscChannel::new("low", 16);
        let router = Arc::new(PriorityRouter::new(Arc::new(high), Arc::new(low)));
        let processor = FileProcessor::new(ingestor()?, router, 2);

        let csv = format!(
            "{HEADER}\
             VH_001,2024-03-01T10:15:00,12.97,77.59,40,moving,80\n\
             VH_002,2024-03-01T10:15:00,12.98,77.60,0,idle,30\n\
             VH_003,2024-03-01T10:15:00,12.97,77.59,150,moving,80\n\
             VH_004,2024-03-01T10:15:00,999,77.59,40,moving,80\n"
        );
        let summary = processor.process_reader("fleet.csv", csv.as_bytes()).await?;

        assert_eq!(
            summary,
            FileSummary {
                source: "fleet.csv".to_string(),
                rows: 4,
                routed: 2,
                high: 1,
                low: 1,
                skipped: 2,
                failed: 0,
            }
        );
        assert!(high_rx.try_recv().is_ok());
        assert!(low_rx.try_recv().is_ok());
        assert!(high_rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_failures_do_not_stop_the_file() -> PipelineResult<()> {
        let (low, _low_rx) = MpscChannel::new("low", 16);
        let router = Arc::new(PriorityRouter::new(Arc::new(FlakyHighChannel), Arc::new(low)));
        let processor = FileProcessor::new(ingestor()?, router, 1);

        let csv = format!(
            "{HEADER}\
             VH_001,2024-03-01T10:15:00,12.97,77.59,40,moving,80\n\
             VH_002,2024-03-01T10:15:00,12.98,77.60,0,idle,30\n"
        );
        let summary = processor.process_reader("mixed.csv", csv.as_bytes()).await?;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.low, 1);
        assert_eq!(summary.routed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_mid_file_io_error_is_a_fault() -> PipelineResult<()> {
        let (high, mut high_rx) = MpscChannel::new("high", 16);
        let (low, _low_rx) = MpscChannel::new("low", 16);
        let router = Arc::new(PriorityRouter::new(Arc::new(high), Arc::new(low)));
        let processor = FileProcessor::new(ingestor()?, router, 1);

        let reader = BrokenReader {
            data: io::Cursor::new(
                format!("{HEADER}VH_001,2024-03-01T10:15:00,12.97,77.59,40,moving,80\n")
                    .into_bytes(),
            ),
        };
        let result = processor.process_reader("broken.csv", reader).await;

        assert!(matches!(result, Err(PipelineError::FileFault { .. })));
        // Rows before the fault were already dispatched
        assert!(high_rx.try_recv().is_ok());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_files_run_on_separate_tasks() -> PipelineResult<()> {
        let dir = tempfile::TempDir::new()?;
        let mut paths = Vec::new();
        for (name, rows) in [("a.csv", 3), ("b.csv", 1), ("c.csv", 2)] {
            let mut csv = HEADER.to_string();
            for i in 0..rows {
                csv.push_str(&format!("VH_{i:03},2024-03-01T10:15:00,12.97,77.59,10,idle,50\n"));
            }
            let path = dir.path().join(name);
            std::fs::write(&path, csv)?;
            paths.push(path);
        }

        let (high, _high_rx) = MpscChannel::new("high", 16);
        let (low, mut low_rx) = MpscChannel::new("low", 16);
        let router = Arc::new(PriorityRouter::new(Arc::new(high), Arc::new(low)));
        let processor = FileProcessor::new(ingestor()?, router, 2);

        let results = processor.process_files(paths).await;
        let lows: Vec<u64> = results
            .iter()
            .map(|r| r.as_ref().map(|s| s.low).unwrap_or(0))
            .collect();
        assert_eq!(lows, vec![3, 1, 2]);

        let mut received = 0;
        while low_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_a_fault() -> PipelineResult<()> {
        let (high, _high_rx) = MpscChannel::new("high", 1);
        let (low, _low_rx) = MpscChannel::new("low", 1);
        let router = Arc::new(PriorityRouter::new(Arc::new(high), Arc::new(low)));
        let processor = FileProcessor::new(ingestor()?, router, 1);

        let results = processor
            .process_files(vec![PathBuf::from("/nonexistent/fleet_telemetry.csv")])
            .await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(PipelineError::FileFault { .. })));
        Ok(())
    }
}
