//! Bounded, thread-based batch runtime.
//!
//! Read-only work (canonicalization and cross-referencing) runs on a pool of
//! reader workers. Every mutation of the index or graph goes through one
//! dedicated writer thread, which applies jobs strictly in submission order.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::{GraphConfig, RuntimeConfig};
use crate::crossref::{Candidate, CrossReferenceResult};
use crate::entity::Mention;
use crate::error::{EntigraphError, EntigraphResult, RuntimeError};
use crate::graph::{CoOccurrence, GraphBatchReport, GraphBuilder, GraphSnapshot};
use crate::pipeline::{IngestPipeline, IngestSummary, PreparedBatch};
use crate::storage::StorageError;

const READER_POOL: &str = "reader";
const WRITER_POOL: &str = "writer";

enum ReadJob {
    Prepare {
        mentions: Vec<Mention>,
        reply: Sender<EntigraphResult<PreparedBatch>>,
    },
    CrossReference {
        candidates: Vec<Candidate>,
        reply: Sender<EntigraphResult<CrossReferenceResult>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<EntigraphResult<()>>,
    },
}

enum WriteJob {
    Commit {
        batch: PreparedBatch,
        reply: Sender<EntigraphResult<IngestSummary>>,
    },
    ApplyCoOccurrences {
        records: Vec<CoOccurrence>,
        reply: Sender<EntigraphResult<GraphBatchReport>>,
    },
    Snapshot {
        config: GraphConfig,
        reply: Sender<EntigraphResult<GraphSnapshot>>,
    },
}

struct WorkerPool<J> {
    name: &'static str,
    tx: Sender<J>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    fn start<F>(
        name: &'static str,
        workers: usize,
        queue_capacity: usize,
        handler: F,
    ) -> EntigraphResult<Self>
    where
        F: Fn(J) + Clone + Send + 'static,
    {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<J>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<J> = rx.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("entigraph-{name}-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        handler(job);
                    }
                })
                .map_err(|e| StorageError::io(format!("spawning {name} worker"), e))?;
            handles.push(handle);
        }

        Ok(Self {
            name,
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: J) -> EntigraphResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RuntimeError::QueueFull {
                pool: self.name.to_string(),
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::Disconnected {
                pool: self.name.to_string(),
            }
            .into()),
        }
    }

    fn shutdown(self) {
        // Closing the channel lets workers drain queued jobs, then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Pending result of a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    pool: &'static str,
    rx: Receiver<EntigraphResult<T>>,
}

impl<T> JobHandle<T> {
    /// Pool the job was queued on.
    #[must_use]
    pub const fn pool(&self) -> &'static str {
        self.pool
    }

    /// Waits for the job to complete.
    pub fn join(self) -> EntigraphResult<T> {
        self.rx.recv().map_err(|_| {
            EntigraphError::from(RuntimeError::Disconnected {
                pool: self.pool.to_string(),
            })
        })?
    }

    /// Waits for the job to complete with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> EntigraphResult<T> {
        self.rx.recv_timeout(timeout).map_err(|err| {
            EntigraphError::from(match err {
                RecvTimeoutError::Timeout => RuntimeError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => RuntimeError::Disconnected {
                    pool: self.pool.to_string(),
                },
            })
        })?
    }
}

/// Reader pool plus single writer thread around one pipeline and graph.
///
/// # Examples
///
/// ```
/// use entigraph::config::{EntigraphConfig, GraphConfig, RuntimeConfig};
/// use entigraph::graph::{CoOccurrence, GraphBuilder, SourceKind};
/// use entigraph::pipeline::{IngestPipeline, ResolutionRuntime};
/// use entigraph::{EntityIndex, EntityType, Mention};
/// use std::sync::Arc;
///
/// let index = Arc::new(EntityIndex::new());
/// let pipeline = IngestPipeline::new(Arc::clone(&index), &EntigraphConfig::default())?;
/// let runtime = ResolutionRuntime::start(pipeline, GraphBuilder::new(index), &RuntimeConfig::default())?;
///
/// runtime.ingest(vec![
///     Mention::new("Jeffrey Epstein", EntityType::Person, "log-1", 0.9)?,
///     Mention::new("Ghislaine Maxwell", EntityType::Person, "log-1", 0.9)?,
/// ])?;
/// runtime
///     .apply_cooccurrences_async(vec![CoOccurrence::new(
///         "Jeffrey Epstein",
///         "Ghislaine Maxwell",
///         SourceKind::FlightLog,
///         2,
///     )?])?
///     .join()?;
/// let snapshot = runtime.snapshot_async(GraphConfig::default())?.join()?;
/// assert_eq!(snapshot.edges[0].weight, 2);
/// # Ok::<(), entigraph::EntigraphError>(())
/// ```
pub struct ResolutionRuntime {
    pipeline: Arc<IngestPipeline>,
    readers: WorkerPool<ReadJob>,
    writer: WorkerPool<WriteJob>,
}

impl ResolutionRuntime {
    /// Spawns the reader pool and the writer thread.
    pub fn start(
        pipeline: IngestPipeline,
        graph: GraphBuilder,
        config: &RuntimeConfig,
    ) -> EntigraphResult<Self> {
        let pipeline = Arc::new(pipeline);
        let graph = Arc::new(Mutex::new(graph));

        let reader_pipeline = Arc::clone(&pipeline);
        let readers = WorkerPool::start(
            READER_POOL,
            config.workers,
            config.queue_capacity,
            move |job: ReadJob| run_read_job(&reader_pipeline, job),
        )?;

        let writer_pipeline = Arc::clone(&pipeline);
        let writer = WorkerPool::start(WRITER_POOL, 1, config.queue_capacity, move |job: WriteJob| {
            run_write_job(&writer_pipeline, &graph, job);
        })?;

        tracing::debug!(
            readers = config.workers,
            queue_capacity = config.queue_capacity,
            "started resolution runtime"
        );
        Ok(Self {
            pipeline,
            readers,
            writer,
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    /// Queues canonicalization and cross-referencing of a batch.
    pub fn prepare_async(&self, mentions: Vec<Mention>) -> EntigraphResult<JobHandle<PreparedBatch>> {
        let (reply, rx) = bounded(1);
        self.readers.try_submit(ReadJob::Prepare { mentions, reply })?;
        Ok(JobHandle { pool: READER_POOL, rx })
    }

    /// Queues a read-only cross-reference.
    pub fn cross_reference_async(
        &self,
        candidates: Vec<Candidate>,
    ) -> EntigraphResult<JobHandle<CrossReferenceResult>> {
        let (reply, rx) = bounded(1);
        self.readers
            .try_submit(ReadJob::CrossReference { candidates, reply })?;
        Ok(JobHandle { pool: READER_POOL, rx })
    }

    /// Queues the commit of a prepared batch on the writer.
    pub fn commit_async(&self, batch: PreparedBatch) -> EntigraphResult<JobHandle<IngestSummary>> {
        let (reply, rx) = bounded(1);
        self.writer.try_submit(WriteJob::Commit { batch, reply })?;
        Ok(JobHandle { pool: WRITER_POOL, rx })
    }

    /// Queues a co-occurrence batch on the writer.
    pub fn apply_cooccurrences_async(
        &self,
        records: Vec<CoOccurrence>,
    ) -> EntigraphResult<JobHandle<GraphBatchReport>> {
        let (reply, rx) = bounded(1);
        self.writer
            .try_submit(WriteJob::ApplyCoOccurrences { records, reply })?;
        Ok(JobHandle { pool: WRITER_POOL, rx })
    }

    /// Queues a snapshot behind every write submitted so far.
    pub fn snapshot_async(&self, config: GraphConfig) -> EntigraphResult<JobHandle<GraphSnapshot>> {
        let (reply, rx) = bounded(1);
        self.writer.try_submit(WriteJob::Snapshot { config, reply })?;
        Ok(JobHandle { pool: WRITER_POOL, rx })
    }

    /// Prepares on a reader, then commits on the writer.
    pub fn ingest(&self, mentions: Vec<Mention>) -> EntigraphResult<IngestSummary> {
        let prepared = self.prepare_async(mentions)?.join()?;
        self.commit_async(prepared)?.join()
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> EntigraphResult<JobHandle<()>> {
        let (reply, rx) = bounded(1);
        self.readers.try_submit(ReadJob::Sleep { duration, reply })?;
        Ok(JobHandle { pool: READER_POOL, rx })
    }
}

fn run_read_job(pipeline: &IngestPipeline, job: ReadJob) {
    match job {
        ReadJob::Prepare { mentions, reply } => {
            let _ = reply.send(pipeline.prepare(&mentions));
        }
        ReadJob::CrossReference { candidates, reply } => {
            let result = pipeline
                .cross_referencer()
                .cross_reference(pipeline.index(), &candidates);
            let _ = reply.send(result);
        }

        #[cfg(test)]
        ReadJob::Sleep { duration, reply } => {
            thread::sleep(duration);
            let _ = reply.send(Ok(()));
        }
    }
}

fn run_write_job(pipeline: &IngestPipeline, graph: &Mutex<GraphBuilder>, job: WriteJob) {
    let poisoned = || {
        EntigraphError::Storage(StorageError::Poisoned {
            context: "runtime.graph".to_string(),
        })
    };
    match job {
        WriteJob::Commit { batch, reply } => {
            let _ = reply.send(pipeline.commit(batch));
        }
        WriteJob::ApplyCoOccurrences { records, reply } => {
            let result = graph
                .lock()
                .map_err(|_| poisoned())
                .and_then(|mut builder| builder.apply_batch(&records));
            let _ = reply.send(result);
        }
        WriteJob::Snapshot { config, reply } => {
            let result = graph
                .lock()
                .map_err(|_| poisoned())
                .and_then(|builder| builder.snapshot(&config));
            let _ = reply.send(result);
        }
    }
}

impl Drop for ResolutionRuntime {
    fn drop(&mut self) {
        let readers = std::mem::replace(
            &mut self.readers,
            WorkerPool {
                name: READER_POOL,
                tx: bounded::<ReadJob>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        let writer = std::mem::replace(
            &mut self.writer,
            WorkerPool {
                name: WRITER_POOL,
                tx: bounded::<WriteJob>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        readers.shutdown();
        writer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntigraphConfig;
    use crate::entity::EntityType;
    use crate::graph::SourceKind;
    use crate::index::EntityIndex;

    fn runtime(workers: usize, queue_capacity: usize) -> ResolutionRuntime {
        let index = Arc::new(EntityIndex::new());
        let pipeline = IngestPipeline::new(Arc::clone(&index), &EntigraphConfig::default()).unwrap();
        ResolutionRuntime::start(
            pipeline,
            GraphBuilder::new(index),
            &RuntimeConfig {
                workers,
                queue_capacity,
            },
        )
        .unwrap()
    }

    fn mention(text: &str) -> Mention {
        Mention::new(text, EntityType::Person, "doc", 0.9).unwrap()
    }

    #[test]
    fn test_parallel_prepare_serial_commit() {
        let runtime = runtime(4, 16);
        let batches = [
            vec![mention("Jeffrey Epstein"), mention("J. Epstein")],
            vec![mention("Ghislaine Maxwell")],
            vec![mention("Epstein, Jeffrey"), mention("G. Maxwell")],
        ];
        let handles: Vec<_> = batches
            .iter()
            .map(|b| runtime.prepare_async(b.clone()).unwrap())
            .collect();
        for handle in handles {
            let prepared = handle.join_timeout(Duration::from_secs(5)).unwrap();
            runtime.commit_async(prepared).unwrap().join().unwrap();
        }
        assert_eq!(runtime.pipeline().index().len().unwrap(), 2);
        runtime.pipeline().index().check_invariants().unwrap();
    }

    #[test]
    fn test_writes_apply_in_order() {
        let runtime = runtime(2, 16);
        runtime
            .ingest(vec![mention("Jeffrey Epstein"), mention("Ghislaine Maxwell")])
            .unwrap();

        let co = CoOccurrence::new("Jeffrey Epstein", "Ghislaine Maxwell", SourceKind::Document, 3).unwrap();
        let first = runtime.apply_cooccurrences_async(vec![co.clone()]).unwrap();
        let second = runtime.apply_cooccurrences_async(vec![co]).unwrap();
        let snapshot = runtime.snapshot_async(GraphConfig::default()).unwrap();

        assert_eq!(first.pool(), "writer");
        first.join().unwrap();
        second.join().unwrap();
        assert_eq!(snapshot.join().unwrap().edges[0].weight, 6);
    }

    #[test]
    fn test_queue_full() {
        let runtime = runtime(1, 1);
        let busy = runtime.submit_sleep(Duration::from_millis(200)).unwrap();
        // wait until the single worker has taken the sleep job off the queue
        thread::sleep(Duration::from_millis(50));
        let queued = runtime.submit_sleep(Duration::from_millis(1)).unwrap();
        let err = runtime.submit_sleep(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, EntigraphError::Runtime(RuntimeError::QueueFull { .. })));
        assert!(err.is_batch_fatal());
        busy.join().unwrap();
        queued.join().unwrap();
    }

    #[test]
    fn test_join_reports_disconnected_when_reply_dropped() {
        let (tx, rx) = bounded::<EntigraphResult<()>>(1);
        drop(tx);
        let handle = JobHandle { pool: "reader", rx };
        let err = handle.join().unwrap_err();
        let EntigraphError::Runtime(RuntimeError::Disconnected { pool }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(pool, "reader");
    }

    #[test]
    fn test_join_timeout() {
        let (_tx, rx) = bounded::<EntigraphResult<()>>(1);
        let handle = JobHandle { pool: "writer", rx };
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            EntigraphError::Runtime(RuntimeError::Timeout { duration_ms: 10 })
        ));
    }
}
