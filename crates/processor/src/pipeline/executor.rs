//! Dispatch of bus messages to partition workers

use super::builder::MetricPipeline;
use super::worker::WorkerInput;
use crate::error::Result;
use crate::kafka::SourceMessage;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct WorkerHandle {
    tx: mpsc::Sender<WorkerInput>,
    task: JoinHandle<()>,
}

/// Runs one pipeline: decodes incoming messages and hands them to the
/// worker of their partition, spawning workers on first sight.
///
/// Join-topic messages go to the worker with the same partition number, so
/// the two topics must be co-partitioned on the join key.
pub struct PipelineExecutor {
    pipeline: Arc<MetricPipeline>,
    workers: HashMap<i32, WorkerHandle>,
}

impl PipelineExecutor {
    pub fn new(pipeline: Arc<MetricPipeline>) -> Self {
        Self {
            pipeline,
            workers: HashMap::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<MetricPipeline> {
        &self.pipeline
    }

    /// Partitions seen so far
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Decode and dispatch one message
    pub async fn dispatch(&mut self, message: SourceMessage) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let name = pipeline.name();
        let record = match message.decode_record() {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    pipeline = %name,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "dropping undecodable message"
                );
                pipeline.metrics().record_decode_failure(name);
                return Ok(());
            }
        };

        let input = if message.topic == pipeline.definition().source_topic {
            WorkerInput::Primary(record)
        } else if pipeline.is_join_topic(&message.topic) {
            WorkerInput::Secondary(record)
        } else {
            debug!(pipeline = %name, topic = %message.topic, "message from unexpected topic ignored");
            return Ok(());
        };

        let worker = self.worker(message.partition)?;
        if worker.tx.send(input).await.is_err() {
            warn!(pipeline = %name, partition = message.partition, "partition worker is gone");
        }
        Ok(())
    }

    fn worker(&mut self, partition: i32) -> Result<&mut WorkerHandle> {
        match self.workers.entry(partition) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let worker = self.pipeline.worker(partition)?;
                let (tx, rx) = mpsc::channel(self.pipeline.worker_capacity());
                let task = tokio::spawn(worker.run(rx));
                debug!(pipeline = %self.pipeline.name(), partition, "partition worker spawned");
                Ok(entry.insert(WorkerHandle { tx, task }))
            }
        }
    }

    /// Dispatch until the source channel closes or `shutdown` fires, then
    /// let every worker flush its open windows.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SourceMessage>, shutdown: CancellationToken) -> Result<()> {
        info!(pipeline = %self.pipeline.name(), topics = ?self.pipeline.topics(), "pipeline started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => self.dispatch(message).await?,
                    None => break,
                },
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Close every worker channel, wait for the final flushes, then let the
    /// notification sinks deliver what they still hold
    pub async fn shutdown(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for (partition, WorkerHandle { tx, task }) in workers {
            drop(tx);
            if let Err(e) = task.await {
                warn!(pipeline = %self.pipeline.name(), partition, error = %e, "partition worker ended abnormally");
            }
        }
        self.pipeline.router().close().await;
        info!(pipeline = %self.pipeline.name(), "pipeline stopped");
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("pipeline", &self.pipeline.name())
            .field("workers", &self.workers.len())
            .finish()
    }
}
