// THEORY:
// Export requests are fire-and-forget from the caller's point of view: it
// submits a request and gets a `JobHandle` back immediately. The actual writing
// happens on a small worker pool.
//
// Key architectural principles:
// 1.  **Single Dispatcher**: One task owns the submission channel and hands jobs
//     to the workers round-robin, each worker having its own channel. Workers
//     never share a queue and never share mutable state.
// 2.  **Blocking I/O off the Runtime**: Sinks do synchronous file I/O and
//     encoding, so every job body runs on the blocking thread pool.
// 3.  **One Result per Handle**: Each job reports through its own oneshot
//     channel. A handle whose worker vanished resolves to `JobQueueClosed`
//     instead of hanging.

use crate::core_modules::export::{ExportReceipt, ExportSink, ImageExportRequest, TableExportRequest};
use crate::error::{Result, ToolkitError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum ExportJob {
    Image(ImageExportRequest),
    Table(TableExportRequest),
}

impl ExportJob {
    pub fn name(&self) -> &str {
        match self {
            ExportJob::Image(request) => &request.name,
            ExportJob::Table(request) => &request.name,
        }
    }

    fn run(&self, sink: &dyn ExportSink) -> Result<ExportReceipt> {
        match self {
            ExportJob::Image(request) => sink.write_image(request),
            ExportJob::Table(request) => sink.write_table(request),
        }
    }
}

struct JobTask {
    id: JobId,
    job: ExportJob,
    result_sender: oneshot::Sender<Result<ExportReceipt>>,
}

/// Receipt of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    name: String,
    result_receiver: oneshot::Receiver<Result<ExportReceipt>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the job to finish.
    pub async fn wait(self) -> Result<ExportReceipt> {
        self.result_receiver
            .await
            .map_err(|_| ToolkitError::JobQueueClosed)?
    }
}

pub struct ExportQueue {
    task_sender: mpsc::UnboundedSender<JobTask>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl ExportQueue {
    /// Starts the dispatcher and `worker_count` workers on the current runtime.
    pub fn new(sink: Arc<dyn ExportSink>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<JobTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<JobTask>())
            .unzip();

        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if worker_senders[worker_idx].send(task).is_err() {
                    warn!(worker = worker_idx, "export worker is gone, job dropped");
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker, mut worker_receiver)| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let outcome = Self::run_job(worker, task.id, task.job, Arc::clone(&sink)).await;
                        let _ = task.result_sender.send(outcome);
                    }
                })
            })
            .collect();

        info!(workers = worker_count, "export queue started");
        Self {
            task_sender,
            dispatcher,
            workers,
            next_id: AtomicU64::new(1),
        }
    }

    /// One worker per logical CPU.
    pub fn with_default_workers(sink: Arc<dyn ExportSink>) -> Self {
        Self::new(sink, num_cpus::get())
    }

    async fn run_job(worker: usize, id: JobId, job: ExportJob, sink: Arc<dyn ExportSink>) -> Result<ExportReceipt> {
        let name = job.name().to_string();
        debug!(worker, id, name = %name, "export job started");
        let outcome = tokio::task::spawn_blocking(move || job.run(sink.as_ref()))
            .await
            .map_err(|e| ToolkitError::JobFailed {
                id,
                reason: e.to_string(),
            })?;
        match &outcome {
            Ok(receipt) => info!(id, name = %name, files = receipt.paths.len(), "export job done"),
            Err(error) => warn!(id, name = %name, %error, "export job failed"),
        }
        outcome
    }

    pub fn submit(&self, job: ExportJob) -> Result<JobHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = job.name().to_string();
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(JobTask {
                id,
                job,
                result_sender,
            })
            .map_err(|_| ToolkitError::JobQueueClosed)?;
        Ok(JobHandle {
            id,
            name,
            result_receiver,
        })
    }

    pub fn submit_image(&self, request: ImageExportRequest) -> Result<JobHandle> {
        self.submit(ExportJob::Image(request))
    }

    pub fn submit_table(&self, request: TableExportRequest) -> Result<JobHandle> {
        self.submit(ExportJob::Table(request))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        for worker in self.workers {
            let _ = worker.await;
        }
        debug!("export queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::export::ExportFormat;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<String>>,
    }

    impl ExportSink for RecordingSink {
        fn write_image(&self, request: &ImageExportRequest) -> Result<ExportReceipt> {
            Err(ToolkitError::InvalidParameter(format!("no images here: {}", request.name)))
        }

        fn write_table(&self, request: &TableExportRequest) -> Result<ExportReceipt> {
            self.written
                .lock()
                .expect("lock")
                .push(request.name.clone());
            Ok(ExportReceipt {
                name: request.name.clone(),
                paths: vec![PathBuf::from(format!("{}.csv", request.name))],
            })
        }
    }

    fn table(name: &str) -> TableExportRequest {
        TableExportRequest {
            name: name.to_string(),
            folder: "out".to_string(),
            rows: Vec::new(),
            format: ExportFormat::Csv,
        }
    }

    #[tokio::test]
    async fn every_job_completes_through_its_handle() {
        let sink = Arc::new(RecordingSink::default());
        let queue = ExportQueue::new(sink.clone(), 3);
        assert_eq!(queue.worker_count(), 3);

        let handles: Vec<JobHandle> = (0..10)
            .map(|i| queue.submit_table(table(&format!("t{i}"))).expect("submit"))
            .collect();
        let ids: Vec<JobId> = handles.iter().map(JobHandle::id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());

        let receipts = futures::future::join_all(handles.into_iter().map(JobHandle::wait)).await;
        for (i, receipt) in receipts.into_iter().enumerate() {
            assert_eq!(receipt.expect("receipt").name, format!("t{i}"));
        }
        queue.shutdown().await;

        let mut written = sink.written.lock().expect("lock").clone();
        written.sort();
        assert_eq!(written.len(), 10);
    }

    #[tokio::test]
    async fn sink_errors_reach_the_handle() {
        let queue = ExportQueue::new(Arc::new(RecordingSink::default()), 1);
        let request = ImageExportRequest {
            name: "img".into(),
            folder: "out".into(),
            band: "classification_2019".into(),
            raster: crate::core_modules::raster::Raster::filled(
                crate::core_modules::raster::GridSpec::new(1, 1, 0.0, 30.0, 30.0),
                1,
            ),
            file_dimensions: 256,
            format: ExportFormat::GeoTiff,
        };
        let handle = queue.submit_image(request).expect("submit");
        assert_eq!(handle.name(), "img");
        assert!(matches!(handle.wait().await, Err(ToolkitError::InvalidParameter(_))));
        queue.shutdown().await;
    }
}
