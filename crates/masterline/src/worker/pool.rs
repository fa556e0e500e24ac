use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::{
    BroadcastProgress, JobPhase, JobProgressEvent, NoopProgress, Pipeline, ProgressEvent,
    ProgressReporter,
};
use crate::worker::job::JobResult;

/// Outcome of one submitted audio file.
#[derive(Debug)]
pub struct JobReport {
    pub audio_file_id: String,
    pub outcome: Result<JobResult, String>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs pipeline attempts for submitted audio file ids on a fixed number of
/// tokio tasks. Each submission is one fresh attempt; retries are left to
/// whoever submits.
pub struct WorkerPool {
    job_sender: mpsc::Sender<String>,
    result_receiver: mpsc::UnboundedReceiver<JobReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Self {
        Self::with_progress_sender(pipeline, worker_count, None)
    }

    /// Creates a pool that publishes progress for every job. A
    /// `worker_count` of 0 is treated as 1.
    pub fn with_progress_sender(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = mpsc::channel::<String>(worker_count * 2);
        let (result_sender, result_receiver) = mpsc::unbounded_channel::<JobReport>();
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&job_receiver),
                    result_sender.clone(),
                    Arc::clone(&shutdown),
                    Arc::clone(&pipeline),
                    progress_sender.clone(),
                ))
            })
            .collect();

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    /// Queues an audio file. Waits while the queue is full.
    pub async fn submit(&self, audio_file_id: impl Into<String>) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(audio_file_id.into())
            .await
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&mut self) -> Option<JobReport> {
        self.result_receiver.try_recv().ok()
    }

    /// Next finished job. `None` once every worker has stopped and all
    /// reports were taken.
    pub async fn recv_result(&mut self) -> Option<JobReport> {
        self.result_receiver.recv().await
    }

    /// Workers stop after their current job. Queued ids are not run.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits for the workers to drain it. Returns any
    /// reports not yet received.
    pub async fn wait(self) -> Vec<JobReport> {
        let WorkerPool {
            job_sender,
            mut result_receiver,
            workers,
            ..
        } = self;
        drop(job_sender);

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");

        let mut remaining = Vec::new();
        while let Ok(report) = result_receiver.try_recv() {
            remaining.push(report);
        }
        remaining
    }
}

async fn run_worker(
    worker_id: usize,
    job_receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    result_sender: mpsc::UnboundedSender<JobReport>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let next = {
            let mut rx = job_receiver.lock().await;
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        };

        let audio_file_id = match next {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("Worker {} job channel closed", worker_id);
                break;
            }
            Err(_) => continue,
        };

        debug!("Worker {} processing audio file {}", worker_id, audio_file_id);

        let outcome = match progress_sender {
            Some(ref sender) => {
                let progress = BroadcastProgress::new(&audio_file_id, Arc::clone(sender));
                progress.report(ProgressEvent::Phase {
                    phase: JobPhase::Queued,
                    message: "Job picked up by worker".to_string(),
                });
                pipeline.process(&audio_file_id, &progress).await
            }
            None => pipeline.process(&audio_file_id, &NoopProgress).await,
        };

        let report = JobReport {
            audio_file_id,
            outcome: outcome.map_err(|e| e.to_string()),
        };
        if result_sender.send(report).is_err() {
            error!("Worker {} failed to send result", worker_id);
            break;
        }
    }

    debug!("Worker {} stopped", worker_id);
}
