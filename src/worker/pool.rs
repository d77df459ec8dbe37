//! Fixed-size pool of workflow runners fed by a bounded queue.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::error::WorkerError;
use crate::pipeline::{EmailProcessor, InboundEmail, ProcessedEmail};

struct Job {
    email: InboundEmail,
    reply: oneshot::Sender<ProcessedEmail>,
}

/// Handle to a submitted email. Resolves once its run has been recorded.
pub struct JobHandle {
    email_id: String,
    rx: oneshot::Receiver<ProcessedEmail>,
}

impl JobHandle {
    pub fn email_id(&self) -> &str {
        &self.email_id
    }

    pub async fn wait(self) -> Result<ProcessedEmail, WorkerError> {
        self.rx.await.map_err(|_| WorkerError::Dropped {
            email_id: self.email_id,
        })
    }
}

/// Runs emails concurrently, one workflow run per worker at a time.
///
/// Each run owns its state; workers share only the processor.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(config: WorkerPoolConfig, processor: Arc<EmailProcessor>) -> Self {
        let worker_count = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let processor = Arc::clone(&processor);
                tokio::spawn(async move {
                    debug!(worker_id, "Worker started");
                    loop {
                        // Hold the lock only while waiting for the next job.
                        let job = rx.lock().await.recv().await;
                        let Some(Job { email, reply }) = job else {
                            break;
                        };
                        let processed = processor.process(&email).await;
                        if reply.send(processed).is_err() {
                            debug!(worker_id, email_id = %email.id, "Job handle dropped before completion");
                        }
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );
        Self { tx, workers }
    }

    /// Queue an email. Waits while the queue is full.
    pub async fn submit(&self, email: InboundEmail) -> Result<JobHandle, WorkerError> {
        let email_id = email.id.clone();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { email, reply })
            .await
            .map_err(|_| WorkerError::Closed)?;
        Ok(JobHandle { email_id, rx })
    }

    /// Stop accepting work, drain the queue and wait for every worker.
    pub async fn shutdown(self) {
        drop(self.tx);
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                warn!("Worker task ended abnormally: {e}");
            }
        }
        info!("Worker pool stopped");
    }
}
