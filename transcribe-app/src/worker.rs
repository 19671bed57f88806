//! # Transcription Worker
//!
//! A dedicated thread that runs the (CPU-bound, synchronous) pipeline for
//! the web server. Jobs arrive over a crossbeam channel and each one is
//! answered on its own oneshot channel, so async handlers never block.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use transcribe_core::render::RasterRenderer;
use transcribe_core::{transcribe, TranscribeRequest, TranscriptionConfig, TranscriptionReport};

/// One queued transcription and where to send its result.
struct Job {
    request: TranscribeRequest,
    reply: oneshot::Sender<Result<TranscriptionReport>>,
}

/// Worker thread management structure.
///
/// Dropping the worker signals shutdown and waits for the thread; a job in
/// progress is allowed to finish.
pub struct TranscriptionWorker {
    job_tx: Sender<Job>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TranscriptionWorker {
    /// Spawns the worker thread.
    pub fn start(
        config: TranscriptionConfig,
        renderer: Option<Box<dyn RasterRenderer>>,
    ) -> Result<Self> {
        config.validate().context("invalid transcription config")?;
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let thread_handle = thread::Builder::new()
            .name("transcribe-worker".to_string())
            .spawn(move || run(job_rx, shutdown_rx, config, renderer))
            .context("failed to spawn transcription worker")?;

        Ok(Self {
            job_tx,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Queues a request; the receiver resolves when the pipeline finishes.
    pub fn submit(
        &self,
        request: TranscribeRequest,
    ) -> Result<oneshot::Receiver<Result<TranscriptionReport>>> {
        let (reply, rx) = oneshot::channel();
        self.job_tx
            .send(Job { request, reply })
            .map_err(|_| anyhow!("transcription worker has stopped"))?;
        Ok(rx)
    }
}

impl Drop for TranscriptionWorker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("[WORKER] Thread panicked during shutdown");
            }
        }
    }
}

fn run(
    job_rx: Receiver<Job>,
    shutdown_rx: Receiver<()>,
    config: TranscriptionConfig,
    renderer: Option<Box<dyn RasterRenderer>>,
) {
    info!("[WORKER] Transcription worker started");
    loop {
        crossbeam_channel::select! {
            recv(job_rx) -> msg => match msg {
                Ok(Job { request, reply }) => {
                    debug!("[WORKER] Transcribing {}", request.audio_path.display());
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        transcribe(&request, &config, renderer.as_deref())
                    }));
                    let result = match result {
                        Ok(outcome) => outcome.map_err(anyhow::Error::from),
                        Err(_) => Err(anyhow!("transcription panicked")),
                    };
                    // The handler may have gone away (client disconnected)
                    if reply.send(result).is_err() {
                        debug!("[WORKER] Result receiver dropped");
                    }
                }
                Err(_) => {
                    debug!("[WORKER] Job channel closed");
                    break;
                }
            },
            recv(shutdown_rx) -> _ => {
                debug!("[WORKER] Received shutdown signal");
                break;
            },
        }
    }
    info!("[WORKER] Transcription worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_job_is_reported() {
        let worker = TranscriptionWorker::start(TranscriptionConfig::default(), None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let request = TranscribeRequest::in_dir(dir.path().join("missing.wav"), dir.path(), false);

        let result = worker.submit(request).unwrap().await.unwrap();
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<transcribe_core::Error>(),
            Some(transcribe_core::Error::Io(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected_at_start() {
        let mut config = TranscriptionConfig::default();
        config.score.divisions = 5;
        assert!(TranscriptionWorker::start(config, None).is_err());
    }
}
