//! Single-owner queue in front of a [`ClassifierModel`].
//!
//! The model is built and used on one dedicated thread, so runtimes whose
//! sessions are not reentrant never see concurrent `predict` calls.

use crate::common::{DetectorError, Result};
use crate::core::model::ClassifierModel;
use crate::core::pipeline::{ClassificationResult, InferencePipeline};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

struct Job {
    image_path: PathBuf,
    reply: mpsc::Sender<Result<ClassificationResult>>,
}

pub struct ClassifierWorker {
    tx: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl ClassifierWorker {
    /// Starts the worker thread and builds the model on it with `factory`.
    /// Returns the factory's error if the model cannot be loaded.
    pub fn spawn<M, F>(factory: F, pipeline: InferencePipeline) -> Result<Self>
    where
        M: ClassifierModel + 'static,
        F: FnOnce() -> Result<M> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("classifier".into())
            .spawn(move || {
                let model = match factory() {
                    Ok(model) => {
                        let _ = ready_tx.send(Ok(()));
                        model
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Ok(job) = rx.recv() {
                    let result = pipeline.classify(&job.image_path, &model);
                    if job.reply.send(result).is_err() {
                        tracing::debug!("Caller dropped before result for {:?}", job.image_path);
                    }
                }
                tracing::debug!("Classifier worker shutting down");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { tx: Some(tx), handle: Some(handle) }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DetectorError::Model("Classifier worker exited during model load".into()))
            }
        }
    }

    /// Queues one image and blocks until its result is ready.
    pub fn classify(&self, image_path: impl Into<PathBuf>) -> Result<ClassificationResult> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job = Job { image_path: image_path.into(), reply: reply_tx };

        self.tx
            .as_ref()
            .ok_or_else(|| DetectorError::Inference("Classifier worker is stopped".into()))?
            .send(job)
            .map_err(|_| DetectorError::Inference("Classifier worker is stopped".into()))?;

        reply_rx
            .recv()
            .map_err(|_| DetectorError::Inference("Classifier worker stopped before replying".into()))?
    }
}

impl Drop for ClassifierWorker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
