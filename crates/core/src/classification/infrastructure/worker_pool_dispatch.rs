use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::classification::domain::classification::{
    ClassificationJob, ClassificationOutcome, ClassificationResponse,
};
use crate::classification::domain::classifier::{ClassificationDispatch, Classifier};

/// Fixed pool of threads that run classifier calls off the frame loop.
///
/// Jobs go through an unbounded channel so `submit` never blocks. Completed
/// responses are buffered until the loop polls them. Dropping the pool closes
/// the job channel; workers finish their current call and exit, and any
/// response they produce is discarded.
pub struct WorkerPoolDispatch {
    jobs: Option<Sender<ClassificationJob>>,
    completed: Receiver<ClassificationResponse>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPoolDispatch {
    pub fn new(classifier: Arc<dyn Classifier>, workers: usize) -> Result<Self, std::io::Error> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<ClassificationJob>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<ClassificationResponse>();

        let handles = (0..workers.max(1))
            .map(|i| {
                let classifier = Arc::clone(&classifier);
                let rx = job_rx.clone();
                let tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("classify-{i}"))
                    .spawn(move || {
                        for job in rx {
                            let outcome =
                                panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(&job.crop)))
                                    .unwrap_or_else(|payload| {
                                        let reason = panic_reason(payload.as_ref());
                                        log::warn!(
                                            "Classifier panicked on region {}: {reason}",
                                            job.ticket.region_id
                                        );
                                        ClassificationOutcome::Failed(format!(
                                            "classifier panicked: {reason}"
                                        ))
                                    });
                            let response = ClassificationResponse {
                                ticket: job.ticket,
                                outcome,
                            };
                            if tx.send(response).is_err() {
                                break;
                            }
                        }
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Started {} classification workers", handles.len());

        Ok(Self {
            jobs: Some(job_tx),
            completed: done_rx,
            workers: handles,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ClassificationDispatch for WorkerPoolDispatch {
    fn submit(&mut self, job: ClassificationJob) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        if jobs.send(job).is_err() {
            log::warn!("Classification workers have exited; request dropped");
        }
    }

    fn poll_completed(&mut self) -> Vec<ClassificationResponse> {
        self.completed.try_iter().collect()
    }
}

impl Drop for WorkerPoolDispatch {
    fn drop(&mut self) {
        // Workers are not joined: a call in progress runs out its own timeout.
        self.jobs.take();
        self.workers.clear();
    }
}
