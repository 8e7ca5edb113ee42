use crate::{
    worker::{Job, Worker},
    Backoff, ControllerMetrics, Store,
};
use ahash::AHashMap as HashMap;
use kubert::lease::Claim;
use sovereignty_controller_core::ResourceId;
use sovereignty_controller_k8s_index::{Event, SharedIndex};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, info_span, Instrument};

/// Dispatches index events to per-policy workers while this replica holds the
/// write lease.
pub struct Controller<S> {
    store: S,
    index: SharedIndex,
    claims: watch::Receiver<Arc<Claim>>,
    name: String,
    backoff: Backoff,
    metrics: ControllerMetrics,

    workers: HashMap<ResourceId, WorkerHandle>,
    /// Workers tearing down a deleted policy.
    retiring: HashMap<ResourceId, JoinHandle<()>>,
}

struct WorkerHandle {
    jobs: mpsc::UnboundedSender<Job>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<S: Store> Controller<S> {
    pub fn new(
        store: S,
        index: SharedIndex,
        claims: watch::Receiver<Arc<Claim>>,
        name: impl ToString,
        backoff: Backoff,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            store,
            index,
            claims,
            name: name.to_string(),
            backoff,
            metrics,
            workers: HashMap::new(),
            retiring: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            // Standby replicas hold events until they are elected.
            if !self.await_leadership().await {
                info!("Lease claims closed; stopping");
                return;
            }
            self.dispatch(event);
        }
        debug!("Index events closed");
    }

    /// Waits until this replica holds the lease. Returns false if the claims
    /// channel closed.
    async fn await_leadership(&mut self) -> bool {
        let mut announced = false;
        loop {
            if self.claims.borrow_and_update().is_current_for(&self.name) {
                if announced {
                    info!("Acquired write lease");
                }
                return true;
            }
            if !announced {
                info!(holder = %self.claims.borrow().holder, "Waiting for write lease");
                announced = true;
            }
            if self.claims.changed().await.is_err() {
                return false;
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Apply(id) => self.send(id, Job::Apply),
            Event::Expire(id) => self.send(id, Job::Expire),
            Event::Delete(id, policy) => {
                let handle = match self.workers.remove(&id) {
                    Some(handle) => handle,
                    None => self.spawn(id.clone()),
                };
                handle.cancel.send_replace(true);
                if handle.jobs.send(Job::Delete(policy)).is_err() {
                    debug!(%id, "Worker already stopped");
                }
                self.retiring.insert(id, handle.task);
            }
        }
        self.retiring.retain(|_, task| !task.is_finished());
    }

    fn send(&mut self, id: ResourceId, job: Job) {
        let job = match self.workers.get(&id) {
            Some(handle) => match handle.jobs.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let handle = self.spawn(id.clone());
        if handle.jobs.send(job).is_err() {
            debug!(%id, "Worker stopped before its first job");
        }
        self.workers.insert(id, handle);
    }

    fn spawn(&mut self, id: ResourceId) -> WorkerHandle {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let prior = self.retiring.remove(&id);

        let worker = Worker::new(
            id.clone(),
            self.store.clone(),
            self.index.clone(),
            self.backoff,
            self.metrics.clone(),
        );
        let span = info_span!("sovereignpolicy", ns = %id.namespace, name = %id.name);
        let task = tokio::spawn(worker.run(jobs_rx, cancel_rx, prior).instrument(span));

        WorkerHandle {
            jobs: jobs_tx,
            cancel: cancel_tx,
            task,
        }
    }
}
