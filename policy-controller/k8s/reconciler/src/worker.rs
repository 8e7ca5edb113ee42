use crate::{
    metrics::{ControllerMetrics, Kind},
    Backoff, Store, StoreError,
};
use chrono::{SecondsFormat, Utc};
use sovereignty_controller_core::{
    constraint,
    lifecycle::{self, Plan, State, Trigger},
    policy::is_dns_label,
    Desired, ResourceId,
};
use sovereignty_controller_k8s_api::{
    labels,
    policy::{Phase, SovereignPolicy, SovereignPolicyStatus},
};
use sovereignty_controller_k8s_index::SharedIndex;
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub(crate) enum Job {
    Apply,
    Expire,
    Delete(Arc<SovereignPolicy>),
}

/// Reconciles a single policy. Jobs are processed in order; a delete cancels
/// whatever job is in flight.
pub(crate) struct Worker<S> {
    id: ResourceId,
    store: S,
    index: SharedIndex,
    backoff: Backoff,
    metrics: ControllerMetrics,

    state: Option<State>,
    /// The desired state that was last fully converged.
    converged: Option<Desired>,
    /// The last status written or observed.
    status: Option<SovereignPolicyStatus>,
}

/// Why a convergence attempt ended before the policy became `Active`.
enum Halt {
    Rejected(String),
    Expired(String),
}

impl<S: Store> Worker<S> {
    pub(crate) fn new(
        id: ResourceId,
        store: S,
        index: SharedIndex,
        backoff: Backoff,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            id,
            store,
            index,
            backoff,
            metrics,
            state: None,
            converged: None,
            status: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut jobs: mpsc::UnboundedReceiver<Job>,
        cancel: watch::Receiver<bool>,
        prior: Option<JoinHandle<()>>,
    ) {
        // A policy recreated with the same name waits for the teardown of its
        // predecessor.
        if let Some(prior) = prior {
            if let Err(error) = prior.await {
                warn!(%error, "Previous worker failed");
            }
        }

        while let Some(job) = jobs.recv().await {
            let job = match job {
                Job::Delete(policy) => {
                    self.teardown(&policy).await;
                    return;
                }
                job => job,
            };

            tokio::select! {
                biased;
                _ = cancelled(cancel.clone()) => {
                    debug!(?job, "Cancelled");
                }
                _ = self.process(&job) => {}
            }
        }
    }

    async fn process(&mut self, job: &Job) {
        match job {
            Job::Apply => self.apply().await,
            Job::Expire => self.expire().await,
            Job::Delete(_) => {}
        }
    }

    async fn apply(&mut self) {
        let Some(policy) = self.index.read().policy(&self.id) else {
            debug!("Policy no longer indexed");
            return;
        };

        let state = match self.state {
            None => {
                self.status = policy.status.clone();
                State::Pending
            }
            Some(state) => match state.next(Trigger::SpecChanged) {
                Some(state) => state,
                None => return,
            },
        };
        self.state = Some(state);

        let desired = match Desired::validate(self.id.clone(), &policy.spec) {
            Ok(desired) => desired,
            Err(error) => {
                let message = format!("Invalid policy: {error}");
                return self.halt(Halt::Rejected(message)).await;
            }
        };

        let plan = lifecycle::plan(self.converged.as_ref(), &desired);
        if let Plan::Retargeted { previous } = &plan {
            let message = format!(
                "targetNamespace is immutable: policy governs namespace '{previous}'"
            );
            return self.halt(Halt::Rejected(message)).await;
        }

        if desired.is_expired(Utc::now()) {
            if let Err(error) = self.retract(&desired.target_namespace).await {
                warn!(%error, "Failed to retract constraint of expired policy");
            }
            return self.halt(Halt::Expired(expired_message(&desired))).await;
        }

        let replace = match plan {
            _ if state != State::Active => false,
            Plan::Unchanged => {
                debug!("No relevant change");
                return;
            }
            Plan::Replace => true,
            Plan::Converge | Plan::Retargeted { .. } => false,
        };

        match self.converge(&desired, replace).await {
            Ok(()) => {
                let message = format!(
                    "Sovereignty enforcement active for namespace '{}' restricted to regions [{}]",
                    desired.target_namespace,
                    desired
                        .regions
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                self.transition(Trigger::Converged, message, true).await;
                self.converged = Some(desired);
            }
            Err(halt) => self.halt(halt).await,
        }
    }

    /// Writes the namespace annotations and the constraint.
    async fn converge(&self, desired: &Desired, replace: bool) -> Result<(), Halt> {
        let ns = &desired.target_namespace;

        let annotations = self
            .retry(Kind::Namespace, || self.store.get_namespace(ns))
            .await
            .map_err(|error| write_failed("read namespace", ns, error))?
            .ok_or_else(|| Halt::Rejected(format!("Target namespace '{ns}' does not exist")))?;

        if let Err(claimed) = self.index.write().try_claim(ns, &self.id) {
            return Err(Halt::Rejected(format!(
                "Namespace '{ns}' is already governed by SovereignPolicy {}",
                claimed.holder
            )));
        }

        if labels::residency_annotations(&annotations) != desired.stable_annotations() {
            let annotations = desired.annotations(Utc::now());
            self.retry(Kind::Namespace, || {
                self.store
                    .patch_namespace_annotations(ns, annotations.clone())
            })
            .await
            .map_err(|error| write_failed("annotate namespace", ns, error))?;
            self.metrics.write(Kind::Namespace);
            info!(namespace = %ns, regions = %desired.encoded_regions, "Annotated namespace");
        }

        let target = constraint::synthesize(desired);
        let name = desired.constraint_name();
        let live = self
            .retry(Kind::Constraint, || self.store.get_constraint(&name))
            .await
            .map_err(|error| write_failed("read constraint", &name, error))?;

        match live {
            Some(_) if replace => {
                self.retry(Kind::Constraint, || self.store.delete_constraint(&name))
                    .await
                    .map_err(|error| write_failed("delete constraint", &name, error))?;
                self.metrics.write(Kind::Constraint);
                debug!(constraint = %name, "Deleted constraint for replacement");
            }
            Some(live) if constraint::is_current(&live, &target) => {
                debug!(constraint = %name, "Constraint is current");
                return Ok(());
            }
            _ => {}
        }

        self.retry(Kind::Constraint, || self.store.apply_constraint(target.clone()))
            .await
            .map_err(|error| write_failed("write constraint", &name, error))?;
        self.metrics.write(Kind::Constraint);
        info!(constraint = %name, "Wrote constraint");
        Ok(())
    }

    async fn expire(&mut self) {
        if self.state != Some(State::Active) {
            debug!(state = ?self.state, "Ignoring expiry of inactive policy");
            return;
        }
        let Some(desired) = self.converged.clone() else {
            return;
        };

        if let Err(error) = self.retract(&desired.target_namespace).await {
            return self
                .halt(write_failed(
                    "delete constraint",
                    &desired.constraint_name(),
                    error,
                ))
                .await;
        }
        self.halt(Halt::Expired(expired_message(&desired))).await;
    }

    async fn teardown(&mut self, policy: &SovereignPolicy) {
        if let Some(next) = self.state.unwrap_or(State::Pending).next(Trigger::Deleted) {
            self.state = Some(next);
        }

        let mut targets = self
            .converged
            .iter()
            .map(|d| d.target_namespace.clone())
            .collect::<Vec<_>>();
        let ns = policy.spec.target_namespace.trim();
        if is_dns_label(ns) && !targets.iter().any(|t| t == ns) {
            targets.push(ns.to_string());
        }

        for ns in &targets {
            match self.retract(ns).await {
                Ok(true) => info!(namespace = %ns, "Removed constraint of deleted policy"),
                Ok(false) => {}
                Err(error) => {
                    error!(namespace = %ns, %error, "Failed to remove constraint of deleted policy")
                }
            }
            info!(namespace = %ns, "Policy deleted; namespace annotations preserved");
        }
        self.index.write().release_all(&self.id);
    }

    /// Deletes the target namespace's constraint if it is owned by this
    /// policy. Returns true if a constraint was deleted.
    async fn retract(&self, ns: &str) -> Result<bool, StoreError> {
        let name = sovereignty_controller_core::policy::constraint_name(ns);
        let live = self
            .retry(Kind::Constraint, || self.store.get_constraint(&name))
            .await?;
        match live {
            Some(live) if constraint::owner(&live).as_ref() == Some(&self.id) => {
                self.retry(Kind::Constraint, || self.store.delete_constraint(&name))
                    .await?;
                self.metrics.write(Kind::Constraint);
                Ok(true)
            }
            Some(_) => {
                debug!(constraint = %name, "Constraint is owned by another policy");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn halt(&mut self, halt: Halt) {
        let (trigger, message) = match halt {
            Halt::Rejected(message) => (Trigger::Rejected, message),
            Halt::Expired(message) => (Trigger::ExpiryReached, message),
        };

        // A failed policy keeps whatever constraint it already wrote, but no
        // longer holds its namespace.
        self.index.write().release_all(&self.id);
        let constraint_created = trigger == Trigger::Rejected
            && self.status.as_ref().is_some_and(|s| s.constraint_created);
        self.transition(trigger, message, constraint_created).await;
    }

    /// Applies a lifecycle transition and records the resulting status.
    async fn transition(&mut self, trigger: Trigger, message: String, constraint_created: bool) {
        let current = self.state.unwrap_or(State::Pending);
        let Some(next) = current.next(trigger) else {
            debug!(?current, ?trigger, "Ignoring transition");
            return;
        };
        self.state = Some(next);
        let Some(phase) = next.phase() else {
            return;
        };
        self.index.write().set_phase(&self.id, phase);

        let unchanged = self.status.as_ref().is_some_and(|s| {
            s.phase == phase && s.message == message && s.constraint_created == constraint_created
        });
        if unchanged {
            return;
        }

        match phase {
            Phase::Failed => error!(%message, "SovereignPolicy failed"),
            Phase::Expired => warn!(%message, "SovereignPolicy expired"),
            _ => info!(%phase, %message, "SovereignPolicy updated"),
        }

        let status = SovereignPolicyStatus {
            phase,
            last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            message,
            constraint_created,
        };
        if let Err(error) = self
            .retry(Kind::Status, || {
                self.store.patch_status(&self.id, status.clone())
            })
            .await
        {
            error!(%error, "Failed to patch SovereignPolicy status");
            return;
        }
        self.metrics.write(Kind::Status);
        if self.status.as_ref().map(|s| s.phase) != Some(phase) {
            self.metrics.transition(phase);
        }
        self.status = Some(status);
    }

    /// Runs a store request, retrying transient failures with backoff.
    async fn retry<T, F, Fut>(&self, kind: Kind, mut request: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries = 0;
        loop {
            match request().await {
                Ok(rsp) => return Ok(rsp),
                Err(error) if error.is_transient() => match self.backoff.delay(retries) {
                    Some(delay) => {
                        warn!(%error, ?delay, "Retrying store request");
                        self.metrics.retry();
                        time::sleep(delay).await;
                        retries += 1;
                    }
                    None => {
                        self.metrics.failure(kind);
                        return Err(error);
                    }
                },
                Err(error) => {
                    self.metrics.failure(kind);
                    return Err(error);
                }
            }
        }
    }
}

/// Completes once the policy has been deleted.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

fn write_failed(action: &str, target: &str, error: StoreError) -> Halt {
    Halt::Rejected(format!("Failed to {action} '{target}': {error}"))
}

fn expired_message(desired: &Desired) -> String {
    match desired.expiry {
        Some(expiry) => format!(
            "Policy expired on {}",
            expiry.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => "Policy expired".to_string(),
    }
}
