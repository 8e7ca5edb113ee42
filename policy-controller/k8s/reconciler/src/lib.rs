//! Sovereignty Controller Reconciler
//!
//! Converges the cluster with each `SovereignPolicy`: the target namespace is
//! annotated with the allowed regions and a `K8sGeoResidency` constraint is
//! written for the admission policy engine. Events from the index are
//! dispatched to one worker per policy, so that work for a single policy is
//! serialized while different policies proceed in parallel. Only the holder of
//! the write lease dispatches events.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
mod controller;
pub mod expiry;
mod metrics;
mod store;
mod worker;

#[cfg(test)]
mod tests;

pub use self::{
    backoff::Backoff,
    controller::Controller,
    metrics::ControllerMetrics,
    store::{KubeStore, Store, StoreError, FIELD_MANAGER},
};
