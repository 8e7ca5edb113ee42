use crate::{
    core::{
        evaluate::{self, Workload},
        Desired, ResourceId,
    },
    index::SharedIndex,
    k8s::{
        policy::{SovereignPolicy, SovereignPolicySpec},
        Pod, PodSpec,
    },
};
use anyhow::{anyhow, bail, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{
    core::{admission::Operation, DynamicObject},
    Resource, ResourceExt,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Admits pods against the residency requirements of their namespace and
/// validates `SovereignPolicy` resources.
#[derive(Clone)]
pub struct Admission {
    index: SharedIndex,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DecisionLabels {
    result: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Allowed,
    Warned,
    Denied,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req)
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(index: SharedIndex, metrics: AdmissionMetrics) -> Self {
        Self { index, metrics }
    }

    fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        if is_kind::<Pod>(&req) {
            return self.admit_pod(req);
        }

        if is_kind::<SovereignPolicy>(&req) {
            return self.admit_policy(req);
        }

        debug!(
            group = %req.kind.group,
            kind = %req.kind.kind,
            "Allowing unconstrained resource type"
        );
        AdmissionResponse::from(&req)
    }

    fn admit_pod(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return rsp;
        }

        let Some(ns) = req
            .namespace
            .clone()
            .or_else(|| req.object.as_ref().and_then(ResourceExt::namespace))
        else {
            return rsp;
        };
        let Some((residency, exemptions)) = self.index.read().residency(&ns) else {
            trace!(%ns, "Namespace has no residency requirements");
            return self.metrics.record(rsp, Outcome::Allowed);
        };

        // A spec that cannot be read is treated as having no region rule.
        let spec = req
            .object
            .as_ref()
            .and_then(|obj| obj.data.get("spec"))
            .and_then(|spec| serde_json::from_value::<PodSpec>(spec.clone()).ok());
        let workload = Workload {
            kind: &req.kind.kind,
            namespace: &ns,
            spec: spec.as_ref(),
        };
        let decision = evaluate::evaluate(workload, &residency, &exemptions);

        let name = req
            .object
            .as_ref()
            .map(ResourceExt::name_any)
            .unwrap_or_else(|| req.name.clone());
        if !decision.allowed {
            info!(%ns, %name, reason = %decision.reason(), "Denied");
            return self
                .metrics
                .record(rsp.deny(decision.reason()), Outcome::Denied);
        }

        if !decision.violations.is_empty() {
            warn!(%ns, %name, reason = %decision.reason(), "Residency violation permitted in dry-run mode");
            let mut rsp = rsp;
            rsp.warnings = Some(decision.violations);
            return self.metrics.record(rsp, Outcome::Warned);
        }

        self.metrics.record(rsp, Outcome::Allowed)
    }

    fn admit_policy(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return rsp;
        }

        let old_target = req
            .old_object
            .as_ref()
            .and_then(|old| old.data.get("spec"))
            .and_then(|spec| serde_json::from_value::<SovereignPolicySpec>(spec.clone()).ok())
            .map(|spec| spec.target_namespace.trim().to_string())
            .filter(|target| !target.is_empty());

        let kind = req.kind.kind.clone();
        let (obj, spec) = match parse_spec::<SovereignPolicySpec>(req) {
            Ok(spec) => spec,
            Err(error) => {
                info!(%error, "Failed to parse {} spec", kind);
                return self.metrics.record(rsp.deny(error), Outcome::Denied);
            }
        };

        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        if let Err(error) = self.validate_policy(&ns, &name, &spec, old_target.as_deref()) {
            info!(%error, %ns, %name, %kind, "Denied");
            return self.metrics.record(rsp.deny(error), Outcome::Denied);
        }

        self.metrics.record(rsp, Outcome::Allowed)
    }

    /// Rejects invalid specs, retargeting, and a second policy for a namespace
    /// that is already governed.
    fn validate_policy(
        &self,
        ns: &str,
        name: &str,
        spec: &SovereignPolicySpec,
        old_target: Option<&str>,
    ) -> Result<()> {
        let id = ResourceId::new(ns.to_string(), name.to_string());
        let desired = Desired::validate(id.clone(), spec)?;
        let target = &desired.target_namespace;
        if let Some(old) = old_target {
            if old != target.as_str() {
                bail!("targetNamespace is immutable: policy governs namespace '{old}'");
            }
        }

        if let Some(holder) = self.index.read().governor(target) {
            if holder != id {
                bail!("Namespace '{target}' is already governed by SovereignPolicy {holder}");
            }
        }
        Ok(())
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(DynamicObject, T)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    Ok((obj, spec))
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "admission_decisions",
            "Count of admission reviews by result",
            decisions.clone(),
        );
        Self { decisions }
    }

    fn record(&self, rsp: AdmissionResponse, outcome: Outcome) -> AdmissionResponse {
        let result = match outcome {
            Outcome::Allowed => "allowed",
            Outcome::Warned => "warned",
            Outcome::Denied => "denied",
        };
        self.decisions.get_or_create(&DecisionLabels { result }).inc();
        rsp
    }
}
