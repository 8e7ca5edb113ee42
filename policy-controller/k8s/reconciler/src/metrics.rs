use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use sovereignty_controller_k8s_api::policy::Phase;

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    transitions: Family<PhaseLabels, Counter>,
    writes: Family<KindLabels, Counter>,
    retries: Counter,
    failures: Family<KindLabels, Counter>,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Kind {
    Namespace,
    Constraint,
    Status,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PhaseLabels {
    phase: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let transitions = Family::<PhaseLabels, Counter>::default();
        reg.register(
            "reconcile_transitions",
            "Count of policy phase transitions",
            transitions.clone(),
        );

        let writes = Family::<KindLabels, Counter>::default();
        reg.register(
            "store_writes",
            "Count of writes to namespaces, constraints and policy status",
            writes.clone(),
        );

        let retries = Counter::default();
        reg.register(
            "store_retries",
            "Count of store requests retried after a transient error",
            retries.clone(),
        );

        let failures = Family::<KindLabels, Counter>::default();
        reg.register(
            "store_failures",
            "Count of store requests that failed after all retries",
            failures.clone(),
        );

        Self {
            transitions,
            writes,
            retries,
            failures,
        }
    }

    pub(crate) fn transition(&self, phase: Phase) {
        let phase = match phase {
            Phase::Pending => "Pending",
            Phase::Active => "Active",
            Phase::Failed => "Failed",
            Phase::Expired => "Expired",
        };
        self.transitions.get_or_create(&PhaseLabels { phase }).inc();
    }

    pub(crate) fn write(&self, kind: Kind) {
        self.writes.get_or_create(&kind.labels()).inc();
    }

    pub(crate) fn retry(&self) {
        self.retries.inc();
    }

    pub(crate) fn failure(&self, kind: Kind) {
        self.failures.get_or_create(&kind.labels()).inc();
    }

    #[cfg(test)]
    pub(crate) fn writes(&self, kind: Kind) -> u64 {
        self.writes.get_or_create(&kind.labels()).get()
    }

    #[cfg(test)]
    pub(crate) fn retries(&self) -> u64 {
        self.retries.get()
    }
}

impl Kind {
    fn labels(self) -> KindLabels {
        let kind = match self {
            Self::Namespace => "namespace",
            Self::Constraint => "constraint",
            Self::Status => "status",
        };
        KindLabels { kind }
    }
}
