use crate::{
    regions::{self, InvalidRegionFormat, RegionSet},
    ResourceId,
};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use sovereignty_controller_k8s_api::{labels, policy::SovereignPolicySpec};
use std::{collections::BTreeSet, fmt, str::FromStr, sync::LazyLock};

pub const MAX_DESCRIPTION_LEN: usize = 256;

const DNS_LABEL_MAX_LEN: usize = 63;

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS label regex must compile")
});

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EnforcementAction {
    #[default]
    Deny,
    DryRun,
}

/// A structurally valid policy: the state the controller converges towards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Desired {
    pub id: ResourceId,
    pub target_namespace: String,
    pub regions: RegionSet,
    pub encoded_regions: String,
    pub enforcement: EnforcementAction,
    pub excluded_namespaces: BTreeSet<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("targetNamespace is required")]
    MissingTargetNamespace,

    #[error("targetNamespace {0:?} is not a valid DNS-1123 label")]
    InvalidTargetNamespace(String),

    #[error("allowedRegions must contain at least one region")]
    NoRegions,

    #[error("invalid allowedRegions entry: {0}")]
    InvalidRegion(#[from] InvalidRegionFormat),

    #[error("enforcementAction {0:?} must be one of 'deny' or 'dryrun'")]
    InvalidEnforcementAction(String),

    #[error("description must be at most {MAX_DESCRIPTION_LEN} characters, got {0}")]
    DescriptionTooLong(usize),

    #[error("expiryDate {0:?} is not an RFC3339 timestamp")]
    InvalidExpiryDate(String),

    #[error("excludedNamespaces entry {0:?} is not a valid DNS-1123 label")]
    InvalidExcludedNamespace(String),
}

pub fn is_dns_label(name: &str) -> bool {
    name.len() <= DNS_LABEL_MAX_LEN && DNS_LABEL.is_match(name)
}

// === impl EnforcementAction ===

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::DryRun => "dryrun",
        }
    }
}

impl FromStr for EnforcementAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny" => Ok(Self::Deny),
            "dryrun" => Ok(Self::DryRun),
            s => Err(ValidationError::InvalidEnforcementAction(s.to_string())),
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Desired ===

impl Desired {
    /// Validates a policy spec. The error describes the first failing rule.
    pub fn validate(id: ResourceId, spec: &SovereignPolicySpec) -> Result<Self, ValidationError> {
        let target_namespace = spec.target_namespace.trim();
        if target_namespace.is_empty() {
            return Err(ValidationError::MissingTargetNamespace);
        }
        if !is_dns_label(target_namespace) {
            return Err(ValidationError::InvalidTargetNamespace(
                target_namespace.to_string(),
            ));
        }

        if spec.allowed_regions.is_empty() {
            return Err(ValidationError::NoRegions);
        }
        let encoded_regions = regions::encode(&spec.allowed_regions)?;
        let regions = spec.allowed_regions.iter().cloned().collect::<RegionSet>();

        let enforcement = spec
            .enforcement_action
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();

        if let Some(description) = spec.description.as_deref() {
            let len = description.chars().count();
            if len > MAX_DESCRIPTION_LEN {
                return Err(ValidationError::DescriptionTooLong(len));
            }
        }

        let expiry = spec
            .expiry_date
            .as_deref()
            .map(|date| {
                DateTime::parse_from_rfc3339(date)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| ValidationError::InvalidExpiryDate(date.to_string()))
            })
            .transpose()?;

        let mut excluded_namespaces = BTreeSet::new();
        for ns in spec.excluded_namespaces.iter().flatten() {
            if !is_dns_label(ns) {
                return Err(ValidationError::InvalidExcludedNamespace(ns.clone()));
            }
            excluded_namespaces.insert(ns.clone());
        }

        Ok(Self {
            id,
            target_namespace: target_namespace.to_string(),
            regions,
            encoded_regions,
            enforcement,
            excluded_namespaces,
            expiry,
            description: spec.description.clone(),
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// The constraint name is derived from the governed namespace, which a
    /// single policy owns at a time.
    pub fn constraint_name(&self) -> String {
        constraint_name(&self.target_namespace)
    }

    /// Returns true if `other` would produce different namespace annotations or
    /// a different constraint.
    ///
    /// Description and expiry changes are not written anywhere, so they do not
    /// count.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.target_namespace != other.target_namespace
            || self.regions != other.regions
            || self.enforcement != other.enforcement
            || self.excluded_namespaces != other.excluded_namespaces
    }

    /// The annotation set written to the target namespace.
    pub fn annotations(&self, now: DateTime<Utc>) -> labels::Map {
        let mut annotations = self.stable_annotations();
        annotations.insert(
            labels::UPDATED_AT.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        annotations
    }

    /// The annotation set without the volatile timestamp, for comparison with
    /// what is already on the namespace.
    pub fn stable_annotations(&self) -> labels::Map {
        [
            (labels::ALLOWED_REGIONS, self.encoded_regions.clone()),
            (labels::POLICY_NAME, self.id.name.clone()),
            (labels::POLICY_NAMESPACE, self.id.namespace.clone()),
            (
                labels::ENFORCEMENT_ACTION,
                self.enforcement.as_str().to_string(),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

pub fn constraint_name(target_namespace: &str) -> String {
    format!("geo-residency-{target_namespace}")
}

/// Reads the owning policy recorded in a namespace's annotations.
pub fn annotated_owner(annotations: &labels::Map) -> Option<ResourceId> {
    let name = annotations.get(labels::POLICY_NAME)?;
    let namespace = annotations.get(labels::POLICY_NAMESPACE)?;
    Some(ResourceId::new(namespace.clone(), name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn id() -> ResourceId {
        ResourceId::new("default".to_string(), "finance-eu".to_string())
    }

    fn spec() -> SovereignPolicySpec {
        SovereignPolicySpec {
            target_namespace: "finance".to_string(),
            allowed_regions: vec!["eu-west-1".to_string(), "eu-central-1".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn validates_minimal_spec() {
        let desired = Desired::validate(id(), &spec()).expect("spec must be valid");
        assert_eq!(desired.target_namespace, "finance");
        assert_eq!(desired.encoded_regions, "eu-central-1,eu-west-1");
        assert_eq!(desired.enforcement, EnforcementAction::Deny);
        assert_eq!(desired.expiry, None);
        assert_eq!(desired.constraint_name(), "geo-residency-finance");
    }

    #[test]
    fn reports_first_failing_rule() {
        let mut s = spec();
        s.target_namespace = String::new();
        s.allowed_regions.clear();
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::MissingTargetNamespace)
        );

        let mut s = spec();
        s.target_namespace = "Finance_Team".to_string();
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::InvalidTargetNamespace(
                "Finance_Team".to_string()
            ))
        );

        let mut s = spec();
        s.allowed_regions.clear();
        assert_eq!(Desired::validate(id(), &s), Err(ValidationError::NoRegions));

        let mut s = spec();
        s.allowed_regions.push(String::new());
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::InvalidRegion(InvalidRegionFormat::Empty))
        );
    }

    #[test]
    fn parses_enforcement_action() {
        let mut s = spec();
        s.enforcement_action = Some("dryrun".to_string());
        let desired = Desired::validate(id(), &s).unwrap();
        assert_eq!(desired.enforcement, EnforcementAction::DryRun);

        s.enforcement_action = Some("warn".to_string());
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::InvalidEnforcementAction("warn".to_string()))
        );
    }

    #[test]
    fn bounds_description() {
        let mut s = spec();
        s.description = Some("x".repeat(MAX_DESCRIPTION_LEN));
        assert!(Desired::validate(id(), &s).is_ok());

        s.description = Some("x".repeat(MAX_DESCRIPTION_LEN + 1));
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::DescriptionTooLong(MAX_DESCRIPTION_LEN + 1))
        );
    }

    #[test]
    fn parses_expiry() {
        let mut s = spec();
        s.expiry_date = Some("2026-03-01T12:00:00Z".to_string());
        let desired = Desired::validate(id(), &s).unwrap();
        let expiry = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(desired.expiry, Some(expiry));
        assert!(!desired.is_expired(expiry - chrono::Duration::seconds(1)));
        assert!(desired.is_expired(expiry));

        s.expiry_date = Some("March 1st".to_string());
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::InvalidExpiryDate("March 1st".to_string()))
        );
    }

    #[test]
    fn rejects_invalid_exclusions() {
        let mut s = spec();
        s.excluded_namespaces = Some(vec!["monitoring".to_string(), "-bad".to_string()]);
        assert_eq!(
            Desired::validate(id(), &s),
            Err(ValidationError::InvalidExcludedNamespace("-bad".to_string()))
        );
    }

    #[test]
    fn description_and_expiry_are_not_semantic_changes() {
        let a = Desired::validate(id(), &spec()).unwrap();

        let mut s = spec();
        s.description = Some("EU only".to_string());
        s.expiry_date = Some("2030-01-01T00:00:00Z".to_string());
        s.allowed_regions.reverse();
        let b = Desired::validate(id(), &s).unwrap();
        assert!(!a.differs_from(&b));

        let mut s = spec();
        s.enforcement_action = Some("dryrun".to_string());
        assert!(a.differs_from(&Desired::validate(id(), &s).unwrap()));

        let mut s = spec();
        s.allowed_regions.push("eu-north-1".to_string());
        assert!(a.differs_from(&Desired::validate(id(), &s).unwrap()));
    }

    #[test]
    fn annotations() {
        let desired = Desired::validate(id(), &spec()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 30, 0).unwrap();
        let annotations = desired.annotations(now);
        assert_eq!(
            annotations,
            maplit::btreemap! {
                labels::ALLOWED_REGIONS.to_string() => "eu-central-1,eu-west-1".to_string(),
                labels::POLICY_NAME.to_string() => "finance-eu".to_string(),
                labels::POLICY_NAMESPACE.to_string() => "default".to_string(),
                labels::ENFORCEMENT_ACTION.to_string() => "deny".to_string(),
                labels::UPDATED_AT.to_string() => "2026-10-14T08:30:00Z".to_string(),
            }
        );
        assert_eq!(annotated_owner(&annotations), Some(id()));
        assert_eq!(labels::residency_annotations(&annotations), desired.stable_annotations());
    }
}
