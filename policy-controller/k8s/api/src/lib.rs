#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod constraint;
pub mod labels;
pub mod policy;

pub use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{
        Affinity, Container, Namespace, NodeAffinity, NodeSelector, NodeSelectorRequirement,
        NodeSelectorTerm, Pod, PodSpec,
    },
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams},
    error::ErrorResponse,
    Client, Error, Resource, ResourceExt,
};
