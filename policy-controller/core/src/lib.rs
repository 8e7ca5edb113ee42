#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod constraint;
pub mod evaluate;
pub mod lifecycle;
pub mod policy;
pub mod regions;
mod resource_id;

pub use self::{
    policy::{Desired, EnforcementAction, ValidationError},
    resource_id::ResourceId,
};
