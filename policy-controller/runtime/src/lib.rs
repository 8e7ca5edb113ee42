pub use sovereignty_controller_core as core;
pub use sovereignty_controller_k8s_api as k8s;
pub use sovereignty_controller_k8s_index as index;
pub use sovereignty_controller_k8s_reconciler as reconciler;

mod admission;
mod args;
mod lease;

pub use self::{
    admission::{Admission, AdmissionMetrics},
    args::Args,
};
