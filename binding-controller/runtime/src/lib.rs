#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use binding_controller_core as core;
pub use binding_controller_k8s_api as k8s;
pub use binding_controller_k8s_reconcile as reconcile;
pub use binding_controller_k8s_store as store;

mod args;
mod controller;
mod lease;

pub use self::args::Args;
