//! Mirrors of remote worker namespaces.

mod mirror;
mod registry;
mod session;

pub use self::{
    mirror::{Mirror, Origin, RegisteredServiceMirror, ServiceClaimMirror},
    registry::{Registry, Watches},
    session::Session,
};
