#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoint;
pub mod envtag;
mod identity_match;

pub use self::{
    endpoint::{Definition, Extracted, SecretLookup, Source},
    identity_match::is_subset,
};
