//! desklock - role-based UI policy enforcer for desk-style web applications.
//!
//! This crate is the operator side: settings, policy validation and bundle
//! generation. The enforcement engine lives in `desklock-engine`, the
//! browser adapter in `desklock-client-wasm`.

pub mod errors;
pub mod inspect;
pub mod settings;
