//! # Vellum Core
//!
//! Security primitives shared across the Vellum schema registry:
//! principal management, credential verification, and the ACL-based
//! authorization engine.
//!
//! The registry crate (`vellum-schema`) layers operation-specific policy on
//! top of these primitives, in particular the existence non-disclosure rule
//! for denied single-resource reads. This crate only answers the raw
//! question "may this principal perform this operation on this resource".

pub mod auth;

pub use auth::{
    AclEngine, AclEntry, AuthDirectory, AuthError, AuthFile, AuthResult, CredentialRecord,
    Decision, Operation, Principal, PrincipalMatcher, Resource, ResourcePattern, Specificity,
};
