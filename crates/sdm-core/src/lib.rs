//! # sdm-core
//!
//! Core library for the SDM delivery-goal orchestration control plane.
//!
//! This crate provides the domain model and pure logic of a software delivery
//! machine: for every code push into a monitored workspace it plans a set of
//! delivery *goals* (build, test, deploy, verify), wires them into a
//! dependency graph, and drives each goal through a well-defined lifecycle.
//!
//! ## Features
//!
//! - **Push Tests**: Composable boolean predicates over push context
//! - **Goal Planning**: Ordered push rules producing signed goal sets
//! - **State Machine**: Explicit goal lifecycle with precondition gating
//! - **Signing**: Canonical serialization with RSA-SHA512 signatures
//! - **Redaction**: Credential stripping for surfaced error messages
//!
//! ## Example
//!
//! ```rust
//! use sdm_core::goal::{Goal, GoalKey};
//!
//! let build = Goal::builder("build", "code").description("Building").build();
//! let test = Goal::builder("test", "code")
//!     .description("Testing")
//!     .precondition(GoalKey::new("code", "build"))
//!     .build();
//! assert!(test.depends_on(&build.key()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod goal;
pub mod plan;
pub mod push;
pub mod redact;
pub mod sign;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SdmConfig;
    pub use crate::goal::{Goal, GoalKey, GoalSet, GoalState, SdmGoalEvent};
    pub use crate::plan::{Planner, PushRule};
    pub use crate::push::{Push, PushTestNode, RepoRef};
    pub use crate::sign::{GoalSigner, GoalVerifier};
}

pub use config::SdmConfig;
pub use goal::{Goal, GoalKey, GoalSet, GoalState, SdmGoalEvent};
pub use push::{Push, RepoRef};
