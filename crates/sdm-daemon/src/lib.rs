//! # sdm-daemon
//!
//! The delivery-goal orchestration daemon: for every push into a monitored
//! workspace it plans a goal set, drives each goal through its lifecycle,
//! dispatches fulfillment in-process or to isolated workers, and reports
//! progress back to the collaborating backend.
//!
//! # Modules
//!
//! - [`bus`] / [`store`]: external transport and store contracts with
//!   in-memory implementations
//! - [`handlers`]: the push, requested, success, and completed handlers
//! - [`dispatch`]: implementation registry and in-process execution
//! - [`schedule`]: subprocess and Kubernetes isolated-goal schedulers
//! - [`progress`]: the buffered, multiplexed progress-log pipeline
//! - [`cancel`] / [`admin`]: goal-set cancellation and the chat verbs
//! - [`worker`]: the isolated-worker entrypoint sharing the dispatcher

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admin;
pub mod bus;
pub mod cache;
pub mod cancel;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod handlers;
pub mod jobs;
pub mod listeners;
pub mod progress;
pub mod schedule;
pub mod status;
pub mod store;
pub mod worker;
