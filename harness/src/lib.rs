//! Eventually consistent assertions on Kubernetes resources for operator end-to-end tests.
//!
//! A test builds a [`ResourceOptions`] describing one resource operation and hands it
//! to a [`TestContext`] method, which polls the cluster until the resource reaches
//! the described state or the deadline elapses:
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use kube_eventually::{gvk, transform, Condition, ResourceOptions, TestContext};
//!
//! let ctx = TestContext::from_env().await?;
//! ctx.eventually_resource_created_or_updated(
//!     ResourceOptions::fetched(gvk::data_science_cluster(), ctx.dsc())
//!         .mutate(transform::set(".spec.components.dashboard.managementState", "Managed"))
//!         .condition(Condition::status_condition("Ready", "True")),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]

/// Cluster access behind a trait.
pub mod client;
/// Conditions evaluated against objects, lists and errors.
pub mod condition;
/// Configuration read from the environment.
pub mod config;
/// The test context.
pub mod context;
/// Error types.
pub mod error;
/// Kinds used by the operator suites.
pub mod gvk;
/// Lifecycle operations.
pub mod lifecycle;
/// Helpers over dynamic objects.
pub mod object;
/// Operation descriptors.
pub mod options;
/// Field paths into objects.
pub mod path;
/// Deployment and CRD readiness.
pub mod readiness;
/// Eventually and consistently drivers.
pub mod retry;
/// Status condition writes.
pub mod status;
/// Mutations applied before writes.
pub mod transform;
/// Admission webhook assertions.
pub mod webhook;

pub use client::{DeleteOptions, KubeResourceClient, ListFilter, Propagation, ResourceClient};
pub use condition::{Comparison, Condition, Mismatch, Subject};
pub use config::HarnessConfig;
pub use context::TestContext;
pub use error::{ClientError, Error, Result};
pub use lifecycle::BestEffort;
pub use object::{Incarnation, NamespacedName};
pub use options::{ObjectSource, ResourceOptions};
pub use retry::Timeouts;
pub use status::StatusCondition;
pub use transform::Mutation;
