//! Reconciliation of generated resources against the cluster
//!
//! - [`artifact`] writes one API's resources leaf-first and removes them by label
//! - [`singleton`] runs the three-way diff for control-plane owned resources
//! - [`labels`] and [`vhost`] prepare a resource set before it is written
//! - [`client`] is the CRUD seam, with a Kubernetes and an in-memory backend

pub mod artifact;
pub mod client;
pub mod labels;
pub mod singleton;
pub mod vhost;

pub use artifact::{reconcile_artifact, undeploy, upsert, Applied, ReconcileReport};
pub use client::{ClusterClient, InMemoryClusterClient, KubeClusterClient, ObjectPage};
pub use singleton::{three_way, ThreeWayReport};
