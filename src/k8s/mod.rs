/// Kubernetes cluster operations
pub mod client;
pub mod nodes;
pub mod resources;

pub use client::{Kubectl, PodPhaseSource};
pub use nodes::NodeManager;
pub use resources::{ResourceManager, Submit};
