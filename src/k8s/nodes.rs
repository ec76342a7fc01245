/// Kubernetes node operations
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::client::Kubectl;

/// Kubernetes node management operations
pub struct NodeManager<'a> {
    kubectl: &'a Kubectl,
}

impl<'a> NodeManager<'a> {
    pub fn new(kubectl: &'a Kubectl) -> Self {
        Self { kubectl }
    }

    /// Apply labels in key order, replacing existing values. The first
    /// failure aborts the batch; labels already applied stay in place.
    pub async fn label_node(&self, node_name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in labels {
            info!("Adding label {}={} to node {}", key, value, node_name);

            self.kubectl
                .command()
                .args(["label", "nodes", node_name])
                .arg(format!("{}={}", key, value))
                .arg("--overwrite")
                .context(format!("Failed to add label {}={}", key, value))
                .run_silent()
                .await?;
        }

        Ok(())
    }

    /// Apply taints in the given order, replacing a taint with the same key
    /// and effect. The first failure aborts the batch.
    pub async fn taint_node(&self, node_name: &str, taints: &[String]) -> Result<()> {
        for taint in taints {
            info!("Adding taint {} to node {}", taint, node_name);

            self.kubectl
                .command()
                .args(["taint", "nodes", node_name, taint.as_str(), "--overwrite"])
                .context(format!("Failed to add taint {}", taint))
                .run_silent()
                .await?;
        }

        Ok(())
    }

    /// Print nodes, pods and control plane component health
    pub async fn cluster_status(&self) -> Result<()> {
        info!("Checking Kubernetes cluster status...");

        self.kubectl
            .command()
            .args(["get", "nodes"])
            .stream()
            .context("Failed to get nodes")
            .run_silent()
            .await?;

        self.kubectl
            .command()
            .args(["get", "pods", "--all-namespaces"])
            .stream()
            .context("Failed to get pods")
            .run_silent()
            .await?;

        // componentstatuses is deprecated and missing on some API servers
        if let Err(e) = self
            .kubectl
            .command()
            .args(["get", "componentstatuses"])
            .stream()
            .run_silent()
            .await
        {
            warn!("Failed to get component status: {:#}", e);
        }

        Ok(())
    }
}
