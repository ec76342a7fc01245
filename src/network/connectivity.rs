/// Pod-to-pod connectivity check
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use super::readiness::wait_for_pods_ready;
use crate::k8s::{Kubectl, ResourceManager, Submit};
use crate::templates::test_pod;
use crate::utils::polling::PollingConfig;

pub const TEST_POD_SELECTOR: &str = "app=network-test";
const TEST_PODS: [&str; 2] = ["network-test-1", "network-test-2"];
const TEST_POD_TIMEOUT_SECS: u64 = 120;
const TEST_POD_INTERVAL_SECS: u64 = 10;

/// Namespace name for a connectivity run started at `unix_secs`
pub fn test_namespace(unix_secs: i64) -> String {
    format!("network-test-{}", unix_secs)
}

/// Verify that one test pod can ping another.
///
/// Runs in a fresh namespace which is deleted afterwards whatever the outcome.
pub async fn check_connectivity(kubectl: &Kubectl) -> Result<()> {
    info!("Checking network connectivity between pods...");

    let namespace = test_namespace(chrono::Utc::now().timestamp());
    let resources = ResourceManager::new(kubectl);
    resources
        .create_namespace(&namespace)
        .await
        .context("Failed to create test namespace")?;

    let result = run_probe(kubectl, &namespace).await;

    if let Err(e) = resources.delete_namespace(&namespace).await {
        warn!("Failed to delete test namespace {}: {:#}", namespace, e);
    }

    result?;
    info!("✓ Network connectivity test successful");
    Ok(())
}

async fn run_probe(kubectl: &Kubectl, namespace: &str) -> Result<()> {
    info!("Creating test pods...");
    let resources = ResourceManager::new(kubectl);
    for name in TEST_PODS {
        let path = PathBuf::from(format!("/tmp/{}.yaml", name));
        resources
            .submit_rendered(Submit::Apply, &path, &test_pod(name, namespace)?)
            .await
            .with_context(|| format!("Failed to create test pod {}", name))?;
    }

    let polling = PollingConfig::new(
        TEST_POD_TIMEOUT_SECS,
        TEST_POD_INTERVAL_SECS,
        "Waiting for test pods to be ready",
    );
    wait_for_pods_ready(kubectl, TEST_POD_SELECTOR, &polling)
        .await
        .context("Test pods not ready")?;

    info!("Testing connectivity between pods...");
    let pod_ip = kubectl
        .command()
        .args(["get", "pod", TEST_PODS[1], "-n", namespace])
        .args(["-o", "jsonpath={.status.podIP}"])
        .context("Failed to get pod IP")
        .run()
        .await?;
    let pod_ip = pod_ip.trim();
    if pod_ip.is_empty() {
        anyhow::bail!("Could not get IP of pod {}", TEST_PODS[1]);
    }

    kubectl
        .command()
        .args(["exec", TEST_PODS[0], "-n", namespace, "--"])
        .args(["ping", "-c", "3", pod_ip])
        .stream()
        .context("Connectivity test failed")
        .run_silent()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_is_timestamped() {
        assert_eq!(test_namespace(1_700_000_000), "network-test-1700000000");
    }

    #[tokio::test]
    async fn test_namespace_creation_failure_stops_early() {
        let kubectl = Kubectl::with_program("false");
        let err = check_connectivity(&kubectl).await.unwrap_err();
        assert!(err.to_string().contains("Failed to create test namespace"));
    }
}
