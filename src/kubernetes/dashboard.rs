/// Kubernetes Dashboard deployment
use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use crate::k8s::{Kubectl, ResourceManager, Submit};
use crate::templates::{DASHBOARD_ADMIN_USER, DASHBOARD_MANIFEST_URL};

pub const DASHBOARD_ADMIN_PATH: &str = "/tmp/dashboard-admin-user.yaml";
pub const DASHBOARD_PROXY_URL: &str =
    "http://localhost:8001/api/v1/namespaces/kubernetes-dashboard/services/https:kubernetes-dashboard:/proxy/";

/// Deploy the dashboard and an admin-user service account.
///
/// Returns a login token when one could be created. Token failures only warn.
pub async fn install_dashboard(kubectl: &Kubectl) -> Result<Option<String>> {
    info!("Installing Kubernetes Dashboard...");

    let resources = ResourceManager::new(kubectl);
    resources.submit(Submit::Apply, DASHBOARD_MANIFEST_URL).await?;
    resources
        .submit_rendered(
            Submit::Apply,
            Path::new(DASHBOARD_ADMIN_PATH),
            DASHBOARD_ADMIN_USER,
        )
        .await?;

    info!("Creating token for Dashboard login...");
    let token = match kubectl
        .command()
        .args(["-n", "kubernetes-dashboard", "create", "token", "admin-user"])
        .run()
        .await
    {
        Ok(token) => Some(token.trim().to_string()),
        Err(e) => {
            warn!("Failed to create dashboard token: {:#}", e);
            None
        }
    };

    info!("✓ Kubernetes Dashboard installed");
    Ok(token)
}
