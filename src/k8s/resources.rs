/// Generic Kubernetes resource operations
use anyhow::Result;
use std::path::Path;
use tracing::info;

use super::client::Kubectl;
use crate::system::write_config;

/// How kubectl submits a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Apply,
    Create,
}

impl Submit {
    fn verb(self) -> &'static str {
        match self {
            Submit::Apply => "apply",
            Submit::Create => "create",
        }
    }
}

/// Generic Kubernetes resource management
pub struct ResourceManager<'a> {
    kubectl: &'a Kubectl,
}

impl<'a> ResourceManager<'a> {
    pub fn new(kubectl: &'a Kubectl) -> Self {
        Self { kubectl }
    }

    /// Submit a manifest (URL or file path), streaming kubectl output
    pub async fn submit(&self, submit: Submit, source: &str) -> Result<()> {
        self.submit_with_env(submit, source, &[]).await
    }

    /// Submit a manifest with extra variables in kubectl's environment
    pub async fn submit_with_env(
        &self,
        submit: Submit,
        source: &str,
        env: &[(&str, &str)],
    ) -> Result<()> {
        info!("Submitting Kubernetes manifest: {}", source);

        let mut command = self
            .kubectl
            .command()
            .args([submit.verb(), "-f", source])
            .stream()
            .context(format!("Failed to {} {}", submit.verb(), source));
        for (key, value) in env {
            command = command.env(key, value);
        }

        command.run_silent().await
    }

    /// Write a rendered manifest to `path`, then submit it
    pub async fn submit_rendered(&self, submit: Submit, path: &Path, manifest: &str) -> Result<()> {
        write_config(path, manifest).await?;
        self.submit(submit, &path.to_string_lossy()).await
    }

    pub async fn create_namespace(&self, name: &str) -> Result<()> {
        self.kubectl
            .command()
            .args(["create", "namespace", name])
            .context(format!("Failed to create namespace {}", name))
            .run_silent()
            .await
    }

    /// Delete a namespace and everything in it, waiting for completion
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.kubectl
            .command()
            .args(["delete", "namespace", name, "--wait=true"])
            .context(format!("Failed to delete namespace {}", name))
            .run_silent()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_verbs() {
        assert_eq!(Submit::Apply.verb(), "apply");
        assert_eq!(Submit::Create.verb(), "create");
    }

    #[tokio::test]
    async fn test_submit_rendered_writes_manifest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        let kubectl = Kubectl::with_program("true");

        ResourceManager::new(&kubectl)
            .submit_rendered(Submit::Apply, &path, "kind: Namespace\n")
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kind: Namespace\n");
    }

    #[tokio::test]
    async fn test_failed_submit_names_source() {
        let kubectl = Kubectl::with_program("false");
        let err = ResourceManager::new(&kubectl)
            .submit(Submit::Create, "/tmp/kube-flannel.yaml")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to create /tmp/kube-flannel.yaml"));
    }
}
