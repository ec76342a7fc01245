/// Cilium CNI deployment through Helm
use anyhow::Result;
use tracing::info;

use crate::config::NetworkConfig;
use crate::k8s::Kubectl;
use crate::utils::command::{tool_available, CommandBuilder};
use crate::utils::steps::{run_steps, Step};

pub const HELM_REPO_URL: &str = "https://helm.cilium.io/";
pub const HELM_INSTALL_SCRIPT: &str =
    "https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3";

/// `helm install` arguments for the Cilium chart
pub fn cilium_helm_args(config: &NetworkConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "install",
        "cilium",
        "cilium/cilium",
        "--namespace",
        "kube-system",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut set = |value: String| {
        args.push("--set".to_string());
        args.push(value);
    };

    set(format!("ipam.operator.clusterPoolIPv4PodCIDR={}", config.pod_cidr));

    if config.mtu > 0 {
        set(format!("mtu={}", config.mtu));
    }

    if config.enable_ebpf {
        set("bpf.masquerade=true".to_string());
        set(format!("kubeProxyReplacement={}", config.kube_proxy_replacement));
    }

    if config.enable_encryption {
        set("encryption.enabled=true".to_string());
        set("encryption.type=wireguard".to_string());
    }

    for (key, value) in &config.custom_values {
        set(format!("{}={}", key, value));
    }

    args
}

/// Cilium deployment manager
pub struct CiliumManager<'a> {
    kubectl: &'a Kubectl,
    helm: String,
}

impl<'a> CiliumManager<'a> {
    pub fn new(kubectl: &'a Kubectl) -> Self {
        Self::with_helm(kubectl, "helm")
    }

    /// Use a specific helm binary
    pub fn with_helm(kubectl: &'a Kubectl, helm: impl Into<String>) -> Self {
        Self {
            kubectl,
            helm: helm.into(),
        }
    }

    fn helm(&self) -> CommandBuilder {
        let helm = CommandBuilder::new(&self.helm);
        match self.kubectl.kubeconfig_path() {
            Some(path) => helm.kubeconfig(path),
            None => helm,
        }
    }

    /// Install Cilium CNI using Helm
    pub async fn install(&self, config: &NetworkConfig) -> Result<()> {
        info!("Installing Cilium network plugin...");

        self.ensure_helm().await?;
        self.add_helm_repo().await?;

        info!("Installing Cilium with Helm...");
        self.helm()
            .args(cilium_helm_args(config))
            .stream()
            .context("Failed to install Cilium")
            .run_silent()
            .await
    }

    /// Install helm with the upstream script when it is missing
    async fn ensure_helm(&self) -> Result<()> {
        if tool_available(&self.helm, &["version", "--short"]).await {
            return Ok(());
        }

        info!("Helm not found, installing...");
        CommandBuilder::shell(&format!("curl -fsSL {} | bash", HELM_INSTALL_SCRIPT))
            .stream()
            .context("Failed to install Helm")
            .run_silent()
            .await
    }

    /// Add the Cilium Helm repository and refresh indexes
    async fn add_helm_repo(&self) -> Result<()> {
        info!("Adding Cilium Helm repository...");

        let output = self
            .helm()
            .args(["repo", "add", "cilium", HELM_REPO_URL])
            .context("Failed to add Cilium Helm repo")
            .output()
            .await?;

        // Ignore "already exists" errors
        if !output.success && !output.stderr.contains("already exists") {
            anyhow::bail!("Failed to add Cilium Helm repo: {}", output.stderr.trim());
        }

        run_steps(vec![Step::warn(
            "Updating Helm repositories",
            self.helm().args(["repo", "update"]).run_silent(),
        )])
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::RecordingTool;

    const REPO_ADD_EXISTS: &str = r#"case "$1 $2" in
  "repo add") echo 'Error: repository name (cilium) already exists, please specify a different name' >&2; exit 1 ;;
esac"#;

    const REPO_ADD_UNREACHABLE: &str = r#"case "$1 $2" in
  "repo add") echo 'Error: looks like "https://helm.cilium.io/" is not a valid chart repository' >&2; exit 1 ;;
esac"#;

    fn set_values(args: &[String]) -> Vec<&str> {
        args.windows(2)
            .filter(|pair| pair[0] == "--set")
            .map(|pair| pair[1].as_str())
            .collect()
    }

    #[test]
    fn test_default_args() {
        let args = cilium_helm_args(&NetworkConfig::default());
        assert_eq!(
            &args[..5],
            ["install", "cilium", "cilium/cilium", "--namespace", "kube-system"]
        );
        assert_eq!(
            set_values(&args),
            ["ipam.operator.clusterPoolIPv4PodCIDR=10.244.0.0/16"]
        );
    }

    #[test]
    fn test_optional_args_in_order() {
        let mut config = NetworkConfig::default();
        config.mtu = 1450;
        config.enable_ebpf = true;
        config.enable_encryption = true;
        config
            .custom_values
            .insert("hubble.enabled".to_string(), "true".to_string());
        config
            .custom_values
            .insert("debug.enabled".to_string(), "false".to_string());

        assert_eq!(
            set_values(&cilium_helm_args(&config)),
            [
                "ipam.operator.clusterPoolIPv4PodCIDR=10.244.0.0/16",
                "mtu=1450",
                "bpf.masquerade=true",
                "kubeProxyReplacement=strict",
                "encryption.enabled=true",
                "encryption.type=wireguard",
                "debug.enabled=false",
                "hubble.enabled=true",
            ]
        );
    }

    #[tokio::test]
    async fn test_install_runs_helm_in_order() {
        let kubectl = Kubectl::with_program("true");
        let helm = RecordingTool::new();

        CiliumManager::with_helm(&kubectl, helm.program())
            .install(&NetworkConfig::default())
            .await
            .unwrap();

        assert_eq!(
            helm.calls(),
            [
                "version --short",
                "repo add cilium https://helm.cilium.io/",
                "repo update",
                "install cilium cilium/cilium --namespace kube-system \
                 --set ipam.operator.clusterPoolIPv4PodCIDR=10.244.0.0/16",
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_repo_is_tolerated() {
        let kubectl = Kubectl::with_program("true");
        let helm = RecordingTool::with_script(REPO_ADD_EXISTS);

        CiliumManager::with_helm(&kubectl, helm.program())
            .add_helm_repo()
            .await
            .unwrap();

        assert_eq!(
            helm.calls(),
            ["repo add cilium https://helm.cilium.io/", "repo update"]
        );
    }

    #[tokio::test]
    async fn test_other_repo_add_failure_is_fatal() {
        let kubectl = Kubectl::with_program("true");
        let helm = RecordingTool::with_script(REPO_ADD_UNREACHABLE);

        let err = CiliumManager::with_helm(&kubectl, helm.program())
            .add_helm_repo()
            .await
            .unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("Failed to add Cilium Helm repo"));
        assert!(message.contains("not a valid chart repository"));
        assert_eq!(helm.calls(), ["repo add cilium https://helm.cilium.io/"]);
    }
}
