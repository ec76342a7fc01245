/// Cluster bootstrap with kubeadm: init, join and join-command generation
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::kubeconfig::install_admin_kubeconfig;
use crate::config::ClusterConfig;
use crate::system::write_config;
use crate::templates::kubeadm_init_config;
use crate::utils::command::CommandBuilder;

pub const KUBEADM_CONFIG_PATH: &str = "/tmp/kubeadm-config.yaml";

/// Host name of this machine
pub fn hostname() -> Result<String> {
    let name = nix::unistd::gethostname().context("Failed to get hostname")?;
    name.into_string()
        .map_err(|raw| anyhow::anyhow!("Hostname is not valid UTF-8: {:?}", raw))
}

/// First address printed by `hostname -I`
pub fn first_address(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

/// Primary IP of this host, used as the default API server address
pub async fn default_advertise_address() -> Option<String> {
    let output = CommandBuilder::new("hostname").arg("-I").run().await.ok()?;
    first_address(&output)
}

/// Join command for an extra control plane node
pub fn control_plane_join_command(join_command: &str, certificate_key: &str) -> String {
    format!(
        "{} --control-plane --certificate-key {}",
        join_command.trim(),
        certificate_key
    )
}

/// Last non-empty line of `kubeadm init phase upload-certs` output
pub fn parse_certificate_key(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Initialize the first control plane node.
///
/// An empty `node_name` is replaced with the host name before rendering.
pub async fn init_control_plane(config: &mut ClusterConfig) -> Result<()> {
    info!("Initializing Kubernetes control plane node...");

    if config.node_name.is_empty() {
        config.node_name = hostname()?;
    }

    let kubeadm_config = kubeadm_init_config(config)?;
    write_config(Path::new(KUBEADM_CONFIG_PATH), &kubeadm_config)
        .await
        .context("Failed to write kubeadm config")?;

    CommandBuilder::new("kubeadm")
        .args(["init", "--config", KUBEADM_CONFIG_PATH, "--upload-certs"])
        .stream()
        .context("Failed to initialize control plane")
        .run_silent()
        .await?;

    install_admin_kubeconfig().await?;

    info!("✓ Control plane {} initialized", config.node_name);
    Ok(())
}

/// Run a worker join command produced by a control plane
pub async fn join_cluster(join_command: &str) -> Result<()> {
    info!("Joining the Kubernetes cluster as a worker node...");

    CommandBuilder::shell(join_command)
        .redact()
        .stream()
        .context("Failed to join the cluster")
        .run_silent()
        .await?;

    info!("✓ Joined the Kubernetes cluster");
    Ok(())
}

/// Join as an additional control plane node
pub async fn join_control_plane(join_command: &str, certificate_key: &str) -> Result<()> {
    info!("Joining the Kubernetes cluster as a control plane node...");

    CommandBuilder::shell(&control_plane_join_command(join_command, certificate_key))
        .redact()
        .stream()
        .context("Failed to join as control plane")
        .run_silent()
        .await?;

    info!("✓ Joined as an additional control plane node");
    Ok(())
}

/// Create a bootstrap token and return the worker join command
pub async fn generate_join_command() -> Result<String> {
    info!("Generating join command for worker nodes...");

    let output = CommandBuilder::new("kubeadm")
        .args(["token", "create", "--print-join-command"])
        .context("Failed to generate join command")
        .run()
        .await?;

    Ok(output.trim().to_string())
}

/// Re-upload control plane certificates and return the new decryption key
pub async fn certificate_key() -> Result<String> {
    let output = CommandBuilder::new("kubeadm")
        .args(["init", "phase", "upload-certs", "--upload-certs"])
        .context("Failed to upload control plane certificates")
        .run()
        .await?;

    parse_certificate_key(&output).context("kubeadm printed no certificate key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_address() {
        assert_eq!(
            first_address("10.0.0.5 172.17.0.1 fd00::5 \n"),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(first_address("  \n"), None);
    }

    #[test]
    fn test_control_plane_join_command() {
        let join = "kubeadm join 10.0.0.5:6443 --token abc.def --discovery-token-ca-cert-hash sha256:01\n";
        assert_eq!(
            control_plane_join_command(join, "f00d"),
            "kubeadm join 10.0.0.5:6443 --token abc.def --discovery-token-ca-cert-hash sha256:01 --control-plane --certificate-key f00d"
        );
    }

    #[test]
    fn test_parse_certificate_key() {
        let output = "[upload-certs] Storing the certificates in Secret \"kubeadm-certs\" in the \"kube-system\" Namespace\n[upload-certs] Using certificate key:\n3c2bd1d0e5a5\n\n";
        assert_eq!(parse_certificate_key(output), Some("3c2bd1d0e5a5".to_string()));
        assert_eq!(parse_certificate_key("\n"), None);
    }

    #[test]
    fn test_hostname_is_not_empty() {
        assert!(!hostname().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_failure_is_reported() {
        let err = join_cluster("exit 7").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to join the cluster"));
    }
}
