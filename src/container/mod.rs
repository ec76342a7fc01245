/// containerd installation and configuration
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::distro::{DistroKind, Distribution};
use crate::error::KubeForgeError;
use crate::system::write_config;
use crate::templates::docker_apt_source;
use crate::utils::command::CommandBuilder;

pub const CONTAINERD_CONFIG_DIR: &str = "/etc/containerd";
pub const CONTAINERD_CONFIG_PATH: &str = "/etc/containerd/config.toml";
const DOCKER_KEYRING: &str = "/usr/share/keyrings/docker-archive-keyring.gpg";
const DOCKER_APT_LIST: &str = "/etc/apt/sources.list.d/docker.list";

/// Switch runc to the systemd cgroup driver in a containerd config
pub fn enable_systemd_cgroup(config: &str) -> String {
    config.replace("SystemdCgroup = false", "SystemdCgroup = true")
}

/// Debian architecture name for the running binary's target
pub fn debian_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        "powerpc64" => "ppc64el",
        "s390x" => "s390x",
        other => other,
    }
}

/// Installs containerd from the Docker package repositories
pub struct ContainerdInstaller<'a> {
    dist: &'a Distribution,
}

impl<'a> ContainerdInstaller<'a> {
    pub fn new(dist: &'a Distribution) -> Self {
        Self { dist }
    }

    /// Install, configure and start containerd
    pub async fn install(&self) -> Result<()> {
        info!("Installing containerd...");

        match self.dist.kind {
            DistroKind::Debian => self.install_debian().await?,
            DistroKind::RedHat => self.install_redhat().await?,
            DistroKind::Unknown => {
                return Err(KubeForgeError::UnsupportedDistribution(format!(
                    "containerd installation: {}",
                    self.dist.name
                ))
                .into())
            }
        }

        self.configure().await?;
        self.restart().await?;

        info!("✓ containerd installed and running");
        Ok(())
    }

    async fn install_debian(&self) -> Result<()> {
        let distro = self.dist.name.to_lowercase();

        CommandBuilder::shell(&format!(
            "curl -fsSL https://download.docker.com/linux/{}/gpg | gpg --batch --yes --dearmor -o {}",
            distro, DOCKER_KEYRING
        ))
        .context("Failed to add Docker GPG key")
        .run_silent()
        .await?;

        let codename = CommandBuilder::new("lsb_release")
            .arg("-cs")
            .context("Failed to determine distribution codename")
            .run()
            .await?;

        write_config(
            Path::new(DOCKER_APT_LIST),
            &docker_apt_source(debian_arch(), DOCKER_KEYRING, &distro, codename.trim()),
        )
        .await?;

        CommandBuilder::new("apt-get")
            .arg("update")
            .context("Failed to update package index")
            .run_silent()
            .await?;

        CommandBuilder::new("apt-get")
            .args(["install", "-y", "containerd.io"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .context("Failed to install containerd.io")
            .run_silent()
            .await
    }

    async fn install_redhat(&self) -> Result<()> {
        let repo_url = format!(
            "https://download.docker.com/linux/{}/docker-ce.repo",
            self.dist.name
        );

        CommandBuilder::new("yum-config-manager")
            .arg("--add-repo")
            .arg(&repo_url)
            .context("Failed to add Docker repository")
            .run_silent()
            .await?;

        CommandBuilder::new("yum")
            .args(["install", "-y", "containerd.io"])
            .context("Failed to install containerd.io")
            .run_silent()
            .await
    }

    /// Generate the default config and switch it to the systemd cgroup driver
    async fn configure(&self) -> Result<()> {
        tokio::fs::create_dir_all(CONTAINERD_CONFIG_DIR)
            .await
            .context("Failed to create /etc/containerd")?;

        let defaults = CommandBuilder::new("containerd")
            .args(["config", "default"])
            .context("Failed to generate default containerd config")
            .run()
            .await?;

        write_config(
            Path::new(CONTAINERD_CONFIG_PATH),
            &enable_systemd_cgroup(&defaults),
        )
        .await
    }

    async fn restart(&self) -> Result<()> {
        CommandBuilder::new("systemctl")
            .args(["restart", "containerd"])
            .context("Failed to restart containerd")
            .run_silent()
            .await?;

        CommandBuilder::new("systemctl")
            .args(["enable", "containerd"])
            .context("Failed to enable containerd")
            .run_silent()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_systemd_cgroup() {
        let config = r#"
        [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc.options]
            BinaryName = ""
            SystemdCgroup = false
"#;
        let patched = enable_systemd_cgroup(config);
        assert!(patched.contains("            SystemdCgroup = true\n"));
        assert!(!patched.contains("SystemdCgroup = false"));
        assert_eq!(enable_systemd_cgroup(&patched), patched);
    }

    #[test]
    fn test_debian_arch_is_known_name() {
        let arch = debian_arch();
        assert!(!arch.is_empty());
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
    }

    #[tokio::test]
    async fn test_unknown_distribution_rejected() {
        let dist = Distribution::parse("ID=arch\n");
        let err = ContainerdInstaller::new(&dist).install().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KubeForgeError>(),
            Some(KubeForgeError::UnsupportedDistribution(_))
        ));
    }
}
