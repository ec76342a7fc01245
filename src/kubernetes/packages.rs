/// kubelet, kubeadm and kubectl package installation and upgrades
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::distro::{DistroKind, Distribution};
use crate::error::KubeForgeError;
use crate::system::write_config;
use crate::templates::{kubernetes_apt_source, kubernetes_yum_repo};
use crate::utils::command::CommandBuilder;
use crate::utils::steps::{run_steps, Step};

pub const APT_KEYRING_DIR: &str = "/etc/apt/keyrings";
pub const APT_KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
pub const APT_LIST: &str = "/etc/apt/sources.list.d/kubernetes.list";
pub const YUM_REPO: &str = "/etc/yum.repos.d/kubernetes.repo";
pub const SELINUX_CONFIG: &str = "/etc/selinux/config";
const BRIDGE_NF_CALL_IPTABLES: &str = "/proc/sys/net/bridge/bridge-nf-call-iptables";

const PACKAGES: [&str; 3] = ["kubelet", "kubeadm", "kubectl"];

/// Switch an enforcing SELinux config to permissive
pub fn permissive_selinux(config: &str) -> String {
    config
        .split('\n')
        .map(|line| {
            if line == "SELINUX=enforcing" {
                "SELINUX=permissive"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Package spec pinned to an upstream release, e.g. `kubeadm=1.29.2-*`
pub fn pinned_package(kind: DistroKind, package: &str, version: &str) -> String {
    let version = version.trim_start_matches('v');
    match kind {
        DistroKind::RedHat => format!("{}-{}-*", package, version),
        _ => format!("{}={}-*", package, version),
    }
}

/// Version string as kubeadm expects it (`v1.29.2`)
pub fn kubeadm_version(version: &str) -> String {
    format!("v{}", version.trim_start_matches('v'))
}

/// Installs and upgrades the Kubernetes node packages
pub struct KubernetesInstaller<'a> {
    dist: &'a Distribution,
    channel: String,
}

impl<'a> KubernetesInstaller<'a> {
    /// `channel` is the pkgs.k8s.io minor release stream, e.g. `v1.29`
    pub fn new(dist: &'a Distribution, channel: impl Into<String>) -> Self {
        Self {
            dist,
            channel: channel.into(),
        }
    }

    /// Install kubelet, kubeadm and kubectl and start kubelet
    pub async fn install(&self) -> Result<()> {
        info!("Installing Kubernetes components ({})...", self.channel);

        match self.dist.kind {
            DistroKind::Debian => self.install_debian().await?,
            DistroKind::RedHat => self.install_redhat().await?,
            DistroKind::Unknown => {
                return Err(KubeForgeError::UnsupportedDistribution(format!(
                    "Kubernetes installation: {}",
                    self.dist.name
                ))
                .into())
            }
        }

        run_steps(vec![
            Step::fatal(
                "Enabling kubelet",
                systemctl(&["enable", "kubelet"]),
            ),
            Step::fatal("Starting kubelet", systemctl(&["start", "kubelet"])),
        ])
        .await?;

        info!("✓ Kubernetes components installed");
        Ok(())
    }

    async fn install_debian(&self) -> Result<()> {
        tokio::fs::create_dir_all(APT_KEYRING_DIR)
            .await
            .with_context(|| format!("Failed to create {}", APT_KEYRING_DIR))?;

        CommandBuilder::shell(&format!(
            "curl -fsSL https://pkgs.k8s.io/core:/stable:/{}/deb/Release.key | gpg --batch --yes --dearmor -o {}",
            self.channel, APT_KEYRING
        ))
        .context("Failed to add Kubernetes GPG key")
        .run_silent()
        .await?;

        write_config(
            Path::new(APT_LIST),
            &kubernetes_apt_source(&self.channel, APT_KEYRING),
        )
        .await?;

        CommandBuilder::new("apt-get")
            .arg("update")
            .context("Failed to update package index")
            .run_silent()
            .await?;

        CommandBuilder::new("apt-get")
            .args(["install", "-y"])
            .args(PACKAGES)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .context("Failed to install Kubernetes packages")
            .run_silent()
            .await?;

        CommandBuilder::new("apt-mark")
            .arg("hold")
            .args(PACKAGES)
            .context("Failed to hold Kubernetes packages")
            .run_silent()
            .await
    }

    async fn install_redhat(&self) -> Result<()> {
        write_config(Path::new(YUM_REPO), &kubernetes_yum_repo(&self.channel)?).await?;

        CommandBuilder::new("yum")
            .args(["install", "-y"])
            .args(PACKAGES)
            .arg("--disableexcludes=kubernetes")
            .context("Failed to install Kubernetes packages")
            .run_silent()
            .await?;

        // Failures below only warn
        let mut steps = vec![
            Step::warn(
                "Setting SELinux to permissive",
                CommandBuilder::new("setenforce").arg("0").run_silent(),
            ),
            Step::warn("Persisting permissive SELinux", persist_permissive_selinux()),
        ];

        let enterprise = matches!(self.dist.name.as_str(), "rhel" | "centos");
        if enterprise {
            steps.push(Step::warn(
                "Loading br_netfilter",
                CommandBuilder::new("modprobe").arg("br_netfilter").run_silent(),
            ));
            steps.push(Step::warn("Enabling bridge netfilter", enable_bridge_netfilter()));
        }
        if enterprise && self.dist.major_version().is_some_and(|v| v >= 8) {
            for table in ["iptables", "ip6tables"] {
                steps.push(Step::warn(
                    format!("Selecting legacy {}", table),
                    CommandBuilder::new("alternatives")
                        .args(["--set", table])
                        .arg(format!("/usr/sbin/{}-legacy", table))
                        .run_silent(),
                ));
            }
        }

        run_steps(steps).await?;
        Ok(())
    }

    /// Upgrade the control plane and node packages to `version`
    pub async fn upgrade(&self, version: &str) -> Result<()> {
        info!("Upgrading Kubernetes cluster to version {}", version);

        let kind = self.dist.kind;
        let manager = self.dist.package_manager().ok_or_else(|| {
            KubeForgeError::UnsupportedDistribution(format!("Kubernetes upgrade: {}", self.dist.name))
        })?;
        let target = kubeadm_version(version);

        run_steps(vec![
            Step::fatal("Refreshing package index", refresh_index(kind)),
            Step::fatal(
                "Upgrading kubeadm",
                upgrade_packages(manager, kind, &["kubeadm"], version),
            ),
            Step::fatal(
                "Planning control plane upgrade",
                CommandBuilder::new("kubeadm")
                    .args(["upgrade", "plan", target.as_str()])
                    .stream()
                    .run_silent(),
            ),
            Step::fatal(
                "Applying control plane upgrade",
                CommandBuilder::new("kubeadm")
                    .args(["upgrade", "apply", target.as_str(), "-y"])
                    .stream()
                    .run_silent(),
            ),
            Step::fatal(
                "Upgrading kubelet and kubectl",
                upgrade_packages(manager, kind, &["kubelet", "kubectl"], version),
            ),
            Step::fatal("Reloading systemd units", systemctl(&["daemon-reload"])),
            Step::fatal("Restarting kubelet", systemctl(&["restart", "kubelet"])),
        ])
        .await?;

        info!("✓ Kubernetes control plane upgraded to {}", target);
        info!("Remember to upgrade all worker nodes too!");
        Ok(())
    }
}

async fn systemctl(args: &[&str]) -> Result<()> {
    CommandBuilder::new("systemctl")
        .args(args)
        .context(format!("Failed to run systemctl {}", args.join(" ")))
        .run_silent()
        .await
}

async fn refresh_index(kind: DistroKind) -> Result<()> {
    match kind {
        DistroKind::Debian => {
            CommandBuilder::new("apt-get")
                .arg("update")
                .run_silent()
                .await
        }
        _ => {
            CommandBuilder::new("yum")
                .args(["makecache", "--disableexcludes=kubernetes"])
                .run_silent()
                .await
        }
    }
}

async fn upgrade_packages(
    manager: &str,
    kind: DistroKind,
    packages: &[&str],
    version: &str,
) -> Result<()> {
    let mut command = CommandBuilder::new(manager).args(["install", "-y"]);
    command = match kind {
        DistroKind::Debian => command
            .arg("--allow-change-held-packages")
            .env("DEBIAN_FRONTEND", "noninteractive"),
        _ => command.arg("--disableexcludes=kubernetes"),
    };

    command
        .args(packages.iter().map(|p| pinned_package(kind, p, version)))
        .run_silent()
        .await
}

async fn persist_permissive_selinux() -> Result<()> {
    let path = Path::new(SELINUX_CONFIG);
    if !path.exists() {
        return Ok(());
    }

    let config = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", SELINUX_CONFIG))?;
    tokio::fs::write(path, permissive_selinux(&config))
        .await
        .with_context(|| format!("Failed to write {}", SELINUX_CONFIG))
}

async fn enable_bridge_netfilter() -> Result<()> {
    tokio::fs::write(BRIDGE_NF_CALL_IPTABLES, "1")
        .await
        .with_context(|| format!("Failed to write {}", BRIDGE_NF_CALL_IPTABLES))
}
