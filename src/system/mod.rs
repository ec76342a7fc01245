/// Host preparation: packages, swap, kernel modules and sysctl
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::distro::{DistroKind, Distribution};
use crate::templates::{MODULES_CONF, SYSCTL_CONF};
use crate::utils::command::CommandBuilder;
use crate::utils::steps::{run_steps, Step};

pub const FSTAB_PATH: &str = "/etc/fstab";
pub const MODULES_LOAD_PATH: &str = "/etc/modules-load.d/k8s.conf";
pub const SYSCTL_PATH: &str = "/etc/sysctl.d/k8s.conf";

const KERNEL_MODULES: [&str; 2] = ["overlay", "br_netfilter"];

/// True when the process runs with an effective UID of 0
pub fn check_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Packages required before any repository can be added
pub fn prerequisite_packages(kind: DistroKind) -> &'static [&'static str] {
    match kind {
        DistroKind::Debian => &[
            "apt-transport-https",
            "ca-certificates",
            "curl",
            "software-properties-common",
            "gnupg2",
        ],
        DistroKind::RedHat => &["yum-utils", "device-mapper-persistent-data", "lvm2", "curl"],
        DistroKind::Unknown => &[],
    }
}

/// Comment out every active fstab entry mentioning swap.
///
/// Line order and all other lines are preserved; already commented lines are
/// left alone, so the rewrite is idempotent.
pub fn comment_swap_entries(fstab: &str) -> String {
    fstab
        .split('\n')
        .map(|line| {
            if line.contains("swap") && !line.trim_start().starts_with('#') {
                format!("# {}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the OS-level preparation sequence
pub struct SystemPreparer<'a> {
    dist: &'a Distribution,
}

impl<'a> SystemPreparer<'a> {
    pub fn new(dist: &'a Distribution) -> Self {
        Self { dist }
    }

    /// Run every preparation step in order
    pub async fn prepare(&self) -> Result<()> {
        info!("Preparing host for Kubernetes...");

        run_steps(vec![
            Step::fatal("Updating system packages", self.update_system()),
            Step::fatal("Installing dependencies", self.install_dependencies()),
            Step::fatal("Disabling swap", disable_swap(Path::new(FSTAB_PATH))),
            Step::fatal("Configuring kernel modules", configure_kernel_modules()),
            Step::fatal("Configuring sysctl parameters", configure_sysctl()),
        ])
        .await?;

        info!("✓ Host prepared");
        Ok(())
    }

    /// Refresh the package index and upgrade installed packages
    pub async fn update_system(&self) -> Result<()> {
        match self.dist.kind {
            DistroKind::Debian => {
                CommandBuilder::new("apt-get")
                    .arg("update")
                    .context("Failed to update package index")
                    .run_silent()
                    .await?;
                CommandBuilder::new("apt-get")
                    .args(["upgrade", "-y"])
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .context("Failed to upgrade packages")
                    .run_silent()
                    .await
            }
            DistroKind::RedHat => {
                CommandBuilder::new("yum")
                    .args(["update", "-y"])
                    .context("Failed to update packages")
                    .run_silent()
                    .await
            }
            DistroKind::Unknown => {
                warn!("Unsupported distribution for automatic updates. Please update manually.");
                Ok(())
            }
        }
    }

    /// Install the prerequisite package list for this distribution
    pub async fn install_dependencies(&self) -> Result<()> {
        let packages = prerequisite_packages(self.dist.kind);
        let Some(manager) = self.dist.package_manager() else {
            warn!("Unsupported distribution for automatic dependency installation. Please install dependencies manually.");
            return Ok(());
        };

        let mut command = CommandBuilder::new(manager).args(["install", "-y"]).args(packages);
        if self.dist.is_debian() {
            command = command.env("DEBIAN_FRONTEND", "noninteractive");
        }

        command
            .context("Failed to install dependencies")
            .run_silent()
            .await
    }
}

/// Turn swap off now and keep it off across reboots
pub async fn disable_swap(fstab_path: &Path) -> Result<()> {
    CommandBuilder::new("swapoff")
        .arg("-a")
        .context("Failed to turn off swap")
        .run_silent()
        .await?;

    rewrite_fstab(fstab_path).await
}

async fn rewrite_fstab(fstab_path: &Path) -> Result<()> {
    let fstab = tokio::fs::read_to_string(fstab_path)
        .await
        .with_context(|| format!("Failed to read {}", fstab_path.display()))?;

    let rewritten = comment_swap_entries(&fstab);
    if rewritten != fstab {
        tokio::fs::write(fstab_path, rewritten)
            .await
            .with_context(|| format!("Failed to write {}", fstab_path.display()))?;
        info!("Commented out swap entries in {}", fstab_path.display());
    }

    Ok(())
}

/// Persist and load the kernel modules needed by container networking
pub async fn configure_kernel_modules() -> Result<()> {
    write_config(Path::new(MODULES_LOAD_PATH), MODULES_CONF).await?;

    // A missing module only produces a warning
    let steps = KERNEL_MODULES
        .iter()
        .map(|module| {
            Step::warn(
                format!("Loading kernel module {}", module),
                CommandBuilder::new("modprobe").arg(module).run_silent(),
            )
        })
        .collect();
    run_steps(steps).await?;

    Ok(())
}

/// Persist bridge netfilter and IP forwarding settings and apply them
pub async fn configure_sysctl() -> Result<()> {
    write_config(Path::new(SYSCTL_PATH), SYSCTL_CONF).await?;

    CommandBuilder::new("sysctl")
        .arg("--system")
        .context("Failed to apply sysctl parameters")
        .run_silent()
        .await
}

/// Write `contents` to `path`, creating the parent directory if absent
pub async fn write_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_swap_entries() {
        let input = "/dev/sda1 / ext4 defaults 0 1\n/swapfile swap swap defaults 0 0\n# already commented swap line";
        let output = comment_swap_entries(input);

        let lines: Vec<&str> = output.split('\n').collect();
        assert_eq!(lines[0], "/dev/sda1 / ext4 defaults 0 1");
        assert_eq!(lines[1], "# /swapfile swap swap defaults 0 0");
        assert_eq!(lines[2], "# already commented swap line");
        assert_eq!(comment_swap_entries(&output), output);
    }

    #[test]
    fn test_comment_swap_preserves_trailing_newline_and_indent() {
        let input = "UUID=abc / ext4 defaults 0 1\n  # swap was here\n\t/dev/sdb2 none swap sw 0 0\n";
        let output = comment_swap_entries(input);
        assert_eq!(
            output,
            "UUID=abc / ext4 defaults 0 1\n  # swap was here\n# \t/dev/sdb2 none swap sw 0 0\n"
        );
    }

    #[test]
    fn test_prerequisites_per_family() {
        assert!(prerequisite_packages(DistroKind::Debian).contains(&"gnupg2"));
        assert!(prerequisite_packages(DistroKind::RedHat).contains(&"lvm2"));
        assert!(prerequisite_packages(DistroKind::Unknown).is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_fstab_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        std::fs::write(&path, "/dev/sda1 / ext4 defaults 0 1\n/swap.img none swap sw 0 0\n").unwrap();

        rewrite_fstab(&path).await.unwrap();
        rewrite_fstab(&path).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "/dev/sda1 / ext4 defaults 0 1\n# /swap.img none swap sw 0 0\n"
        );
    }

    #[tokio::test]
    async fn test_write_config_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules-load.d").join("k8s.conf");

        write_config(&path, MODULES_CONF).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "overlay\nbr_netfilter\n");
    }
}
