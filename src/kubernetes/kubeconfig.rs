/// Admin kubeconfig installation for the invoking users
use anyhow::{Context, Result};
use nix::unistd::{getgid, getuid, User};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::utils::command::CommandBuilder;

pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// Copy `source` to `<home>/.kube/config`, creating `.kube` if needed
pub async fn copy_admin_kubeconfig(source: &Path, home: &Path) -> Result<PathBuf> {
    let kube_dir = home.join(".kube");
    tokio::fs::create_dir_all(&kube_dir)
        .await
        .with_context(|| format!("Failed to create {}", kube_dir.display()))?;

    let target = kube_dir.join("config");
    tokio::fs::copy(source, &target)
        .await
        .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;

    Ok(target)
}

/// Set up kubectl access for the current user and, under sudo, for `SUDO_USER`
pub async fn install_admin_kubeconfig() -> Result<()> {
    info!("Setting up kubectl configuration...");

    let home = dirs::home_dir().context("Failed to determine home directory")?;
    let target = copy_admin_kubeconfig(Path::new(ADMIN_KUBECONFIG), &home).await?;

    let owner = format!("{}:{}", getuid(), getgid());
    if let Err(e) = CommandBuilder::new("chown")
        .arg(&owner)
        .arg(&target)
        .run_silent()
        .await
    {
        warn!("Failed to set ownership on kubectl config: {:#}", e);
    }

    if let Some(user) = std::env::var("SUDO_USER").ok().filter(|u| !u.is_empty()) {
        if let Err(e) = install_for_user(&user).await {
            warn!("Failed to set up kubectl for user {}: {:#}", user, e);
        }
    }

    Ok(())
}

/// Copy the admin kubeconfig into another user's home and hand it over
pub async fn install_for_user(username: &str) -> Result<()> {
    info!("Setting up kubectl for user {}", username);

    let user = User::from_name(username)
        .with_context(|| format!("Failed to look up user {}", username))?
        .with_context(|| format!("User {} does not exist", username))?;

    let target = copy_admin_kubeconfig(Path::new(ADMIN_KUBECONFIG), &user.dir).await?;
    let kube_dir = target.parent().unwrap_or(&user.dir);

    CommandBuilder::new("chown")
        .arg("-R")
        .arg(format!("{}:{}", user.uid, user.gid))
        .arg(kube_dir)
        .context(format!("Failed to set ownership for user {}", username))
        .run_silent()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_creates_kube_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("admin.conf");
        std::fs::write(&source, "apiVersion: v1\nkind: Config\n").unwrap();
        let home = dir.path().join("home");

        let target = copy_admin_kubeconfig(&source, &home).await.unwrap();
        assert_eq!(target, home.join(".kube").join("config"));
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "apiVersion: v1\nkind: Config\n"
        );

        // A second run overwrites the existing copy
        std::fs::write(&source, "kind: Config\n").unwrap();
        copy_admin_kubeconfig(&source, &home).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "kind: Config\n");
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = copy_admin_kubeconfig(&dir.path().join("missing.conf"), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to copy"));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let err = install_for_user("kubeforge-no-such-user").await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
