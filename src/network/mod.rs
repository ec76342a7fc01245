/// Pod network (CNI) plugin installation and inspection
pub mod cilium;
pub mod connectivity;
pub mod readiness;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{validate_cidr, NetworkConfig, NetworkPlugin};
use crate::error::KubeForgeError;
use crate::k8s::{Kubectl, PodPhaseSource, ResourceManager, Submit};
use crate::templates::{calico_resources, flannel_manifest, CALICO_OPERATOR_URL, WEAVE_MANIFEST_URL};
use crate::utils::polling::PollingConfig;

pub use connectivity::check_connectivity;
pub use readiness::wait_for_pods_ready;

pub const CALICO_RESOURCES_PATH: &str = "/tmp/calico-custom-resources.yaml";
pub const FLANNEL_MANIFEST_PATH: &str = "/tmp/kube-flannel.yaml";

pub const POD_READY_TIMEOUT_SECS: u64 = 300;
pub const POD_READY_INTERVAL_SECS: u64 = 10;
/// Time the tigera operator gets before calico-node pods are expected
const CALICO_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Outcome of a plugin installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every plugin pod reported Running
    Ready,
    /// Pods were still not running when the poll timed out
    Pending,
}

/// Polling settings for a plugin's pods
pub fn plugin_polling(plugin: NetworkPlugin) -> PollingConfig {
    PollingConfig::new(
        POD_READY_TIMEOUT_SECS,
        POD_READY_INTERVAL_SECS,
        format!("Waiting for {} pods to be ready", plugin.display_name()),
    )
}

/// Wait for a plugin's pods, turning a timeout into `Readiness::Pending`
pub async fn await_plugin_pods<S>(
    source: &S,
    plugin: NetworkPlugin,
    polling: &PollingConfig,
) -> Result<Readiness>
where
    S: PodPhaseSource + ?Sized,
{
    match wait_for_pods_ready(source, plugin.selector(), polling).await {
        Ok(()) => {
            info!("✓ {} network plugin successfully installed", plugin.display_name());
            Ok(Readiness::Ready)
        }
        Err(e) if KubeForgeError::is_timeout(&e) => {
            warn!("Timed out waiting for {} pods: {:#}", plugin.display_name(), e);
            warn!("Installation may still be in progress");
            Ok(Readiness::Pending)
        }
        Err(e) => Err(e),
    }
}

/// First plugin with at least one pod in the cluster
pub async fn detect_current_plugin<S>(source: &S) -> Result<Option<NetworkPlugin>>
where
    S: PodPhaseSource + ?Sized,
{
    info!("Detecting current network plugin...");

    for plugin in NetworkPlugin::ALL {
        if !source.pod_phases(plugin.selector()).await?.is_empty() {
            return Ok(Some(plugin));
        }
    }

    Ok(None)
}

/// Tag of an image reference (`calico/node:v3.27.0` -> `v3.27.0`)
pub fn image_tag(image: &str) -> Option<&str> {
    let (_, tag) = image.trim().rsplit_once(':')?;
    (!tag.is_empty() && !tag.contains('/')).then_some(tag)
}

/// Installs the selected network plugin
pub struct NetworkInstaller<'a> {
    kubectl: &'a Kubectl,
}

impl<'a> NetworkInstaller<'a> {
    pub fn new(kubectl: &'a Kubectl) -> Self {
        Self { kubectl }
    }

    /// Install the configured plugin and wait for its pods.
    ///
    /// A readiness timeout is reported as `Readiness::Pending`, not an error.
    pub async fn install_plugin(&self, config: &NetworkConfig) -> Result<Readiness> {
        info!("Installing {} network plugin...", config.plugin);

        match config.plugin {
            NetworkPlugin::Calico => self.install_calico(config).await?,
            NetworkPlugin::Flannel => self.install_flannel(config).await?,
            NetworkPlugin::Weave => self.install_weave(config).await?,
            NetworkPlugin::Cilium => cilium::CiliumManager::new(self.kubectl).install(config).await?,
        }

        await_plugin_pods(self.kubectl, config.plugin, &plugin_polling(config.plugin)).await
    }

    async fn install_calico(&self, config: &NetworkConfig) -> Result<()> {
        validate_cidr(&config.pod_cidr)?;
        let resources = ResourceManager::new(self.kubectl);

        info!("Deploying Calico operator...");
        resources
            .submit(Submit::Create, CALICO_OPERATOR_URL)
            .await
            .context("Failed to install Tigera operator")?;

        info!("Applying Calico custom resources...");
        resources
            .submit_rendered(
                Submit::Create,
                Path::new(CALICO_RESOURCES_PATH),
                &calico_resources(config)?,
            )
            .await
            .context("Failed to apply Calico resources")?;

        tokio::time::sleep(CALICO_GRACE_PERIOD).await;
        Ok(())
    }

    async fn install_flannel(&self, config: &NetworkConfig) -> Result<()> {
        validate_cidr(&config.pod_cidr)?;

        info!("Applying Flannel configuration...");
        ResourceManager::new(self.kubectl)
            .submit_rendered(
                Submit::Apply,
                Path::new(FLANNEL_MANIFEST_PATH),
                &flannel_manifest(config)?,
            )
            .await
            .context("Failed to apply Flannel configuration")
    }

    async fn install_weave(&self, config: &NetworkConfig) -> Result<()> {
        let mut env = Vec::new();
        if !config.pod_cidr.is_empty() {
            validate_cidr(&config.pod_cidr)?;
            env.push(("IPALLOC_RANGE", config.pod_cidr.as_str()));
        }

        ResourceManager::new(self.kubectl)
            .submit_with_env(Submit::Apply, WEAVE_MANIFEST_URL, &env)
            .await
            .context("Failed to install Weave Net")
    }

    /// Image tag of the first calico-node pod
    pub async fn calico_version(&self) -> Result<String> {
        let image = self
            .kubectl
            .command()
            .args(["get", "pods", "-l", NetworkPlugin::Calico.selector(), "--all-namespaces"])
            .args(["-o", "jsonpath={.items[0].spec.containers[0].image}"])
            .context("Failed to get Calico version")
            .run()
            .await?;

        image_tag(&image)
            .map(str::to_string)
            .with_context(|| format!("Could not parse Calico version from image: {}", image.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::readiness::tests::ScriptedPods;
    use super::*;
    use crate::utils::testing::RecordingTool;

    const RECORD_IPALLOC: &str = r#"printf 'IPALLOC_RANGE=%s\n' "${IPALLOC_RANGE-unset}" >> "$LOG""#;

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("docker.io/calico/node:v3.27.0\n"), Some("v3.27.0"));
        assert_eq!(image_tag("registry:5000/calico/node"), None);
        assert_eq!(image_tag("calico/node"), None);
    }

    #[tokio::test]
    async fn test_detect_first_plugin_with_pods() {
        let kubectl = Kubectl::with_program("true");
        assert_eq!(detect_current_plugin(&kubectl).await.unwrap(), None);

        let source = ScriptedPods::new(&[&[], &["Running"], &["Running"]]);
        assert_eq!(
            detect_current_plugin(&source).await.unwrap(),
            Some(NetworkPlugin::Flannel)
        );
        let queries = source.queries.lock().unwrap();
        assert_eq!(*queries, ["k8s-app=calico-node", "app=flannel"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_pending_not_error() {
        let source = ScriptedPods::new(&[&["Pending"]]);
        let polling = plugin_polling(NetworkPlugin::Weave);

        let readiness = await_plugin_pods(&source, NetworkPlugin::Weave, &polling)
            .await
            .unwrap();
        assert_eq!(readiness, Readiness::Pending);
        assert!(source.queries.lock().unwrap().iter().all(|s| s == "name=weave-net"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_pods_are_ready() {
        let source = ScriptedPods::new(&[&["Pending", "Pending"], &["Running", "Running"]]);
        let readiness = await_plugin_pods(&source, NetworkPlugin::Calico, &plugin_polling(NetworkPlugin::Calico))
            .await
            .unwrap();
        assert_eq!(readiness, Readiness::Ready);
        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_cidr_rejected_before_kubectl() {
        let kubectl = Kubectl::with_program("kubeforge-missing-kubectl");
        let mut config = NetworkConfig::default();
        config.plugin = NetworkPlugin::Flannel;
        config.pod_cidr = "10.244.0.0".to_string();

        let err = NetworkInstaller::new(&kubectl)
            .install_plugin(&config)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KubeForgeError>(),
            Some(KubeForgeError::InvalidCidr(_))
        ));
    }

    #[tokio::test]
    async fn test_weave_passes_range_in_environment() {
        let kubectl_bin = RecordingTool::with_script(RECORD_IPALLOC);
        let kubectl = Kubectl::with_program(kubectl_bin.program());
        let mut config = NetworkConfig::default();
        config.pod_cidr = "10.32.0.0/12".to_string();

        NetworkInstaller::new(&kubectl)
            .install_weave(&config)
            .await
            .unwrap();

        assert_eq!(
            kubectl_bin.calls(),
            [
                format!("apply -f {}", WEAVE_MANIFEST_URL),
                "IPALLOC_RANGE=10.32.0.0/12".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_weave_without_cidr_skips_validation() {
        let kubectl_bin = RecordingTool::with_script(RECORD_IPALLOC);
        let kubectl = Kubectl::with_program(kubectl_bin.program());
        let mut config = NetworkConfig::default();
        config.pod_cidr = String::new();

        NetworkInstaller::new(&kubectl)
            .install_weave(&config)
            .await
            .unwrap();

        assert_eq!(kubectl_bin.calls()[1], "IPALLOC_RANGE=unset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_calico_creates_operator_then_resources() {
        let kubectl_bin = RecordingTool::new();
        let kubectl = Kubectl::with_program(kubectl_bin.program());
        let mut config = NetworkConfig::default();
        config.pod_cidr = "192.168.0.0/16".to_string();

        NetworkInstaller::new(&kubectl)
            .install_calico(&config)
            .await
            .unwrap();

        assert_eq!(
            kubectl_bin.calls(),
            [
                format!("create -f {}", CALICO_OPERATOR_URL),
                format!("create -f {}", CALICO_RESOURCES_PATH),
            ]
        );
        let resources = std::fs::read_to_string(CALICO_RESOURCES_PATH).unwrap();
        assert!(resources.contains("cidr: 192.168.0.0/16"));
    }

    #[tokio::test]
    async fn test_flannel_applies_rendered_manifest() {
        let kubectl_bin = RecordingTool::new();
        let kubectl = Kubectl::with_program(kubectl_bin.program());
        let mut config = NetworkConfig::default();
        config.plugin = NetworkPlugin::Flannel;

        NetworkInstaller::new(&kubectl)
            .install_flannel(&config)
            .await
            .unwrap();

        assert_eq!(
            kubectl_bin.calls(),
            [format!("apply -f {}", FLANNEL_MANIFEST_PATH)]
        );
    }
}
