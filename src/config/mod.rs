/// Configuration management for KubeForge
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::KubeForgeError;

/// Everything a run can be configured with, loaded from an optional YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Cluster bootstrap parameters
    pub cluster: ClusterConfig,

    /// Pod network plugin parameters
    pub network: NetworkConfig,

    /// Package repository settings
    pub packages: PackageConfig,
}

/// Kubernetes cluster parameters rendered into the kubeadm init document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Pod network CIDR (e.g., "10.244.0.0/16")
    pub pod_cidr: String,

    /// Service network CIDR (e.g., "10.96.0.0/12")
    pub service_cidr: String,

    /// API server advertise address (defaults to the first host address)
    pub api_server_address: String,

    pub cluster_name: String,

    /// Pinned Kubernetes version; latest available when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    pub is_control_plane: bool,

    pub high_availability: bool,

    /// Shared endpoint for HA control planes (DNS/IP:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<String>,

    /// Node name (defaults to the hostname)
    pub node_name: String,

    pub labels: BTreeMap<String, String>,

    pub taints: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            pod_cidr: "10.244.0.0/16".to_string(),
            service_cidr: "10.96.0.0/12".to_string(),
            api_server_address: String::new(),
            cluster_name: "kubeforge-cluster".to_string(),
            kubernetes_version: None,
            is_control_plane: false,
            high_availability: false,
            control_plane_endpoint: None,
            node_name: String::new(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
        }
    }
}

/// Supported pod network plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlugin {
    Calico,
    Flannel,
    Weave,
    Cilium,
}

impl NetworkPlugin {
    pub const ALL: [NetworkPlugin; 4] = [
        NetworkPlugin::Calico,
        NetworkPlugin::Flannel,
        NetworkPlugin::Weave,
        NetworkPlugin::Cilium,
    ];

    /// Label selector matching the plugin's node agents
    pub fn selector(self) -> &'static str {
        match self {
            NetworkPlugin::Calico => "k8s-app=calico-node",
            NetworkPlugin::Flannel => "app=flannel",
            NetworkPlugin::Weave => "name=weave-net",
            NetworkPlugin::Cilium => "k8s-app=cilium",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            NetworkPlugin::Calico => "Calico",
            NetworkPlugin::Flannel => "Flannel",
            NetworkPlugin::Weave => "Weave",
            NetworkPlugin::Cilium => "Cilium",
        }
    }
}

impl fmt::Display for NetworkPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkPlugin::Calico => write!(f, "calico"),
            NetworkPlugin::Flannel => write!(f, "flannel"),
            NetworkPlugin::Weave => write!(f, "weave"),
            NetworkPlugin::Cilium => write!(f, "cilium"),
        }
    }
}

impl FromStr for NetworkPlugin {
    type Err = KubeForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calico" => Ok(NetworkPlugin::Calico),
            "flannel" => Ok(NetworkPlugin::Flannel),
            "weave" => Ok(NetworkPlugin::Weave),
            "cilium" => Ok(NetworkPlugin::Cilium),
            _ => Err(KubeForgeError::UnsupportedPlugin(s.to_string())),
        }
    }
}

/// Pod network plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub plugin: NetworkPlugin,

    pub pod_cidr: String,

    /// Interface MTU; 0 lets the plugin autodetect
    pub mtu: u32,

    /// Calico IP-in-IP mode (Always, CrossSubnet, Never)
    pub ipip_mode: String,

    /// Calico VXLAN mode (Always, CrossSubnet, Never)
    pub vxlan_mode: String,

    /// WireGuard encryption (Calico and Cilium)
    pub enable_encryption: bool,

    pub enable_nat_outgoing: bool,

    /// Calico IP pool block size
    pub block_size: u32,

    /// eBPF masquerading and kube-proxy replacement (Cilium)
    pub enable_ebpf: bool,

    pub kube_proxy_replacement: String,

    /// Extra values appended verbatim, rendered in key order
    pub custom_values: BTreeMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            plugin: NetworkPlugin::Calico,
            pod_cidr: "10.244.0.0/16".to_string(),
            mtu: 0,
            ipip_mode: "Always".to_string(),
            vxlan_mode: "CrossSubnet".to_string(),
            enable_encryption: false,
            enable_nat_outgoing: true,
            block_size: 26,
            enable_ebpf: false,
            kube_proxy_replacement: "strict".to_string(),
            custom_values: BTreeMap::new(),
        }
    }
}

/// Package repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// pkgs.k8s.io minor channel (e.g., "v1.29")
    pub kubernetes_channel: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            kubernetes_channel: "v1.29".to_string(),
        }
    }
}

/// Validate CIDR notation
pub fn validate_cidr(cidr: &str) -> Result<(), KubeForgeError> {
    if !cidr.contains('/') {
        return Err(KubeForgeError::InvalidCidr(cidr.to_string()));
    }
    Ok(())
}

impl ForgeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ForgeConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise fall back to the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster.cluster_name.is_empty() {
            anyhow::bail!("cluster.cluster_name cannot be empty");
        }

        validate_cidr(&self.cluster.pod_cidr)?;
        validate_cidr(&self.cluster.service_cidr)?;
        validate_cidr(&self.network.pod_cidr)?;

        Ok(())
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        let mut config = Self::default();
        config.cluster.is_control_plane = true;
        config
            .cluster
            .labels
            .insert("node-role.kubernetes.io/infra".to_string(), String::new());
        config
            .cluster
            .taints
            .push("dedicated=infra:NoSchedule".to_string());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_validation() {
        let mut config = ForgeConfig::example();
        assert!(config.validate().is_ok());

        config.cluster.cluster_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cidr_validation() {
        assert!(validate_cidr("10.244.0.0/16").is_ok());
        assert!(matches!(
            validate_cidr("10.244.0.0"),
            Err(KubeForgeError::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_plugin_parsing() {
        assert_eq!("Cilium".parse::<NetworkPlugin>().unwrap(), NetworkPlugin::Cilium);
        assert_eq!(" weave ".parse::<NetworkPlugin>().unwrap(), NetworkPlugin::Weave);
        assert!(matches!(
            "canal".parse::<NetworkPlugin>(),
            Err(KubeForgeError::UnsupportedPlugin(_))
        ));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "cluster:\n  cluster_name: lab\nnetwork:\n  plugin: flannel\n  mtu: 1450\n"
        )
        .unwrap();

        let config = ForgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster.cluster_name, "lab");
        assert_eq!(config.cluster.service_cidr, "10.96.0.0/12");
        assert_eq!(config.network.plugin, NetworkPlugin::Flannel);
        assert_eq!(config.network.mtu, 1450);
        assert_eq!(config.network.block_size, 26);
        assert_eq!(config.packages.kubernetes_channel, "v1.29");
    }

    #[test]
    fn test_invalid_cidr_in_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network:\n  pod_cidr: 10.244.0.0\n").unwrap();
        assert!(ForgeConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeConfig::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.network.plugin, NetworkPlugin::Calico);
        assert_eq!(config.network.kube_proxy_replacement, "strict");
    }

    #[test]
    fn test_example_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&ForgeConfig::example()).unwrap();
        let parsed: ForgeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed.cluster.is_control_plane);
        assert_eq!(parsed.cluster.taints, vec!["dedicated=infra:NoSchedule"]);
    }
}
