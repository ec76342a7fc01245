/// Kubernetes node installation and cluster lifecycle
pub mod cluster;
pub mod dashboard;
pub mod kubeconfig;
pub mod packages;

pub use cluster::{
    certificate_key, control_plane_join_command, default_advertise_address,
    generate_join_command, init_control_plane, join_cluster, join_control_plane,
};
pub use dashboard::{install_dashboard, DASHBOARD_PROXY_URL};
pub use packages::KubernetesInstaller;
