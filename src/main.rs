/// KubeForge - Kubernetes node bootstrapper
///
/// Prepares a Debian or Red Hat family host, installs containerd and the
/// Kubernetes packages, and then initializes a control plane (with a pod
/// network plugin) or joins an existing cluster.
mod config;
mod container;
mod distro;
mod error;
mod k8s;
mod kubernetes;
mod network;
mod system;
mod templates;
mod ui;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{validate_cidr, ForgeConfig, NetworkConfig, NetworkPlugin};
use crate::container::ContainerdInstaller;
use crate::distro::Distribution;
use crate::k8s::{Kubectl, NodeManager};
use crate::kubernetes::kubeconfig::ADMIN_KUBECONFIG;
use crate::kubernetes::KubernetesInstaller;
use crate::network::{NetworkInstaller, Readiness};
use crate::system::SystemPreparer;
use crate::ui::Prompter;

#[derive(Parser)]
#[command(name = "kubeforge", version)]
#[command(about = "Bootstrap Kubernetes nodes with kubeadm", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "kubeforge.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Accept the default answer for every prompt
    #[arg(short = 'y', long, global = true)]
    non_interactive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare this host and set it up as a control plane or worker (default)
    Install,

    /// Join an existing cluster
    Join {
        /// Join command printed by the control plane
        #[arg(long = "command")]
        join_command: String,

        /// Join as an additional control plane node
        #[arg(long, requires = "certificate_key")]
        control_plane: bool,

        /// Certificate key from `kubeadm init phase upload-certs`
        #[arg(long)]
        certificate_key: Option<String>,
    },

    /// Print a fresh worker join command
    JoinCommand,

    /// Upgrade the control plane and local packages
    Upgrade {
        /// Target Kubernetes version, e.g. 1.29.3
        #[arg(long)]
        version: String,
    },

    /// Install the pod network plugin only
    Network {
        /// Plugin offered as the default choice (calico, flannel, weave, cilium)
        #[arg(long)]
        plugin: Option<NetworkPlugin>,
    },

    /// Test pod-to-pod connectivity
    Connectivity,

    /// Install the Kubernetes Dashboard
    Dashboard,

    /// Show nodes, pods and the detected network plugin
    Status,

    /// Apply labels from the configuration file to a node
    Label {
        #[arg(long)]
        node: String,
    },

    /// Apply taints from the configuration file to a node
    Taint {
        #[arg(long)]
        node: String,
    },

    /// Generate example configuration file
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kubeforge={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prompter = Prompter::new(!cli.non_interactive);

    // Execute command
    let result = match cli.command {
        None | Some(Commands::Install) => install(&cli, prompter).await,
        Some(Commands::Join {
            ref join_command,
            control_plane,
            ref certificate_key,
        }) => join(join_command, control_plane, certificate_key.as_deref()).await,
        Some(Commands::JoinCommand) => print_join_commands(false).await,
        Some(Commands::Upgrade { ref version }) => upgrade(&cli, version).await,
        Some(Commands::Network { plugin }) => network_only(&cli, plugin, prompter).await,
        Some(Commands::Connectivity) => {
            async { network::check_connectivity(&cluster_client().await?).await }.await
        }
        Some(Commands::Dashboard) => async { dashboard(&cluster_client().await?).await }.await,
        Some(Commands::Status) => async { status(&cluster_client().await?).await }.await,
        Some(Commands::Label { ref node }) => label(&cli, node).await,
        Some(Commands::Taint { ref node }) => taint(&cli, node).await,
        Some(Commands::Init) => init_config(&cli).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<ForgeConfig> {
    ForgeConfig::load_or_default(path).context("Failed to load configuration")
}

/// kubectl client for subcommands that talk to an existing cluster
async fn cluster_client() -> Result<Kubectl> {
    let kubectl = Kubectl::new();
    kubectl
        .check_installed()
        .await
        .context("kubectl is required")?;
    Ok(kubectl)
}

fn require_root() -> Result<()> {
    if !system::check_root() {
        anyhow::bail!("kubeforge must be run as root");
    }
    Ok(())
}

/// Full node setup
async fn install(cli: &Cli, prompter: Prompter) -> Result<()> {
    ui::print_banner();
    require_root()?;

    let mut config = load_config(&cli.config)?;

    let dist = Distribution::detect().context("Failed to detect distribution")?;
    info!(
        "Detected Linux distribution: {} {} ({})",
        dist.name, dist.version, dist.kind
    );

    SystemPreparer::new(&dist).prepare().await?;
    ContainerdInstaller::new(&dist).install().await?;
    KubernetesInstaller::new(&dist, config.packages.kubernetes_channel.as_str())
        .install()
        .await?;

    let control_plane = prompter.confirm(
        "Is this a control plane (master) node?",
        config.cluster.is_control_plane,
    )?;
    config.cluster.is_control_plane = control_plane;

    if control_plane {
        setup_control_plane(&mut config, prompter).await?;
    } else {
        setup_worker(prompter).await?;
    }

    info!("✓ Kubernetes installation completed successfully");
    Ok(())
}

async fn setup_control_plane(config: &mut ForgeConfig, prompter: Prompter) -> Result<()> {
    let cluster = &mut config.cluster;

    cluster.pod_cidr = prompter.input("Enter Pod Network CIDR", &cluster.pod_cidr)?;
    validate_cidr(&cluster.pod_cidr)?;
    cluster.service_cidr = prompter.input("Enter Service CIDR", &cluster.service_cidr)?;
    validate_cidr(&cluster.service_cidr)?;

    let default_address = if cluster.api_server_address.is_empty() {
        kubernetes::default_advertise_address()
            .await
            .unwrap_or_default()
    } else {
        cluster.api_server_address.clone()
    };
    cluster.api_server_address =
        prompter.input("Enter API Server Advertise Address", &default_address)?;
    cluster.cluster_name = prompter.input("Enter Cluster Name", &cluster.cluster_name)?;

    cluster.high_availability =
        prompter.confirm("Is this a high availability setup?", cluster.high_availability)?;
    if cluster.high_availability {
        let default_endpoint = cluster
            .control_plane_endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| format!("{}:6443", cluster.api_server_address));
        cluster.control_plane_endpoint = Some(prompter.input(
            "Enter control plane endpoint (DNS/IP:port)",
            &default_endpoint,
        )?);
    }

    kubernetes::init_control_plane(cluster).await?;

    let kubectl = Kubectl::new().with_kubeconfig(ADMIN_KUBECONFIG);
    apply_node_metadata(&kubectl, config).await?;

    config.network.pod_cidr = config.cluster.pod_cidr.clone();
    install_network(&kubectl, &mut config.network, prompter).await?;

    if prompter.confirm("Test network connectivity?", false)? {
        if let Err(e) = network::check_connectivity(&kubectl).await {
            warn!("Network connectivity test failed: {:#}", e);
            if !prompter.confirm("Continue despite network test failure?", false)? {
                return Err(e.context("Network connectivity test failed"));
            }
            info!("Continuing with installation...");
        }
    }

    if let Err(e) = print_join_commands(config.cluster.high_availability).await {
        error!("Failed to generate join command: {:#}", e);
    }

    if prompter.confirm("Do you want to install Kubernetes Dashboard?", false)? {
        if let Err(e) = dashboard(&kubectl).await {
            error!("Failed to install Kubernetes Dashboard: {:#}", e);
        }
    }

    if let Err(e) = status(&kubectl).await {
        warn!("Failed to check cluster status: {:#}", e);
    }

    info!("✓ Control plane node setup complete");
    info!("Install kubectl on your workstation and run: kubectl cluster-info");
    Ok(())
}

async fn setup_worker(prompter: Prompter) -> Result<()> {
    info!("Worker node setup completed.");
    info!("Now run the join command from the control plane node.");

    let join_command = prompter.input(
        "Enter the join command from the control plane node or press Enter to skip",
        "",
    )?;

    if join_command.is_empty() {
        info!("Join command skipped. Run the appropriate 'kubeadm join' command manually.");
        return Ok(());
    }

    kubernetes::join_cluster(&join_command).await
}

/// Labels and taints from the config file for the node just initialized
async fn apply_node_metadata(kubectl: &Kubectl, config: &ForgeConfig) -> Result<()> {
    let nodes = NodeManager::new(kubectl);
    let node = &config.cluster.node_name;
    nodes.label_node(node, &config.cluster.labels).await?;
    nodes.taint_node(node, &config.cluster.taints).await
}

/// Choose and install a network plugin unless one is already running
async fn install_network(
    kubectl: &Kubectl,
    network: &mut NetworkConfig,
    prompter: Prompter,
) -> Result<()> {
    if let Some(existing) = network::detect_current_plugin(kubectl).await? {
        info!("Detected existing network plugin: {}", existing);
        if !prompter.confirm(
            "Network plugin already installed. Proceed with reinstallation?",
            false,
        )? {
            info!("Skipping network plugin installation");
            return Ok(());
        }
        info!("Reinstalling network plugin...");
    }

    println!("Available network plugins:");
    for line in ui::plugin_menu() {
        println!("  {}", line);
    }

    let default_choice = NetworkPlugin::ALL
        .iter()
        .position(|p| *p == network.plugin)
        .map_or(1, |i| i + 1);
    let answer = prompter.input("Select network plugin (1-4)", &default_choice.to_string())?;
    network.plugin = ui::plugin_choice(&answer).unwrap_or_else(|| {
        ui::print_error("Invalid selection, defaulting to Calico");
        NetworkPlugin::Calico
    });

    if matches!(network.plugin, NetworkPlugin::Calico | NetworkPlugin::Cilium) {
        network.enable_encryption =
            prompter.confirm("Enable WireGuard encryption?", network.enable_encryption)?;
    }

    match NetworkInstaller::new(kubectl).install_plugin(network).await? {
        Readiness::Ready => ui::print_success(&format!(
            "{} network plugin is ready",
            network.plugin.display_name()
        )),
        Readiness::Pending => warn!(
            "{} pods are not running yet; check with: kubectl get pods -A -l {}",
            network.plugin.display_name(),
            network.plugin.selector()
        ),
    }

    Ok(())
}

async fn network_only(cli: &Cli, plugin: Option<NetworkPlugin>, prompter: Prompter) -> Result<()> {
    let mut config = load_config(&cli.config)?;
    if let Some(plugin) = plugin {
        config.network.plugin = plugin;
    }
    install_network(&cluster_client().await?, &mut config.network, prompter).await
}

async fn join(join_command: &str, control_plane: bool, certificate_key: Option<&str>) -> Result<()> {
    require_root()?;

    match (control_plane, certificate_key) {
        (true, Some(key)) => kubernetes::join_control_plane(join_command, key).await,
        _ => kubernetes::join_cluster(join_command).await,
    }
}

/// Print the worker join command, plus the control plane variant for HA
async fn print_join_commands(high_availability: bool) -> Result<()> {
    let join_command = kubernetes::generate_join_command().await?;
    ui::print_join_command("Worker node join command:", &join_command);

    if high_availability {
        let key = kubernetes::certificate_key().await?;
        ui::print_join_command(
            "Control plane join command:",
            &kubernetes::control_plane_join_command(&join_command, &key),
        );
    }

    ui::print_info("Save this command to run on your other nodes.");
    Ok(())
}

async fn upgrade(cli: &Cli, version: &str) -> Result<()> {
    require_root()?;

    let config = load_config(&cli.config)?;
    let dist = Distribution::detect().context("Failed to detect distribution")?;
    KubernetesInstaller::new(&dist, config.packages.kubernetes_channel.as_str())
        .upgrade(version)
        .await
}

async fn dashboard(kubectl: &Kubectl) -> Result<()> {
    let token = kubernetes::install_dashboard(kubectl).await?;
    ui::print_dashboard_access(token.as_deref(), kubernetes::DASHBOARD_PROXY_URL);
    Ok(())
}

async fn status(kubectl: &Kubectl) -> Result<()> {
    NodeManager::new(kubectl).cluster_status().await?;

    match network::detect_current_plugin(kubectl).await? {
        Some(NetworkPlugin::Calico) => {
            let version = NetworkInstaller::new(kubectl)
                .calico_version()
                .await
                .unwrap_or_else(|_| "unknown version".to_string());
            ui::print_info(&format!("Network plugin: Calico ({})", version));
        }
        Some(plugin) => ui::print_info(&format!("Network plugin: {}", plugin.display_name())),
        None => ui::print_info("Network plugin: none detected"),
    }

    Ok(())
}

async fn label(cli: &Cli, node: &str) -> Result<()> {
    let config = ForgeConfig::from_file(&cli.config).context("Failed to load configuration")?;
    NodeManager::new(&cluster_client().await?)
        .label_node(node, &config.cluster.labels)
        .await
}

async fn taint(cli: &Cli, node: &str) -> Result<()> {
    let config = ForgeConfig::from_file(&cli.config).context("Failed to load configuration")?;
    NodeManager::new(&cluster_client().await?)
        .taint_node(node, &config.cluster.taints)
        .await
}

/// Generate example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let yaml = serde_yaml::to_string(&ForgeConfig::example())?;
    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Run the installer as root:");
    info!("     sudo kubeforge install");

    Ok(())
}
