/// Pure rendering of manifests and config files from configuration values
use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::json;

use crate::config::{ClusterConfig, NetworkConfig};

pub const CALICO_OPERATOR_URL: &str =
    "https://raw.githubusercontent.com/projectcalico/calico/v3.27.0/manifests/tigera-operator.yaml";
pub const WEAVE_MANIFEST_URL: &str =
    "https://github.com/weaveworks/weave/releases/download/v2.8.1/weave-daemonset-k8s-1.11.yaml";
pub const DASHBOARD_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/kubernetes/dashboard/v2.7.0/aio/deploy/recommended.yaml";

pub const MODULES_CONF: &str = "overlay\nbr_netfilter\n";

pub const SYSCTL_CONF: &str = "net.bridge.bridge-nf-call-iptables  = 1
net.bridge.bridge-nf-call-ip6tables = 1
net.ipv4.ip_forward                 = 1
";

const CALICO_RESOURCES: &str = "apiVersion: operator.tigera.io/v1
kind: Installation
metadata:
  name: default
spec:
  calicoNetwork:
    ipPools:
    - blockSize: {{block_size}}
      cidr: {{cidr}}
      encapsulation: {{encapsulation}}
      natOutgoing: {{nat_outgoing}}
      nodeSelector: all()
{{#if mtu}}    mtu: {{mtu}}
{{/if}}{{#if encryption}}    ipipMode: Always
    encryption: WireGuard
{{/if}}{{#each custom_values}}    {{@key}}: {{this}}
{{/each}}";

const FLANNEL_MANIFEST: &str = r#"apiVersion: v1
kind: Namespace
metadata:
  name: kube-flannel
  labels:
    pod-security.kubernetes.io/enforce: privileged
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: flannel
  namespace: kube-flannel
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: flannel
rules:
- apiGroups:
  - ""
  resources:
  - pods
  verbs:
  - get
- apiGroups:
  - ""
  resources:
  - nodes
  verbs:
  - list
  - watch
- apiGroups:
  - ""
  resources:
  - nodes/status
  verbs:
  - patch
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: flannel
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: flannel
subjects:
- kind: ServiceAccount
  name: flannel
  namespace: kube-flannel
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: kube-flannel-cfg
  namespace: kube-flannel
data:
  cni-conf.json: |
    {
      "name": "cbr0",
      "cniVersion": "0.3.1",
      "plugins": [
        {
          "type": "flannel",
          "delegate": {
            "hairpinMode": true,
            "isDefaultGateway": true
          }
        },
        {
          "type": "portmap",
          "capabilities": {
            "portMappings": true
          }
        }
      ]
    }
  net-conf.json: |
    {
      "Network": "{{pod_cidr}}",
      "Backend": {
        "Type": "vxlan"
      }
    }
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: kube-flannel-ds
  namespace: kube-flannel
spec:
  selector:
    matchLabels:
      app: flannel
  template:
    metadata:
      labels:
        app: flannel
    spec:
      serviceAccountName: flannel
      containers:
      - name: kube-flannel
        image: docker.io/flannel/flannel:v0.21.4
        command:
        - /opt/bin/flanneld
        args:
        - --ip-masq
        - --kube-subnet-mgr
{{#if mtu}}        - --iface-mtu={{mtu}}
{{/if}}        resources:
          limits:
            cpu: 100m
            memory: 50Mi
          requests:
            cpu: 100m
            memory: 50Mi
        securityContext:
          privileged: true
        volumeMounts:
        - name: run
          mountPath: /run/flannel
        - name: flannel-cfg
          mountPath: /etc/kube-flannel/
      volumes:
        - name: run
          hostPath:
            path: /run/flannel
        - name: flannel-cfg
          configMap:
            name: kube-flannel-cfg
      hostNetwork: true
      tolerations:
      - operator: Exists
      nodeSelector:
        kubernetes.io/os: linux
"#;

const KUBEADM_INIT: &str = "apiVersion: kubeadm.k8s.io/v1beta3
kind: InitConfiguration
nodeRegistration:
  name: {{node_name}}
  taints: []
localAPIEndpoint:
  advertiseAddress: {{advertise_address}}
  bindPort: 6443
---
apiVersion: kubeadm.k8s.io/v1beta3
kind: ClusterConfiguration
clusterName: {{cluster_name}}
networking:
  podSubnet: {{pod_cidr}}
  serviceSubnet: {{service_cidr}}
{{#if control_plane_endpoint}}controlPlaneEndpoint: {{control_plane_endpoint}}
{{/if}}{{#if kubernetes_version}}kubernetesVersion: {{kubernetes_version}}
{{/if}}";

const KUBERNETES_YUM_REPO: &str = "[kubernetes]
name=Kubernetes
baseurl=https://pkgs.k8s.io/core:/stable:/{{channel}}/rpm/
enabled=1
gpgcheck=1
gpgkey=https://pkgs.k8s.io/core:/stable:/{{channel}}/rpm/repodata/repomd.xml.key
exclude=kubelet kubeadm kubectl cri-tools kubernetes-cni
";

const TEST_POD: &str = "apiVersion: v1
kind: Pod
metadata:
  name: {{name}}
  namespace: {{namespace}}
  labels:
    app: network-test
spec:
  containers:
  - name: network-test
    image: busybox:stable
    command: ['sh', '-c', 'sleep 3600']
";

pub const DASHBOARD_ADMIN_USER: &str = "apiVersion: v1
kind: ServiceAccount
metadata:
  name: admin-user
  namespace: kubernetes-dashboard
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: admin-user
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: cluster-admin
subjects:
- kind: ServiceAccount
  name: admin-user
  namespace: kubernetes-dashboard
";

fn render(template: &str, data: &serde_json::Value) -> Result<String> {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.render_template(template, data)
        .context("Failed to render template")
}

/// Calico pool encapsulation. VXLAN takes precedence over IP-in-IP.
pub fn calico_encapsulation(ipip_mode: &str, vxlan_mode: &str) -> String {
    if vxlan_mode != "Never" {
        format!("VXLAN{}", vxlan_mode)
    } else if ipip_mode == "Never" {
        "None".to_string()
    } else {
        "IPIP".to_string()
    }
}

/// Calico operator `Installation` resource
pub fn calico_resources(config: &NetworkConfig) -> Result<String> {
    let nat_outgoing = if config.enable_nat_outgoing {
        "Enabled"
    } else {
        "Disabled"
    };

    render(
        CALICO_RESOURCES,
        &json!({
            "block_size": config.block_size,
            "cidr": config.pod_cidr,
            "encapsulation": calico_encapsulation(&config.ipip_mode, &config.vxlan_mode),
            "nat_outgoing": nat_outgoing,
            "mtu": (config.mtu > 0).then_some(config.mtu),
            "encryption": config.enable_encryption,
            "custom_values": config.custom_values,
        }),
    )
}

/// Flannel namespace, RBAC, config map and DaemonSet
pub fn flannel_manifest(config: &NetworkConfig) -> Result<String> {
    render(
        FLANNEL_MANIFEST,
        &json!({
            "pod_cidr": config.pod_cidr,
            "mtu": (config.mtu > 0).then_some(config.mtu),
        }),
    )
}

/// kubeadm `InitConfiguration` + `ClusterConfiguration` for a first control plane
pub fn kubeadm_init_config(config: &ClusterConfig) -> Result<String> {
    let endpoint = config
        .control_plane_endpoint
        .as_deref()
        .filter(|e| config.high_availability && !e.is_empty());
    let version = config
        .kubernetes_version
        .as_deref()
        .filter(|v| !v.is_empty());

    render(
        KUBEADM_INIT,
        &json!({
            "node_name": config.node_name,
            "advertise_address": config.api_server_address,
            "cluster_name": config.cluster_name,
            "pod_cidr": config.pod_cidr,
            "service_cidr": config.service_cidr,
            "control_plane_endpoint": endpoint,
            "kubernetes_version": version,
        }),
    )
}

pub fn kubernetes_yum_repo(channel: &str) -> Result<String> {
    render(KUBERNETES_YUM_REPO, &json!({ "channel": channel }))
}

pub fn kubernetes_apt_source(channel: &str, keyring: &str) -> String {
    format!(
        "deb [signed-by={}] https://pkgs.k8s.io/core:/stable:/{}/deb/ /\n",
        keyring, channel
    )
}

pub fn docker_apt_source(arch: &str, keyring: &str, distro: &str, codename: &str) -> String {
    format!(
        "deb [arch={} signed-by={}] https://download.docker.com/linux/{} {} stable\n",
        arch, keyring, distro, codename
    )
}

/// Busybox pod used by the connectivity test
pub fn test_pod(name: &str, namespace: &str) -> Result<String> {
    render(TEST_POD, &json!({ "name": name, "namespace": namespace }))
}
