/// Linux distribution detection from os-release
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::error::KubeForgeError;

pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Distribution family, which decides package manager and repository layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroKind {
    Debian,
    RedHat,
    Unknown,
}

impl fmt::Display for DistroKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistroKind::Debian => write!(f, "debian"),
            DistroKind::RedHat => write!(f, "redhat"),
            DistroKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Details about the host distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub kind: DistroKind,
    pub name: String,
    pub version: String,
}

impl Distribution {
    /// Detect the host distribution from `/etc/os-release`
    pub fn detect() -> Result<Self, KubeForgeError> {
        Self::detect_from(OS_RELEASE_PATH)
    }

    pub fn detect_from<P: AsRef<Path>>(path: P) -> Result<Self, KubeForgeError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|source| KubeForgeError::ReleaseRead {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("os-release contents:\n{}", body);
        Ok(Self::parse(&body))
    }

    /// Classify an os-release body. Unrecognised IDs yield `Unknown`.
    pub fn parse(body: &str) -> Self {
        let name = release_value(body, "ID").unwrap_or_default();
        let version = release_value(body, "VERSION_ID").unwrap_or_default();

        let kind = match name.as_str() {
            "ubuntu" | "debian" => DistroKind::Debian,
            "centos" | "rhel" | "fedora" => DistroKind::RedHat,
            _ => DistroKind::Unknown,
        };

        Self {
            kind,
            name,
            version,
        }
    }

    pub fn is_debian(&self) -> bool {
        self.kind == DistroKind::Debian
    }

    /// Leading numeric component of the version ("8.6" -> 8)
    pub fn major_version(&self) -> Option<u32> {
        let digits: String = self
            .version
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    pub fn package_manager(&self) -> Option<&'static str> {
        match self.kind {
            DistroKind::Debian => Some("apt-get"),
            DistroKind::RedHat => Some("yum"),
            DistroKind::Unknown => None,
        }
    }
}

/// Value of `key` in an os-release body with surrounding quotes removed
fn release_value(body: &str, key: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        (k == key).then(|| v.trim().trim_matches('"').trim_matches('\'').to_string())
    })
}
