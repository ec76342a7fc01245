/// Typed failures that callers need to tell apart
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KubeForgeError {
    #[error("failed to read release file {}: {source}", path.display())]
    ReleaseRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CIDR format: {0}, should be in format x.x.x.x/y")]
    InvalidCidr(String),

    #[error("unsupported network plugin: {0}")]
    UnsupportedPlugin(String),

    #[error("unsupported distribution for {0}")]
    UnsupportedDistribution(String),

    #[error("failed to start `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("timeout after {secs} seconds: {what}")]
    Timeout { what: String, secs: u64 },
}

impl KubeForgeError {
    /// True when `err` is (or wraps) a polling timeout
    pub fn is_timeout(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<KubeForgeError>(),
                Some(KubeForgeError::Timeout { .. })
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_timeout_detected_through_context() {
        let err: anyhow::Result<()> = Err(KubeForgeError::Timeout {
            what: "pods".to_string(),
            secs: 300,
        }
        .into());
        let wrapped = err.context("Waiting for Calico").unwrap_err();
        assert!(KubeForgeError::is_timeout(&wrapped));

        let other = anyhow::Error::from(KubeForgeError::InvalidCidr("10.0.0.0".into()));
        assert!(!KubeForgeError::is_timeout(&other));
    }
}
