/// Pod readiness polling by label selector
use anyhow::Result;

use crate::k8s::PodPhaseSource;
use crate::utils::polling::PollingConfig;

/// True when at least one pod exists and every pod is `Running`
pub fn all_running(phases: &[String]) -> bool {
    !phases.is_empty() && phases.iter().all(|phase| phase == "Running")
}

/// Poll `source` until every pod matching `selector` is running.
///
/// Returns a `Timeout` error once `polling.timeout` has elapsed.
pub async fn wait_for_pods_ready<S>(source: &S, selector: &str, polling: &PollingConfig) -> Result<()>
where
    S: PodPhaseSource + ?Sized,
{
    polling
        .poll_until(|| async move {
            let phases = source.pod_phases(selector).await?;
            Ok::<_, anyhow::Error>(all_running(&phases))
        })
        .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::KubeForgeError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed sequence of samples, repeating the last one
    pub(crate) struct ScriptedPods {
        samples: Mutex<Vec<Vec<String>>>,
        pub(crate) queries: Mutex<Vec<String>>,
    }

    impl ScriptedPods {
        pub(crate) fn new(samples: &[&[&str]]) -> Self {
            let samples = samples
                .iter()
                .rev()
                .map(|s| s.iter().map(|p| p.to_string()).collect())
                .collect();
            Self {
                samples: Mutex::new(samples),
                queries: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PodPhaseSource for ScriptedPods {
        async fn pod_phases(&self, selector: &str) -> Result<Vec<String>> {
            self.queries.lock().unwrap().push(selector.to_string());
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                Ok(samples.pop().unwrap_or_default())
            } else {
                Ok(samples.last().cloned().unwrap_or_default())
            }
        }
    }

    fn phases(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_all_running() {
        assert!(all_running(&phases(&["Running", "Running"])));
        assert!(!all_running(&phases(&["Running", "Pending"])));
        assert!(!all_running(&phases(&["Succeeded"])));
        assert!(!all_running(&[]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_sample() {
        let source = ScriptedPods::new(&[&["Pending"], &["Pending", "Running"], &["Running", "Running"]]);
        let polling = PollingConfig::new(300, 10, "Waiting for pods");

        let start = tokio::time::Instant::now();
        wait_for_pods_ready(&source, "app=flannel", &polling).await.unwrap();

        assert_eq!(source.query_count(), 3);
        assert_eq!(start.elapsed().as_secs(), 20);
        assert!(source.queries.lock().unwrap().iter().all(|s| s == "app=flannel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pods_times_out() {
        let source = ScriptedPods::new(&[&[]]);
        let polling = PollingConfig::new(300, 10, "Waiting for pods");

        let err = wait_for_pods_ready(&source, "k8s-app=cilium", &polling)
            .await
            .unwrap_err();

        assert!(KubeForgeError::is_timeout(&err));
        // Samples at 0, 10, ..., 300 are within the deadline; 310 is past it
        assert_eq!(source.query_count(), 32);
    }
}
