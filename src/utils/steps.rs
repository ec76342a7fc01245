/// Declarative step lists with per-step severity
use anyhow::{Context, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use std::future::Future;
use tracing::{debug, info, warn};

/// How a failing step affects the rest of the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the sequence and return the error
    Fatal,
    /// Log a warning and continue with the next step
    Warn,
}

/// A named unit of work in an installation sequence
pub struct Step<'a> {
    pub name: String,
    pub severity: Severity,
    action: LocalBoxFuture<'a, Result<()>>,
}

impl<'a> Step<'a> {
    pub fn new<F>(name: impl Into<String>, severity: Severity, action: F) -> Self
    where
        F: Future<Output = Result<()>> + 'a,
    {
        Self {
            name: name.into(),
            severity,
            action: action.boxed_local(),
        }
    }

    pub fn fatal<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + 'a,
    {
        Self::new(name, Severity::Fatal, action)
    }

    pub fn warn<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + 'a,
    {
        Self::new(name, Severity::Warn, action)
    }
}

/// Outcome of a step list that ran to the end
#[derive(Debug, Default)]
pub struct StepReport {
    pub completed: usize,
    pub warnings: Vec<String>,
}

/// Run steps in order, interpreting each step's severity
pub async fn run_steps(steps: Vec<Step<'_>>) -> Result<StepReport> {
    let mut report = StepReport::default();

    for step in steps {
        info!("{}...", step.name);

        match (step.action.await, step.severity) {
            (Ok(()), _) => report.completed += 1,
            (Err(e), Severity::Fatal) => {
                return Err(e).with_context(|| format!("{} failed", step.name));
            }
            (Err(e), Severity::Warn) => {
                warn!("{} failed (continuing): {:#}", step.name, e);
                report.warnings.push(format!("{}: {:#}", step.name, e));
            }
        }
    }

    debug!(
        "{} step(s) completed, {} warning(s)",
        report.completed,
        report.warnings.len()
    );
    Ok(report)
}
