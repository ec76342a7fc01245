/// Terminal output and interactive prompts
use anyhow::Result;
use console::{style, Term};
use dialoguer::{Confirm, Input};

use crate::config::NetworkPlugin;

fn rule() -> String {
    let width = Term::stdout().size().1.clamp(40, 60) as usize;
    "─".repeat(width)
}

pub fn print_banner() {
    println!();
    println!("{}", style("  KubeForge").cyan().bold());
    println!(
        "{}",
        style("  Kubernetes node bootstrapper  ·  v".to_string() + env!("CARGO_PKG_VERSION"))
            .dim()
            .italic()
    );
    println!("{}", style(rule()).dim());
    println!();
}

/// Green ✓ line on stdout
pub fn print_success(msg: &str) {
    println!("  {}  {}", style("✓").green().bold(), style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("  {}  {}", style("→").blue().bold(), msg);
}

/// Red ✗ line on stderr
pub fn print_error(msg: &str) {
    eprintln!("  {}  {}", style("✗").red().bold(), style(msg).red());
}

/// Print a join command. Join commands embed a bootstrap token, so they go
/// to stdout only and never through the log.
pub fn print_join_command(title: &str, command: &str) {
    println!();
    println!("{}", style(title).white().bold());
    println!("{}", style(rule()).dim());
    println!("{}", command);
    println!("{}", style(rule()).dim());
}

/// Print dashboard login details
pub fn print_dashboard_access(token: Option<&str>, proxy_url: &str) {
    if let Some(token) = token {
        println!();
        println!("{}", style("Dashboard token:").white().bold());
        println!("{}", token);
    }
    print_info("To access Dashboard, run: kubectl proxy");
    print_info(&format!("Then access: {}", proxy_url));
}

/// Menu lines for network plugin selection, numbered from 1
pub fn plugin_menu() -> Vec<String> {
    NetworkPlugin::ALL
        .iter()
        .enumerate()
        .map(|(i, plugin)| format!("{}. {}", i + 1, plugin.display_name()))
        .collect()
}

/// Plugin for a 1-based menu answer
pub fn plugin_choice(answer: &str) -> Option<NetworkPlugin> {
    let index: usize = answer.trim().parse().ok()?;
    NetworkPlugin::ALL.get(index.checked_sub(1)?).copied()
}

/// Interactive prompts that fall back to defaults when stdin is not used
#[derive(Debug, Clone, Copy)]
pub struct Prompter {
    interactive: bool,
}

impl Prompter {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    /// Yes/no question
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if !self.interactive {
            return Ok(default);
        }
        Ok(Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    /// Free text with a default shown in brackets
    pub fn input(&self, prompt: &str, default: &str) -> Result<String> {
        if !self.interactive {
            return Ok(default.to_string());
        }
        let answer: String = Input::new()
            .with_prompt(prompt)
            .default(default.to_string())
            .allow_empty(true)
            .interact_text()?;
        Ok(answer.trim().to_string())
    }
}
