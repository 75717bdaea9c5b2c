//! crictl passthrough
//!
//! Forwards every argument after the program name to the `crictl` container
//! runtime inspection tool. The wrapper itself always exits successfully;
//! failures of the tool are only logged.

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const CRICTL_BINARY_ENV: &str = "CRICTL_BINARY";
const DEFAULT_CRICTL_BINARY: &str = "crictl";

/// Run crictl against the node's container runtime
#[derive(Parser, Debug)]
#[command(name = "node-crictl", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// Arguments handed to crictl unchanged
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

fn crictl_binary() -> OsString {
    std::env::var_os(CRICTL_BINARY_ENV).unwrap_or_else(|| DEFAULT_CRICTL_BINARY.into())
}

async fn run(binary: &OsString, args: &[OsString]) -> Result<ExitStatus> {
    Command::new(binary)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("Failed to run {}", binary.to_string_lossy()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let binary = crictl_binary();

    match run(&binary, &cli.args).await {
        Ok(status) if !status.success() => {
            warn!(binary = %binary.to_string_lossy(), status = %status, "crictl exited with failure");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "crictl could not be started"),
    }

    Ok(())
}
