//! gratefulset-gate — run before the application in every GratefulSet pod.
//!
//! # Usage
//!
//! ```text
//! gratefulset-gate --ledger /etc/gratefulset/ledger && exec my-app
//! ```
//!
//! Exit codes: 0 admit, 75 ordinal not permitted, 78 ledger unreadable,
//! 64 malformed pod name.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gratefulset_gate::{Decision, check};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "gratefulset-gate", about = "GratefulSet admission gate")]
struct Cli {
    /// Stable pod name; the ordinal is the suffix after the last `-`.
    #[arg(long, env = "HOSTNAME")]
    pod_name: String,

    /// Logical ordinal of the pool's pod 0.
    #[arg(long, env = "GRATEFULSET_ORDINAL_BASE", default_value = "0")]
    ordinal_base: u32,

    /// Ledger JSON file or one-file-per-ordinal directory.
    #[arg(long, env = "GRATEFULSET_LEDGER", default_value = "/etc/gratefulset/ledger")]
    ledger: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match check(&cli.pod_name, cli.ordinal_base, &cli.ledger) {
        Ok(Decision::Admit) => {
            info!(pod = %cli.pod_name, "ordinal permitted, starting application");
            Decision::Admit.exit_code()
        }
        Ok(Decision::Deny) => {
            warn!(pod = %cli.pod_name, "ordinal not permitted, refusing to start");
            Decision::Deny.exit_code()
        }
        Err(e) => {
            error!(pod = %cli.pod_name, error = %e, "admission check failed");
            e.exit_code()
        }
    };
    ExitCode::from(code as u8)
}
