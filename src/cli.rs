//! Command-line configuration for the `scscp-server` binary.
//!
//! The surface is intentionally small: a bind address, a shutdown grace
//! period, and a verbosity flag. Grounded on `server/cli.rs`'s `clap`-derived
//! `AppConfig`, trimmed of the teacher's layered `ortho_config`/`figment`
//! multi-source loading (env + dotfile + CLI) and database/Argon2 fields,
//! neither of which this service has a use for (DESIGN.md records the drop).
//! `clap`'s own `env` support covers the one realistic override left: the
//! bind address in a containerised deployment.

use clap::Parser;

/// Default TCP bind address (spec §4.7).
pub const DEFAULT_BIND: &str = "127.0.0.1:26133";

/// Default grace period allowed for in-flight sessions to finish on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Runtime configuration for the SCSCP server binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "scscp-server", about = "SCSCP server", version)]
pub struct Cli {
    /// Address and port to accept connections on.
    #[arg(long, env = "SCSCP_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Seconds to wait for in-flight sessions to finish before a shutdown
    /// signal cancels them (spec §4.7).
    #[arg(
        long,
        env = "SCSCP_SHUTDOWN_GRACE_SECS",
        default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS
    )]
    pub shutdown_grace_secs: u64,

    /// Increase log verbosity; repeat for more detail (`-v`, `-vv`, ...).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The `tracing_subscriber` env-filter directive implied by `verbose`
    /// when `RUST_LOG` is not set.
    #[must_use]
    pub const fn default_log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
