//! Command-line entry point (ambient, per `spec.md` §1's CLI-bootstrapping
//! non-goal — the bootstrap flags themselves are not re-specified, but a
//! real binary needs them).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "agent-runtime", about = "Model-driven agent orchestration runtime", version)]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long, env = "AGENT_RUNTIME_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP port override.
    #[arg(short, long, env = "AGENT_RUNTIME_PORT")]
    pub port: Option<u16>,

    /// HTTP host override.
    #[arg(long, env = "AGENT_RUNTIME_HOST")]
    pub host: Option<String>,

    /// Log level override (trace, debug, info, warn, error). Falls back to
    /// the loaded configuration's `logger.level` when unset.
    #[arg(long, env = "AGENT_RUNTIME_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (text or json).
    #[arg(long, env = "AGENT_RUNTIME_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Directory of core `.tera` prompt templates, registered under the
    /// `core` namespace at boot (`spec.md` §4.9).
    #[arg(long, default_value = "templates/core", env = "AGENT_RUNTIME_TEMPLATES_DIR")]
    pub templates_dir: PathBuf,
}
