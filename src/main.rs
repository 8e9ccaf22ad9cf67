use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use devstart::config::DevConfig;
use devstart::supervisor::{AssumeYes, Supervisor, SupervisorError};

#[derive(Parser, Debug)]
#[command(name = "devstart", version, about = "Clean, rebuild and serve a web project")]
struct Cli {
    /// Config file (default: devstart.toml in the project dir, if present)
    #[arg(short, long, env = "DEVSTART_CONFIG")]
    config: Option<PathBuf>,

    /// Project directory
    #[arg(short = 'C', long, default_value = ".")]
    project_dir: PathBuf,

    /// Dev server port (overrides config and DEVSTART_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Continue past a failed type check without asking
    #[arg(short, long)]
    yes: bool,

    /// Keep node_modules, lockfiles and build output
    #[arg(long)]
    skip_clean: bool,

    /// Do not run the type check
    #[arg(long)]
    skip_typecheck: bool,

    /// Run `npm run build` before serving
    #[arg(long)]
    build: bool,
}

impl Cli {
    fn apply(&self, config: &mut DevConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.skip_clean {
            config.clean.enabled = false;
        }
        if self.skip_typecheck {
            config.typecheck.enabled = false;
        }
        if self.build {
            config.build.enabled = true;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devstart=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("[{}] {}", e.error_code(), e);
            eprintln!("\nError: {}", e);
            if let Some(hint) = e.remediation() {
                eprintln!("{}", hint);
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<i32, SupervisorError> {
    let mut config = DevConfig::load(cli.config.as_deref(), &cli.project_dir)
        .map_err(|e| SupervisorError::InvalidConfig(format!("{:#}", e)))?;
    cli.apply(&mut config);
    config
        .validate()
        .map_err(|e| SupervisorError::InvalidConfig(format!("{:#}", e)))?;

    tracing::info!(
        "devstart {} — project {} on port {}",
        env!("CARGO_PKG_VERSION"),
        config.project_dir.display(),
        config.port
    );

    let mut supervisor = Supervisor::new(config);
    if cli.yes {
        supervisor = supervisor.with_confirm(Arc::new(AssumeYes));
    }

    let outcome = supervisor.run().await?;
    tracing::debug!("Run finished: {:?}", outcome);
    Ok(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["devstart", "-p", "4000", "--skip-clean", "--build"]);
        let mut config = DevConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.port, 4000);
        assert!(!config.clean.enabled);
        assert!(config.build.enabled);
        assert!(config.typecheck.enabled);
    }

    #[test]
    fn test_cli_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["devstart"]);
        let mut config = DevConfig::default();
        let before = config.port;
        cli.apply(&mut config);

        assert_eq!(config.port, before);
        assert!(config.clean.enabled);
        assert!(!cli.yes);
    }
}
