use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use plexfs_config::UnionConfig;

mod commands;
mod errors;

#[derive(Parser)]
#[command(name = "plexfs", version, about = "plexfs - policy-driven union filesystem")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the union as a FUSE filesystem (runs in the foreground)
    Mount {
        /// Directory to mount the union at
        mountpoint: PathBuf,
        /// Allow access by users other than the mounting user
        #[arg(long)]
        allow_other: bool,
    },
    /// Validate configuration file
    Validate,
    /// Show effective configuration (branches, policies, control entry)
    Status,
    /// List known policies per category
    Policies,
}

fn find_config() -> Option<PathBuf> {
    // 1. PLEXFS_CONFIG environment variable
    if let Ok(path) = std::env::var("PLEXFS_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. plexfs.yaml in current directory
    let cwd_config = PathBuf::from("plexfs.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/plexfs/config.yaml
    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/plexfs/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // Policies needs no configuration at all
    if let Commands::Policies = cli.command {
        return commands::policies::run();
    }

    let config_path = cli.config.or_else(find_config).ok_or(
        "No configuration file found. Use --config, set PLEXFS_CONFIG, or create plexfs.yaml",
    )?;

    match cli.command {
        Commands::Validate => commands::validate::run(&config_path),
        Commands::Status => {
            let config = UnionConfig::from_file(&config_path)?;
            commands::status::run(&config)
        }
        Commands::Mount {
            mountpoint,
            allow_other,
        } => {
            let config = UnionConfig::from_file(&config_path)?;
            let args = commands::mount::MountArgs {
                mountpoint,
                allow_other,
            };
            commands::mount::run(config, args)
        }
        // Handled before config discovery; kept for match exhaustiveness.
        Commands::Policies => commands::policies::run(),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = err.exit_code();
            let code = if code < 0 {
                1u8
            } else if code > 255 {
                255u8
            } else {
                code as u8
            };
            return ExitCode::from(code);
        }
    };

    init_tracing();

    if let Err(e) = run(cli) {
        errors::print_error(e.as_ref());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
