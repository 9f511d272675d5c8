use std::path::PathBuf;

use clap::{Parser, Subcommand};
use desklock::errors::DeskLockError;
use desklock::inspect;
use desklock::settings::Settings;
use desklock_engine::loader::load_policies;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "desklock",
    version,
    about = "Role-based UI policy enforcer for desk-style web applications"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "desklock.toml")]
    config: String,

    /// Policy directory (overrides the configuration file)
    #[arg(short, long)]
    policies: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate all policy files
    Check,
    /// Show what the engine would do for a session
    Eval {
        /// Role held by the session (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
        /// Route to guard, e.g. "form/customer/ABC-123"
        #[arg(long)]
        route: Option<String>,
        /// Visible label of a navigation item (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Visible label of a dropdown menu item (repeatable)
        #[arg(long = "dropdown-label")]
        dropdown_labels: Vec<String>,
    },
    /// Emit the compiled policy bundle for the browser client
    Bundle {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config)?;
    if let Some(dir) = cli.policies {
        settings.policies.dir = dir;
    }
    tracing::debug!(?settings, "Loaded configuration");

    let table = load_policies(&settings.policies.dir).map_err(DeskLockError::from)?;

    match cli.command {
        Command::Check => {
            let summary = inspect::summarize(&table);
            for role in &summary.roles {
                println!(
                    "{}: landing `{}`, {} paths, {} entity types, {} blocked labels{}",
                    role.role,
                    role.landing,
                    role.paths,
                    role.entities,
                    role.blocked_labels,
                    role.dropdown_allow
                        .map(|n| format!(", dropdown allow-list of {n}"))
                        .unwrap_or_default()
                );
            }
            println!("privileged: {}", summary.privileged.join(", "));
            println!("detail views: {}", summary.detail_views.join(", "));
            println!("global suppressions: {}", summary.suppressions.join(", "));
            tracing::info!(roles = summary.roles.len(), "policies are valid");
        }
        Command::Eval {
            roles,
            route,
            labels,
            dropdown_labels,
        } => {
            let eval =
                inspect::evaluate(&table, &roles, route.as_deref(), &labels, &dropdown_labels);
            let json = serde_json::to_string_pretty(&eval).map_err(DeskLockError::from)?;
            println!("{json}");
        }
        Command::Bundle { output } => {
            let bundle = inspect::bundle(table, settings.reconcile.clone());
            let json = bundle.to_json_pretty().map_err(DeskLockError::from)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).map_err(DeskLockError::from)?;
                    tracing::info!(path = %path.display(), "Wrote policy bundle");
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}
