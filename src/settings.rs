use crate::errors::DeskLockError;
use desklock_engine::LoopTimings;
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub policies: Policies,
    /// Delays and intervals shipped to the browser client in the bundle
    #[serde(default)]
    pub reconcile: LoopTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policies {
    /// Directory holding the `.kdl` policy files. Default: policies
    pub dir: PathBuf,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("policies"),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let defaults = LoopTimings::default();
        let mut builder = config::Config::builder()
            .set_default(
                "policies.dir",
                Policies::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("reconcile.session_retry_ms", defaults.session_retry_ms)
            .into_diagnostic()?
            .set_default("reconcile.route_settle_ms", defaults.route_settle_ms)
            .into_diagnostic()?
            .set_default("reconcile.mutation_debounce_ms", defaults.mutation_debounce_ms)
            .into_diagnostic()?
            .set_default("reconcile.periodic_ms", defaults.periodic_ms)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: DESKLOCK__RECONCILE__PERIODIC_MS=5000, etc.
        builder = builder.add_source(config::Environment::with_prefix("DESKLOCK").separator("__"));

        let cfg = builder.build().map_err(DeskLockError::from)?;
        let mut s: Settings = cfg.try_deserialize().map_err(DeskLockError::from)?;

        // Normalize policies dir to be relative to current dir
        if s.policies.dir.is_relative() {
            s.policies.dir = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.policies.dir);
        }

        Ok(s)
    }
}
