use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tollgate_core::config::{Config, WarnLevel};
use tollgate_core::consensus::{ConsensusEngine, KeywordVoter};
use tollgate_core::context::Collaborators;
use tollgate_core::AppContext;

use crate::tools;

pub const DEFAULT_CONFIG_FILE: &str = "tollgate.yaml";

/// Explicit path if given, else `tollgate.yaml` in the working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config from {}", path.display()))
}

/// Load the config and refuse to start on validation errors.
pub fn load_valid_config(path: &Path) -> anyhow::Result<Config> {
    let config = load_config(path)?;
    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Error => tracing::error!("config: {}", w.message),
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
        }
    }
    let errors = warnings
        .iter()
        .filter(|w| w.level == WarnLevel::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("{} has {errors} error(s); run `tollgate config validate`", path.display());
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Default consensus panel
// ---------------------------------------------------------------------------

const GUARDIAN_DENY: &[&str] = &[
    "rm -rf /",
    "mkfs",
    "dd if=",
    "drop database",
    "drop table",
    "truncate table",
    "chmod -r 777",
    "git push --force",
    "shutdown",
];

const AUDITOR_DENY: &[&str] = &[
    "/etc/shadow",
    "id_rsa",
    ".aws/credentials",
    "private key",
    "api_key=",
    "| nc ",
];

/// Two keyword voters plus two seats that cannot vote. Abstentions are
/// excluded from the ratios, so one reject out of two deciding votes vetoes.
pub fn default_panel(config: &Config) -> ConsensusEngine {
    ConsensusEngine::new(&config.consensus)
        .with_participant("guardian", Arc::new(KeywordVoter::new(GUARDIAN_DENY.iter().copied())))
        .with_participant("auditor", Arc::new(KeywordVoter::new(AUDITOR_DENY.iter().copied())))
        .with_abstainer("analyst")
        .with_abstainer("architect")
}

/// Build the full context: default panel as judgment, built-in tools registered.
pub fn build_context(config: Config) -> anyhow::Result<AppContext> {
    let collaborators = Collaborators {
        judgment: Some(Arc::new(default_panel(&config))),
        sinks: Vec::new(),
    };
    let ctx = AppContext::with_collaborators(config, collaborators)?;
    tools::register_builtin(&ctx);
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tollgate_core::consensus::Verdict;

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            resolve_config_path(Some(Path::new("/etc/tollgate.yaml"))),
            PathBuf::from("/etc/tollgate.yaml")
        );
        assert_eq!(resolve_config_path(None), PathBuf::from("tollgate.yaml"));
    }

    #[test]
    fn invalid_config_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tollgate.yaml");
        std::fs::write(&path, "tracer:\n  capacity: 0\n").unwrap();
        let err = load_valid_config(&path).unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[test]
    fn missing_config_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = load_valid_config(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.server.port, 3377);
    }

    #[tokio::test]
    async fn default_panel_vetoes_on_single_reject() {
        let panel = default_panel(&Config::default());
        assert_eq!(panel.participant_ids(), ["guardian", "auditor", "analyst", "architect"]);

        let clean = panel.vote("ls -la", &serde_json::json!({})).await;
        assert_eq!(clean.verdict(), Verdict::Approved);
        assert_eq!(clean.abstain_count, 2);

        let risky = panel.vote("cat ~/.ssh/id_rsa", &serde_json::json!({})).await;
        assert_eq!(risky.verdict(), Verdict::Vetoed);
    }

    #[test]
    fn build_context_registers_builtin_tools() {
        let ctx = build_context(Config::default()).unwrap();
        assert_eq!(ctx.tools.len(), 4);
        assert!(ctx.tools.get("gateway_breaker_reset").is_some());
    }
}
