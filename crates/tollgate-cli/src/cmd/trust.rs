use crate::output::{print_json, print_table};
use crate::setup;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use tollgate_core::orchestrator::intervention::quantize_trust;
use tollgate_core::trust::{TrustDb, TrustStore};

#[derive(Subcommand)]
pub enum TrustSubcommand {
    /// List every caller in the trust database
    List,

    /// Show one caller's score and trust level
    Show { caller: String },
}

pub fn run(config_path: &Path, subcmd: TrustSubcommand, json: bool) -> anyhow::Result<()> {
    let config = setup::load_config(config_path)?;
    let Some(db_path) = config.trust.db_path.as_deref() else {
        anyhow::bail!("trust.db_path is not set; scores only live in memory while serving");
    };
    let db = TrustDb::open(db_path, config.orchestrator.default_trust)
        .with_context(|| format!("failed to open trust database {}", db_path.display()))?;
    let breakpoints = &config.orchestrator.trust_breakpoints;

    match subcmd {
        TrustSubcommand::List => {
            let records = db.list()?;
            if json {
                let value: Vec<_> = records
                    .iter()
                    .map(|(caller, r)| serde_json::json!({ "caller": caller, "record": r }))
                    .collect();
                return print_json(&value);
            }
            if records.is_empty() {
                println!("No callers recorded.");
                return Ok(());
            }
            let rows = records
                .iter()
                .map(|(caller, r)| {
                    vec![
                        caller.clone(),
                        format!("{:.3}", r.score),
                        quantize_trust(r.score, breakpoints).to_string(),
                        r.calls.to_string(),
                        r.failures.to_string(),
                        r.blocks.to_string(),
                    ]
                })
                .collect();
            print_table(&["CALLER", "SCORE", "LEVEL", "CALLS", "FAILURES", "BLOCKS"], rows);
            Ok(())
        }
        TrustSubcommand::Show { caller } => {
            let score = db.score(&caller)?;
            let level = quantize_trust(score, breakpoints);
            if json {
                print_json(&serde_json::json!({ "caller": caller, "score": score, "level": level }))
            } else {
                println!("{caller}: {score:.3} ({level})");
                Ok(())
            }
        }
    }
}
