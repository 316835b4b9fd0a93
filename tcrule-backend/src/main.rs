//! `tcrule` command line.

use anyhow::{Context, Result};
use tcrule_backend::config::{CliCommand, ConfigManager, ShowTarget};
use tcrule_backend::rule_engine::{FilterAction, RuleEngine};
use tcrule_shared::{Rule, RuleSnapshot};
use tracing::{debug, instrument};

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    let config_manager = ConfigManager::from_cli_and_env()?;
    config_manager.init_logging()?;
    debug!("Configuration: {:?}", config_manager.app);

    let engine = RuleEngine::new(config_manager.app.to_context());

    match &config_manager.cli.command {
        CliCommand::Show { target, json } => show(&engine, *target, *json).await,
        CliCommand::Set(spec) => {
            let outcomes = engine
                .set_rule(spec)
                .await
                .context("Failed to set rule")?;
            for outcome in outcomes {
                let filter = match outcome.filter {
                    FilterAction::Added => "filter added".to_string(),
                    FilterAction::Retargeted { handle } => format!("filter {} retargeted", handle),
                };
                let qdisc = if outcome.reused_profile {
                    "reused"
                } else {
                    "installed"
                };
                println!(
                    "{}: flow {} qdisc {} ({}), {}",
                    outcome.interface, outcome.flow_id, outcome.qdisc_handle, qdisc, filter
                );
            }
            Ok(())
        }
        CliCommand::Delete(spec) => {
            let outcomes = engine
                .delete_rule(spec)
                .await
                .context("Failed to delete rule")?;
            for outcome in outcomes {
                match outcome.filter_handle {
                    Some(handle) => println!("{}: removed filter {}", outcome.interface, handle),
                    None => println!("{}: no matching rule", outcome.interface),
                }
            }
            Ok(())
        }
        CliCommand::Reset { interface } => {
            engine
                .reset(interface.as_deref())
                .await
                .context("Failed to reset")?;
            Ok(())
        }
    }
}

async fn show(engine: &RuleEngine, target: ShowTarget, json: bool) -> Result<()> {
    match target {
        ShowTarget::Interfaces => {
            let interfaces = engine
                .list_interfaces()
                .await
                .context("Failed to list interfaces")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&interfaces)?);
            } else {
                for interface in interfaces {
                    println!("{}", interface);
                }
            }
        }
        ShowTarget::Rules => {
            let snapshot = engine.list_rules().await.context("Failed to list rules")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.rules)?);
            } else {
                print_rules(&snapshot);
            }
        }
        ShowTarget::All => {
            let snapshot = engine.list_rules().await.context("Failed to list rules")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("interfaces: {}", snapshot.interfaces.join(" "));
                println!("qdiscs: {}  filters: {}", snapshot.qdiscs.len(), snapshot.filters.len());
                print_rules(&snapshot);
            }
        }
    }
    Ok(())
}

fn print_rules(snapshot: &RuleSnapshot) {
    if snapshot.rules.is_empty() {
        println!("no rules");
        return;
    }
    for rule in &snapshot.rules {
        println!("{}", describe(rule));
    }
}

fn describe(rule: &Rule) -> String {
    let mut line = format!(
        "{} flow {}: {} -> {}",
        rule.interface,
        rule.flow_id.as_deref().unwrap_or("-"),
        rule.predicates,
        rule.profile
    );
    if let Some(corrupt) = rule.corrupt_pct {
        line.push_str(&format!(" corrupt={}%", corrupt));
    }
    if !rule.has_filter() {
        line.push_str(" [no filter]");
    } else if !rule.has_qdisc() {
        line.push_str(" [no qdisc]");
    }
    line
}
