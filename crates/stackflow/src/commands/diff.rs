use crate::project::{self, TargetArgs};
use colored::Colorize;
use stackflow_synth::{ActionType, ManifestStore, Plan, SynthError};

pub async fn handle(args: &TargetArgs) -> anyhow::Result<()> {
    let loaded = project::load(args)?;
    project::print_target(&loaded);

    let manifest = match stackflow_synth::synthesize(&loaded.stack) {
        Ok(manifest) => manifest,
        Err(SynthError::Verification(violations)) => {
            super::print_violations(&violations);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let store = ManifestStore::new(&loaded.root);
    let previous = store.load().await?;
    match &previous {
        Some(stored) => println!(
            "前回の合成: {}",
            stored.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{}", "前回の合成結果はありません（全て新規作成）".yellow()),
    }
    println!();

    let plan = Plan::between(previous.as_ref().map(|s| &s.manifest), &manifest);
    for action in &plan.actions {
        match action.action_type {
            ActionType::Create => {
                println!("  {} {} ({})", "+".green(), action.resource_id, action.resource_type)
            }
            ActionType::Delete => {
                println!("  {} {} ({})", "-".red(), action.resource_id, action.resource_type)
            }
            ActionType::Update => {
                println!(
                    "  {} {} ({})",
                    "~".yellow(),
                    action.resource_id,
                    action.resource_type
                );
                if let Some(changed) = action.details.get("changed") {
                    println!("      変更: {}", changed_properties(changed));
                }
            }
            ActionType::NoOp => {}
        }
    }

    println!();
    let summary = plan.summary();
    if plan.has_changes {
        println!("{}", summary.to_string().bold());
    } else {
        println!("{} ({})", "✓ 変更はありません".green().bold(), summary);
    }

    Ok(())
}

fn changed_properties(changed: &serde_json::Value) -> String {
    match changed.as_array() {
        Some(names) if !names.is_empty() => names
            .iter()
            .filter_map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        _ => "(属性)".to_string(),
    }
}
