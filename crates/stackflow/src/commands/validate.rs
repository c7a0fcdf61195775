use crate::project::{self, TargetArgs};
use colored::Colorize;

pub fn handle(args: &TargetArgs) -> anyhow::Result<()> {
    println!("{}", "スタックを検証中...".blue());

    let loaded = project::load(args)?;
    project::print_target(&loaded);

    let violations = stackflow_synth::verify(&loaded.stack);
    if !violations.is_empty() {
        super::print_violations(&violations);
        std::process::exit(1);
    }

    println!("{}", "✓ スタックは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  宣言: {}個", loaded.spec.declaration_count());
    if let Some(network) = &loaded.stack.network {
        println!(
            "  サブネット: {}個 (NATゲートウェイ {}個)",
            network.subnets.len(),
            network.nat_gateways.len()
        );
    }
    println!("  シークレット: {}個", loaded.stack.secrets.len());
    println!("  タスク定義: {}個", loaded.spec.task_definitions.len());
    println!("  関数: {}個", loaded.stack.workloads.functions.len());
    println!("  パイプライン: {}個", loaded.spec.pipelines.len());

    Ok(())
}
