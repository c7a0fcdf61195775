use crate::project::{self, TargetArgs};
use colored::Colorize;
use stackflow_synth::{ManifestStore, SynthError};
use std::path::PathBuf;

pub async fn handle(args: &TargetArgs, output: Option<PathBuf>, print: bool) -> anyhow::Result<()> {
    let loaded = project::load(args)?;
    if !print {
        println!("{}", "マニフェストを合成中...".blue());
        project::print_target(&loaded);
    }

    let manifest = match stackflow_synth::synthesize(&loaded.stack) {
        Ok(manifest) => manifest,
        Err(SynthError::Verification(violations)) => {
            super::print_violations(&violations);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let store = ManifestStore::new(&loaded.root);
    let stored_path = store.save(&loaded.stack.name, &manifest).await?;

    let json = manifest.to_json()?;
    if let Some(path) = &output {
        tokio::fs::write(path, &json).await?;
    }

    if print {
        println!("{}", json);
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "✓ {}個のリソースと{}個の出力を合成しました",
            manifest.resources.len(),
            manifest.outputs.len()
        )
        .green()
        .bold()
    );
    println!("  保存先: {}", stored_path.display().to_string().cyan());
    if let Some(path) = output {
        println!("  出力先: {}", path.display().to_string().cyan());
    }

    Ok(())
}
