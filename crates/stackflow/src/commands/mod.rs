pub mod diff;
pub mod list;
pub mod synth;
pub mod validate;

use colored::Colorize;
use stackflow_synth::Violation;

/// 検証エラーを表示
pub(crate) fn print_violations(violations: &[Violation]) {
    eprintln!();
    eprintln!(
        "{}",
        format!("✗ 検証エラー: {}件", violations.len()).red().bold()
    );
    for violation in violations {
        eprintln!(
            "  {} {}: {}",
            format!("[{}]", violation.rule).yellow(),
            violation.resource.cyan(),
            violation.message
        );
    }
}
