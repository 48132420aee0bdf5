//! Terminal rendering for verification groups and their results.

use streamverify_binder::{Activation, HandleOrigin, OutputState, VerificationGroup};
use streamverify_core::compose_user_message;

const LABEL_WIDTH: usize = 10;
const MAX_PREVIEW_CHARS: usize = 120;

/// Print one line per group, then its composed message.
pub fn print_groups(groups: &[VerificationGroup]) {
    if groups.is_empty() {
        println!("No verifiable groups found.");
        return;
    }
    for group in groups {
        println!("{}", group_heading(group));
        println!(
            "    {}",
            preview(&compose_user_message(&group.fragments), MAX_PREVIEW_CHARS)
        );
    }
    println!("\n{} group(s)", groups.len());
}

fn group_heading(group: &VerificationGroup) -> String {
    let trigger = match group.trigger {
        HandleOrigin::Existing => "existing trigger",
        HandleOrigin::Created => "new trigger",
    };
    format!(
        "{:<12} {:<16} {} fragment(s), {trigger}",
        group.label(),
        group.category,
        group.fragments.len()
    )
}

/// Render a result card for one activated group.
pub fn render_card(group: &VerificationGroup, activation: &Activation, output: &OutputState) -> String {
    let mut lines = Vec::new();
    let title = format!("── {} ({}) ", group.label(), group.category);
    lines.push(format!("{title:─<60}"));

    let (status, body) = match (activation, output) {
        (Activation::Completed(text), _) => ("verified", text.clone()),
        (Activation::Failed(e), OutputState::Failed(placeholder)) => {
            ("failed", format!("{placeholder}\n({e})"))
        }
        (Activation::Failed(e), _) => ("failed", e.to_string()),
        (Activation::Ignored, _) => ("skipped", "already in progress".to_string()),
    };
    lines.push(field("status", status));
    lines.push(field("fragments", &group.fragments.len().to_string()));

    let body = body.trim();
    if body.is_empty() {
        lines.push(field("result", "(empty)"));
    } else {
        lines.push(field("result", ""));
        for line in body.lines() {
            lines.push(format!("  {line}"));
        }
    }
    lines.join("\n")
}

fn field(label: &str, value: &str) -> String {
    format!("  {label:<width$} {value}", width = LABEL_WIDTH).trim_end().to_string()
}

/// Truncate to `max` characters, marking the cut.
fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}…")
}
