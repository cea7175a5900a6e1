//! Terminal rendering of run reports, plans and recipe lists

use jake_core::{Jakefile, PlanStep, RunReport, SkipReason, TaskStatus};
use std::collections::BTreeMap;

/// Split `build test mode=release` into targets and parameter assignments
pub fn split_args(args: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    let mut targets = Vec::new();
    let mut params = Vec::new();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if is_param_name(name) => {
                params.push((name.to_string(), value.to_string()));
            }
            _ => targets.push(arg.clone()),
        }
    }
    (targets, params)
}

fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn render_report(report: &RunReport) -> String {
    let mut lines = Vec::new();
    for result in &report.results {
        let line = match result.status {
            TaskStatus::Completed => format!("✓ {} ({:?})", result.name, result.duration),
            TaskStatus::Skipped(SkipReason::UpToDate) => format!("⚡ {} (up to date)", result.name),
            TaskStatus::Skipped(SkipReason::Platform) => {
                format!("⏭ {} (not for this platform)", result.name)
            }
            TaskStatus::Failed => format!(
                "✗ {}: {}",
                result.name,
                result.error.as_deref().unwrap_or("failed")
            ),
            TaskStatus::Cancelled => format!("⊘ {} (not started)", result.name),
            TaskStatus::Planned => format!("• {} (would run)", result.name),
        };
        lines.push(line);
    }

    let ran = report.count(|s| s == TaskStatus::Completed);
    let skipped = report.count(|s| matches!(s, TaskStatus::Skipped(_)));
    let failed = report.count(|s| s == TaskStatus::Failed);
    let summary = if report.dry_run {
        format!(
            "📋 Dry run: {} would run, {} skipped",
            report.count(|s| s == TaskStatus::Planned),
            skipped
        )
    } else if report.success() {
        format!(
            "✅ {} ran, {} skipped in {:?}",
            ran, skipped, report.duration
        )
    } else {
        format!(
            "❌ {} ran, {} skipped, {} failed in {:?}",
            ran, skipped, failed, report.duration
        )
    };
    lines.push(String::new());
    lines.push(summary);
    lines.join("\n") + "\n"
}

pub fn render_plan(steps: &[PlanStep]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let what = match step.skip {
                None => "run",
                Some(SkipReason::UpToDate) => "up to date",
                Some(SkipReason::Platform) => "skip (platform)",
            };
            format!("   {}. {} [{}]\n", i + 1, step.recipe, what)
        })
        .collect()
}

/// Public recipes by group, ungrouped first
pub fn render_list(jakefile: &Jakefile) -> String {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for recipe in jakefile.recipes.iter().filter(|r| !r.is_private()) {
        let mut line = format!("    {}", recipe.name);
        if !recipe.params.is_empty() {
            let params: Vec<String> = recipe
                .params
                .iter()
                .map(|p| match &p.default {
                    Some(default) => format!("{}={}", p.name, default),
                    None => p.name.clone(),
                })
                .collect();
            line.push(' ');
            line.push_str(&params.join(" "));
        }
        if !recipe.aliases.is_empty() {
            line.push_str(&format!(" [alias: {}]", recipe.aliases.join(", ")));
        }
        if let Some(description) = &recipe.description {
            line.push_str(&format!("  # {}", description));
        }
        groups
            .entry(recipe.group.as_deref().unwrap_or(""))
            .or_default()
            .push(line);
    }

    let mut out = String::from("Available recipes:\n");
    for (group, lines) in groups {
        if !group.is_empty() {
            out.push_str(&format!("  [{}]\n", group));
        }
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}
