use super::ui;
use crate::core::rules::WriteRules;
use crate::migrate::{self, EntityReport, MigrationOptions, MigrationOutcome, MigrationReport};
use crate::store::document::DocumentSnapshot;
use crate::store::relational::RelationalStore;
use anyhow::{Context, Result};
use comfy_table::Cell;
use std::path::Path;

/// Migrates the document at `source` into the SQLite database `target` and
/// prints the report.
pub async fn run(
    source: &Path,
    target: &str,
    cascade_on_delete: bool,
    rules: WriteRules,
    options: MigrationOptions,
) -> Result<MigrationReport> {
    let snapshot = DocumentSnapshot::load(source)
        .await
        .with_context(|| format!("Failed to load migration source: {}", source.display()))?;
    let store = RelationalStore::open(target, cascade_on_delete, rules)
        .with_context(|| format!("Failed to open migration target: {target}"))?;

    let records = (snapshot.funds.len() + snapshot.investments.len()) as u64;
    let pb = ui::new_progress_bar(records, true);
    pb.set_message(if options.dry_run {
        "Checking records..."
    } else {
        "Migrating records..."
    });
    let report = migrate::migrate(&snapshot, &store, options, &|| pb.inc(1)).await;
    pb.finish_and_clear();
    let report = report.context("Migration aborted")?;

    display_report(&report, source, target);
    Ok(report)
}

fn display_report(report: &MigrationReport, source: &Path, target: &str) {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Entity"),
        ui::header_cell(if report.dry_run {
            "Would migrate"
        } else {
            "Migrated"
        }),
        ui::header_cell("Already present"),
        ui::header_cell("Invalid"),
        ui::header_cell("Orphaned"),
        ui::header_cell("Failed"),
    ]);
    for (name, entity) in [("Funds", &report.funds), ("Investments", &report.investments)] {
        table.add_row(vec![
            Cell::new(name),
            ui::count_cell(entity.migrated.len(), false),
            ui::count_cell(entity.skipped_existing.len(), false),
            ui::count_cell(entity.skipped_invalid.len(), true),
            ui::count_cell(entity.skipped_orphan.len(), true),
            ui::count_cell(entity.failed_constraint.len(), true),
        ]);
    }

    println!(
        "\nMigration: {} -> {}\n",
        ui::style_text(&source.display().to_string(), ui::StyleType::Title),
        ui::style_text(target, ui::StyleType::Title)
    );
    println!("{table}");

    let issues = issues_table(&report.funds, "fund")
        .into_iter()
        .chain(issues_table(&report.investments, "investment"))
        .collect::<Vec<_>>();
    if !issues.is_empty() {
        ui::print_separator();
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Record"),
            ui::header_cell("Position"),
            ui::header_cell("Id"),
            ui::header_cell("Reason"),
        ]);
        for row in issues {
            table.add_row(row);
        }
        println!("\n{table}");
    }

    let (label, style) = match report.outcome() {
        MigrationOutcome::Complete => ("complete", ui::StyleType::TotalValue),
        MigrationOutcome::PartialFailure => ("partial failure", ui::StyleType::Error),
    };
    let suffix = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "\n{}: {}{}\n",
        ui::style_text("Outcome", ui::StyleType::TotalLabel),
        ui::style_text(label, style),
        ui::style_text(suffix, ui::StyleType::Subtle)
    );
}

fn issues_table(entity: &EntityReport, kind: &str) -> Vec<Vec<Cell>> {
    entity
        .skipped_invalid
        .iter()
        .chain(&entity.skipped_orphan)
        .chain(&entity.failed_constraint)
        .map(|issue| {
            vec![
                Cell::new(kind),
                Cell::new(issue.index),
                ui::format_optional_cell(issue.id.as_deref(), str::to_string),
                Cell::new(&issue.reason),
            ]
        })
        .collect()
}
