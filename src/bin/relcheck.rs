//! Two-phase relationship checker.
//!
//! ```text
//! relcheck <schema.toml> <sled|redb|sqlite> <path> <primary-id> [--repair]
//! ```
//!
//! Always diagnoses first and prints every violation. With `--repair` a repair pass
//! follows, and a final diagnosis confirms the tree is clean.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use netabase_relations::prelude::*;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Sled,
    Redb,
    Sqlite,
}

#[derive(Parser, Debug)]
#[command(
    name = "relcheck",
    version,
    about = "Diagnose, and optionally repair, the relations under one entity"
)]
struct Args {
    /// Schema declaration (TOML)
    schema: PathBuf,
    #[arg(value_enum)]
    backend: Backend,
    /// Store location
    path: PathBuf,
    /// Primary id of the subtree root, e.g. /Devices/router1
    root: String,
    #[arg(long, help = "Repair what the diagnosis finds, then diagnose again")]
    repair: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let schema = Schema::from_toml_file(&args.schema)
        .with_context(|| format!("loading schema {}", args.schema.display()))?;

    let clean = match args.backend {
        Backend::Sled => check(Relations::new(schema, SledStore::new(&args.path)?), &args)?,
        Backend::Redb => check(Relations::new(schema, RedbStore::new(&args.path)?), &args)?,
        Backend::Sqlite => check(Relations::new(schema, SqliteStore::new(args.path.clone())?), &args)?,
    };

    Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn check<B: RelationBackend>(relations: Relations<B>, args: &Args) -> anyhow::Result<bool> {
    let root_id = PrimaryId::new(args.root.as_str());
    let root = relations
        .resolve(&root_id)
        .with_context(|| format!("resolving {}", args.root))?;

    println!("Diagnosing {} ({} backend)", root.primary_id, relations.backend().backend_name());
    let report = relations.diagnose(&root)?;
    print_report(&report);

    if report.is_clean() || !args.repair {
        return Ok(report.is_clean());
    }

    println!("\nRepairing {}", root.primary_id);
    let repaired = relations.repair(&root)?;
    print_report(&repaired);
    relations.backend().flush()?;

    let after = relations.diagnose(&root)?;
    println!(
        "\nAfter repair: {} violations remaining",
        after.violations.len()
    );
    Ok(after.is_clean())
}

fn print_report(report: &CheckReport) {
    for violation in &report.violations {
        println!("  {}", violation);
    }
    println!(
        "{} entities, {} relations checked, {} violations",
        report.entities_checked,
        report.relations_checked,
        report.violations.len()
    );
}
