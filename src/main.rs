use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use patchstack::commits::{Author, CommitMeta, CommitReport, CommitStatus, FeatureRebuildReport};
use patchstack::config::{load_from_path, load_or_default};
use patchstack::engine::{write_json, ApplyReport, ApplyResult};
use patchstack::materialize::MaterializeReport;
use patchstack::Pipeline;
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patchstack")]
#[command(about = "Replayable patch stack for forks of decompiled source trees", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to patchstack.toml (defaults to ./patchstack.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Worker threads (overrides engine.workers)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize the vanilla sources into the baseline
    Materialize,

    /// Copy the resource tree verbatim
    MaterializeResources,

    /// Write the consolidated access transform list
    MergeAts,

    /// Reset the file-patched tree to the baseline and apply the file patches
    Apply {
        /// Locate hunks that moved or whose context drifted
        #[arg(long)]
        fuzzy: bool,
    },

    /// Reset the final tree and replay the commit patches
    ApplyFeatures,

    /// Regenerate the file patches from the file-patched tree
    Rebuild,

    /// Regenerate the commit patches from the recorded history
    RebuildFeatures,

    /// Refresh only the file patches whose targets were edited
    Fixup,

    /// Record the final tree's uncommitted changes as a new commit
    Commit {
        /// Commit message; the first line is the subject
        #[arg(short, long)]
        message: String,

        /// Author as "Name <email>" (defaults to PATCHSTACK_AUTHOR)
        #[arg(long)]
        author: Option<String>,
    },

    /// Fold uncommitted changes into the last commit
    FixupFeatures,

    /// Rebuild the commit patches and replay them onto the current
    /// file-patched tree
    RebaseFeatures,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => load_from_path(path)?,
        None => load_or_default(env::current_dir().context("no working directory")?)?,
    };
    if let Some(workers) = cli.workers {
        config.engine.workers = workers;
    }
    let pipeline = Pipeline::new(config);
    let report = cli.report.as_deref();

    let success = match cli.command {
        Commands::Materialize => cmd_materialize(pipeline.materialize()?, report)?,
        Commands::MaterializeResources => {
            cmd_materialize(pipeline.materialize_resources()?, report)?
        }
        Commands::MergeAts => {
            let merged = pipeline.merge_access_transforms()?;
            println!(
                "{} {} access transforms ({} overridden)",
                "✓".green(),
                merged.entries.len(),
                merged.overrides.len()
            );
            save_report(&merged, report)?;
            true
        }
        Commands::Apply { fuzzy } => cmd_apply(pipeline.apply(fuzzy)?, report)?,
        Commands::ApplyFeatures => cmd_apply_features(&pipeline.apply_features()?, report)?,
        Commands::Rebuild => {
            let rebuilt = pipeline.rebuild()?;
            println!("{}", "Rebuild:".bold());
            println!("  {} written", format!("{}", rebuilt.written.len()).green());
            println!("  {} unchanged", rebuilt.unchanged);
            println!("  {} removed", format!("{}", rebuilt.removed.len()).yellow());
            if !rebuilt.skipped_binary.is_empty() {
                println!(
                    "  {} non-text files skipped",
                    format!("{}", rebuilt.skipped_binary.len()).cyan()
                );
            }
            save_report(&rebuilt, report)?;
            true
        }
        Commands::RebuildFeatures => cmd_rebuild_features(&pipeline.rebuild_features()?, report)?,
        Commands::Fixup => {
            let fixed = pipeline.fixup()?;
            println!("{}", "Fixup:".bold());
            println!("  {} rewritten", format!("{}", fixed.rewritten.len()).green());
            println!("  {} removed", format!("{}", fixed.removed.len()).yellow());
            println!("  {} untouched", fixed.untouched);
            for path in &fixed.broken {
                println!(
                    "  {} {}: recorded patch no longer reproduced",
                    "⊙".yellow(),
                    path
                );
            }
            save_report(&fixed, report)?;
            true
        }
        Commands::Commit { message, author } => {
            let author = author
                .or_else(|| env::var("PATCHSTACK_AUTHOR").ok())
                .unwrap_or_else(|| "patchstack <patchstack@localhost>".to_string());
            let (subject, body) = message.split_once('\n').unwrap_or((message.as_str(), ""));
            let meta = CommitMeta::now(Author::parse(&author), subject.trim(), body.trim());
            let recorded = pipeline.commit(meta)?;
            match &recorded.commit {
                Some(subject) => println!(
                    "{} {}: {} files",
                    "✓".green(),
                    subject,
                    recorded.files.len()
                ),
                None => println!("{}", "Nothing to commit".yellow()),
            }
            save_report(&recorded, report)?;
            true
        }
        Commands::FixupFeatures => {
            let recorded = pipeline.fixup_features()?;
            match &recorded.commit {
                Some(subject) => println!(
                    "{} folded {} files into {}",
                    "✓".green(),
                    recorded.files.len(),
                    subject
                ),
                None => println!("{}", "Nothing to fix up".yellow()),
            }
            save_report(&recorded, report)?;
            true
        }
        Commands::RebaseFeatures => {
            let (rebuilt, applied) = pipeline.rebase_features()?;
            print_rebuild_features(&rebuilt);
            cmd_apply_features(&applied, report)?
        }
    };

    if !success {
        std::process::exit(1);
    }

    Ok(())
}

/// Install the fmt subscriber. `PATCHSTACK_LOG` takes precedence over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("PATCHSTACK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("patchstack={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn save_report<T: Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        write_json(value, path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    Ok(())
}

fn cmd_materialize(report: MaterializeReport, path: Option<&Path>) -> Result<bool> {
    println!("{}", "Materialize:".bold());
    println!("  {} files", report.files);
    println!("  {} written", format!("{}", report.written).green());
    println!("  {} unchanged", report.unchanged);
    println!("  {} removed", format!("{}", report.removed).yellow());
    if report.transforms.applied > 0 || !report.transforms.unresolved.is_empty() {
        println!(
            "  {} access transforms applied, {} unresolved",
            format!("{}", report.transforms.applied).green(),
            format!("{}", report.transforms.unresolved.len()).yellow()
        );
    }
    println!("  fingerprint {}", report.fingerprint.dimmed());
    save_report(&report, path)?;
    Ok(true)
}

fn cmd_apply(report: ApplyReport, path: Option<&Path>) -> Result<bool> {
    for outcome in &report.outcomes {
        let target = outcome.target.as_deref().unwrap_or("?");
        match &outcome.result {
            ApplyResult::Applied { fuzzed } if fuzzed.is_empty() => {}
            ApplyResult::Applied { fuzzed } => {
                println!(
                    "{} {}: {} hunks fuzzed",
                    "⊙".yellow(),
                    target,
                    fuzzed.len()
                );
            }
            ApplyResult::Rejected { reason, hunks } => {
                eprintln!("{} {}: Rejected - {}", "✗".red(), target, reason);
                for hunk in hunks {
                    eprintln!("  hunk #{}: {}", hunk.index + 1, hunk.reason);
                }
            }
            ApplyResult::Malformed { reason } => {
                eprintln!("{} {}: Malformed - {}", "✗".red(), outcome.patch, reason);
            }
            ApplyResult::Pending => {}
        }
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", report.applied()).green());
    println!("  {} fuzzed", format!("{}", report.fuzzed()).yellow());
    println!("  {} rejected", format!("{}", report.rejected()).red());
    println!("  {} malformed", format!("{}", report.malformed()).red());
    if report.cancelled {
        println!("  {} pending (cancelled)", format!("{}", report.pending()).cyan());
    }

    save_report(&report, path)?;
    Ok(report.is_success())
}

fn cmd_apply_features(report: &CommitReport, path: Option<&Path>) -> Result<bool> {
    for outcome in &report.outcomes {
        let subject = outcome.subject.as_deref().unwrap_or("");
        match &outcome.status {
            CommitStatus::Applied { files } => {
                println!(
                    "{} {} {} ({} files)",
                    "✓".green(),
                    outcome.patch,
                    subject.dimmed(),
                    files
                );
            }
            CommitStatus::Failed { file, hunk, reason } => {
                eprintln!("{} {}: Failed - {}", "✗".red(), outcome.patch, reason);
                if let Some(file) = file {
                    match hunk {
                        Some(hunk) => eprintln!("  File: {file}, hunk #{hunk}"),
                        None => eprintln!("  File: {file}"),
                    }
                }
            }
            CommitStatus::NotAttempted => {
                println!("{} {}: not attempted", "⊘".cyan(), outcome.patch);
            }
        }
    }

    println!("{}", "Summary:".bold());
    println!(
        "  {} of {} commits applied",
        format!("{}", report.applied()).green(),
        report.outcomes.len()
    );
    save_report(report, path)?;
    Ok(report.is_success())
}

fn print_rebuild_features(report: &FeatureRebuildReport) {
    println!("{}", "Rebuild features:".bold());
    println!("  {} written", format!("{}", report.written.len()).green());
    println!("  {} unchanged", report.unchanged);
    println!("  {} removed", format!("{}", report.removed.len()).yellow());
    if !report.uncommitted.is_empty() {
        println!(
            "  {} uncommitted changes not included: {}",
            format!("{}", report.uncommitted.len()).yellow(),
            report.uncommitted.join(", ")
        );
    }
}

fn cmd_rebuild_features(report: &FeatureRebuildReport, path: Option<&Path>) -> Result<bool> {
    print_rebuild_features(report);
    save_report(report, path)?;
    Ok(true)
}
