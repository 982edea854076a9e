//! CLI command implementations
//!
//! Each command loads the configuration, opens what it needs (store,
//! discovery, container), runs one core operation and renders the report.
//! Rendering happens before the report is turned into a result, so a
//! partial failure still shows everything that succeeded.

use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;

use super::args::{Cli, Command};
use super::errors::CliResult;
use super::io::{format_size, write_failures, write_json, Table};
use crate::build::{BuildReport, BuildRequest, Builder, Destination};
use crate::config::Config;
use crate::container::TarContainer;
use crate::errors::ArcdError;
use crate::index::{normalize_path, ChildKind, FileEntry, Indexer, ReconcileReport, RemovalSummary};
use crate::observability::{log_event_with_fields, Event, Logger, Severity};
use crate::restore::{AutoPrompt, ConsolePrompt, RestoreOptions, RestorePlan, RestoreReport, Restorer};
use crate::store::ArchiveStore;
use crate::verify::{FileState, VerifyReport, VerifyStatus, Verifier};
use crate::volume::{Discovery, Medium, Volume};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args())
}

/// Run a parsed command line
pub fn run_command(cli: Cli) -> CliResult<()> {
    Logger::set_min_severity(Severity::for_verbosity(cli.verbose));

    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Command::List { path } => list(&config, path.as_deref().unwrap_or(""), json),
        Command::Find { pattern } => find(&config, &pattern, json),
        Command::Build {
            destination,
            paths,
            copies,
            medium,
            size,
            pack_small,
            compress,
        } => {
            let options = BuildOptions {
                copies,
                medium,
                size,
                pack_small,
                compress,
            };
            build(&config, &destination, paths, options, json)
        }
        Command::Restore {
            paths,
            to,
            timeout,
            yes,
        } => restore(&config, &paths, &to, timeout, yes, json),
        Command::Verify { labels } => verify(&config, &labels, json),
        Command::Index { rebuild } => index(&config, rebuild, json),
        Command::Volumes { label } => volumes(&config, label.as_deref(), json),
        Command::Destroyed { label } => destroyed(&config, &label, json),
        Command::Reactivate { label } => reactivate(&config, &label, json),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<Config> {
    let config = Config::discover(path)?;
    let state_dir = config.state_dir.display().to_string();
    log_event_with_fields(Event::ConfigLoaded, &[("state_dir", state_dir.as_str())]);
    Ok(config)
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn copies_cell(entry: &FileEntry) -> String {
    let labels: Vec<&str> = entry.copies.iter().map(|l| l.as_str()).collect();
    format!("{} ({})", entry.copy_count(), labels.join(", "))
}

/// `lookup` refuses conflicted paths, so they are flagged wherever listed
fn state_cell(conflicted: bool) -> String {
    if conflicted { "CONFLICT" } else { "ok" }.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn plural(count: usize, singular: &str, plural: &str) -> String {
    format!("{} {}", count, if count == 1 { singular } else { plural })
}

// ---------------------------------------------------------------------------
// list / find
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ListRow<'a> {
    name: String,
    kind: ChildKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<&'a FileEntry>,
    #[serde(skip_serializing_if = "is_false")]
    conflicted: bool,
}

#[derive(Serialize)]
struct FindRow<'a> {
    #[serde(flatten)]
    entry: &'a FileEntry,
    conflicted: bool,
}

fn list(config: &Config, path: &str, json: bool) -> CliResult<()> {
    let store = ArchiveStore::open_shared(&config.state_dir)?;
    let index = store.index();
    let dir = normalize_path(path)?;

    let rows: Vec<ListRow> = match index.entry(&dir) {
        Some(entry) => vec![ListRow {
            name: dir.clone(),
            kind: ChildKind::File,
            entry: Some(entry),
            conflicted: index.is_conflicted(&dir),
        }],
        None => {
            if !dir.is_empty() && !index.contains_dir(&dir) {
                return Err(ArcdError::not_found(dir).into());
            }
            index
                .list_children(&dir)?
                .into_iter()
                .map(|child| {
                    let path = join_path(&dir, &child.name);
                    let entry = match child.kind {
                        ChildKind::File => index.entry(&path),
                        ChildKind::Directory => None,
                    };
                    ListRow {
                        conflicted: entry.is_some() && index.is_conflicted(&path),
                        name: child.name,
                        kind: child.kind,
                        entry,
                    }
                })
                .collect()
        }
    };

    if json {
        return write_json(&rows);
    }

    let mut table = Table::new(&["NAME", "SIZE", "COPIES", "STATE"]);
    let mut directories = 0;
    for row in &rows {
        match row.entry {
            Some(entry) => table.push(vec![
                row.name.clone(),
                format_size(entry.size),
                copies_cell(entry),
                state_cell(row.conflicted),
            ]),
            None => {
                directories += 1;
                table.push(vec![
                    format!("{}/", row.name),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                ]);
            }
        }
    }

    let mut out = io::stdout().lock();
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }
    writeln!(
        out,
        "{}, {}",
        plural(directories, "directory", "directories"),
        plural(rows.len() - directories, "file", "files")
    )?;
    Ok(())
}

fn find(config: &Config, pattern: &str, json: bool) -> CliResult<()> {
    let store = ArchiveStore::open_shared(&config.state_dir)?;
    let index = store.index();
    let rows: Vec<FindRow> = index
        .find(pattern)?
        .iter()
        .filter_map(|path| index.entry(path))
        .map(|entry| FindRow {
            entry,
            conflicted: index.is_conflicted(&entry.path),
        })
        .collect();

    if json {
        return write_json(&rows);
    }

    let mut out = io::stdout().lock();
    let mut table = Table::new(&["PATH", "SIZE", "COPIES", "STATE"]);
    for row in &rows {
        table.push(vec![
            row.entry.path.clone(),
            format_size(row.entry.size),
            copies_cell(row.entry),
            state_cell(row.conflicted),
        ]);
    }
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }
    writeln!(out, "{}", plural(rows.len(), "match", "matches"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

struct BuildOptions {
    copies: Option<usize>,
    medium: Option<Medium>,
    size: Option<u64>,
    pack_small: bool,
    compress: bool,
}

fn build(
    config: &Config,
    destination: &str,
    subtrees: Vec<String>,
    options: BuildOptions,
    json: bool,
) -> CliResult<()> {
    let mut store = ArchiveStore::open_exclusive(&config.state_dir)?;
    let destination = Destination::parse(destination, options.medium, config)?;
    let container = TarContainer::new(options.compress || config.compress);
    let request = BuildRequest {
        destination,
        subtrees,
        min_copies: options.copies.unwrap_or(config.min_copies),
        capacity: options.size.or(config.volume_size_bytes),
        pack_small: options.pack_small || config.pack_small,
    };

    let report = Builder::new(config, &container).build(&mut store, &request)?;
    if json {
        write_json(&report)?;
    } else {
        print_build(&report)?;
    }
    report.into_result()?;
    Ok(())
}

fn print_build(report: &BuildReport) -> CliResult<()> {
    let mut out = io::stdout().lock();
    match (&report.label, &report.location) {
        (Some(label), Some(location)) => {
            writeln!(
                out,
                "Volume {} ({}) written to {}",
                label, report.medium, location
            )?;
            writeln!(
                out,
                "  {} ({}), bundle {}, repair data for {}",
                plural(report.files, "file", "files"),
                format_size(report.bytes),
                format_size(report.bundle_bytes),
                plural(report.repair_files, "file", "files")
            )?;
            writeln!(
                out,
                "Attach the volume and run `arcd index` to record its copies."
            )?;
        }
        _ => writeln!(out, "Nothing to archive")?,
    }

    if !report.new_versions.is_empty() {
        writeln!(out, "Changed since last archived ({}):", report.new_versions.len())?;
        for path in &report.new_versions {
            writeln!(out, "  {}", path)?;
        }
    }
    if !report.deferred.is_empty() {
        writeln!(
            out,
            "{} did not fit; build another volume for them",
            plural(report.deferred.len(), "file", "files")
        )?;
    }
    write_failures(&mut out, "Failed", &report.failures)?;
    writeln!(
        out,
        "added {}, skipped {}, deferred {}, failed {}",
        report.files,
        report.satisfied,
        report.deferred.len(),
        report.failures.len()
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// restore
// ---------------------------------------------------------------------------

fn restore(
    config: &Config,
    paths: &[String],
    target: &Path,
    timeout: Option<u64>,
    yes: bool,
    json: bool,
) -> CliResult<()> {
    let store = ArchiveStore::open_shared(&config.state_dir)?;
    let discovery = Discovery::from_config(config);
    let container = TarContainer::new(config.compress);
    let mut options = RestoreOptions::from_config(config);
    if let Some(secs) = timeout {
        options.timeout = Duration::from_secs(secs);
    }

    let restorer = Restorer::new(store.state(), &discovery, &container, options);
    let cancel = restorer.cancel_flag();
    // Ctrl-C ends the run at the next wait and still prints the report
    if let Err(e) = ctrlc::set_handler(move || cancel.store(true, Ordering::SeqCst)) {
        let reason = e.to_string();
        Logger::warn("INTERRUPT_HANDLER_UNAVAILABLE", &[("reason", reason.as_str())]);
    }
    if !json {
        let (plan, _) = restorer.plan(paths);
        print_plan(&plan)?;
    }

    let report = if yes {
        restorer.restore(paths, target, &mut AutoPrompt)?
    } else {
        let mut prompt = ConsolePrompt::new(BufReader::new(io::stdin()), io::stderr());
        restorer.restore(paths, target, &mut prompt)?
    };

    if json {
        write_json(&report)?;
    } else {
        print_restore(&report, target)?;
    }
    report.into_result()?;
    Ok(())
}

fn print_plan(plan: &RestorePlan) -> CliResult<()> {
    let mut out = io::stdout().lock();
    if plan.volumes.is_empty() {
        return Ok(());
    }
    let needed: Vec<String> = plan
        .volumes
        .iter()
        .map(|v| format!("{} ({})", v.label, plural(v.paths.len(), "file", "files")))
        .collect();
    writeln!(out, "Volumes needed: {}", needed.join(", "))?;
    if !plan.unrecoverable.is_empty() {
        writeln!(
            out,
            "{} on no active volume",
            plural(plan.unrecoverable.len(), "file is", "files are")
        )?;
    }
    out.flush()?;
    Ok(())
}

fn print_restore(report: &RestoreReport, target: &Path) -> CliResult<()> {
    let mut out = io::stdout().lock();
    let mut table = Table::new(&["VOLUME", "STATE", "FILES", "RESTORED", "NOTE"]);
    for step in &report.steps {
        table.push(vec![
            step.label.clone(),
            step.state.as_str().to_string(),
            step.paths.to_string(),
            step.restored.to_string(),
            step.reason.clone().unwrap_or_default(),
        ]);
    }
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }

    writeln!(
        out,
        "Restored {} to {} ({} already present)",
        plural(report.restored.len(), "file", "files"),
        target.display(),
        report.already_present
    )?;
    if report.aborted {
        writeln!(out, "Restore aborted; run it again to resume")?;
    }
    write_failures(&mut out, "Rejected copies", &report.mismatches)?;
    write_failures(&mut out, "Not restored", &report.failures)?;
    writeln!(
        out,
        "restored {}, skipped {}, failed {}",
        report.restored.len(),
        report.already_present,
        report.failures.len()
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

fn verify(config: &Config, labels: &[String], json: bool) -> CliResult<()> {
    let discovery = Discovery::from_config(config);
    let container = TarContainer::new(config.compress);
    let report = Verifier::new(&container).verify_all(&discovery.discover(), labels);

    if json {
        write_json(&report)?;
    } else {
        print_verify(&report)?;
    }
    report.into_result()?;
    Ok(())
}

fn print_verify(report: &VerifyReport) -> CliResult<()> {
    let mut out = io::stdout().lock();
    let mut table = Table::new(&["VOLUME", "STATUS", "FILES", "LOCATION"]);
    for volume in &report.volumes {
        table.push(vec![
            volume.label.clone(),
            volume.status.label(),
            volume.files.len().to_string(),
            volume.location.clone(),
        ]);
    }
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }

    let (mut ok, mut repaired, mut corrupt) = (0, 0, 0);
    for volume in &report.volumes {
        match &volume.status {
            VerifyStatus::Ok => ok += 1,
            VerifyStatus::Repaired { .. } => {
                repaired += 1;
                if !volume.rewritten {
                    writeln!(
                        out,
                        "{}: damage repairable but not written back ({})",
                        volume.label, volume.location
                    )?;
                }
            }
            VerifyStatus::Corrupt { .. } => {
                corrupt += 1;
                writeln!(out, "{} corrupt files:", volume.label)?;
                for check in &volume.files {
                    if let FileState::Corrupt { reason } = &check.state {
                        writeln!(out, "  {}: {}", check.path, reason)?;
                    }
                }
            }
        }
    }
    write_failures(&mut out, "Not verified", &report.failures)?;
    writeln!(
        out,
        "{}: {} ok, {} repaired, {} corrupt",
        plural(report.volumes.len(), "volume", "volumes"),
        ok,
        repaired,
        corrupt
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// index
// ---------------------------------------------------------------------------

fn index(config: &Config, rebuild: bool, json: bool) -> CliResult<()> {
    let mut store = ArchiveStore::open_exclusive(&config.state_dir)?;
    if rebuild {
        store.reset_index()?;
    }
    let discovery = Discovery::from_config(config);
    let report = Indexer::new(&discovery).reconcile(&mut store)?;

    if json {
        write_json(&report)?;
    } else {
        print_reconcile(&report)?;
    }
    report.into_result()?;
    Ok(())
}

fn print_reconcile(report: &ReconcileReport) -> CliResult<()> {
    let mut out = io::stdout().lock();
    let mut table = Table::new(&["VOLUME", "FILES", "LOCATION"]);
    for volume in &report.volumes {
        table.push(vec![
            volume.label.clone(),
            volume.files.to_string(),
            volume.location.clone(),
        ]);
    }
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }

    if !report.skipped_destroyed.is_empty() {
        writeln!(
            out,
            "Ignored destroyed volumes: {}",
            report.skipped_destroyed.join(", ")
        )?;
    }
    if !report.encrypted.is_empty() {
        writeln!(
            out,
            "Encrypted volumes need decrypting first: {}",
            report.encrypted.join(", ")
        )?;
    }
    if !report.conflicts.is_empty() {
        writeln!(out, "Integrity conflicts ({}):", report.conflicts.len())?;
        for conflict in &report.conflicts {
            writeln!(out, "  {}", conflict.describe())?;
        }
    }
    write_failures(&mut out, "Failed", &report.failures)?;
    writeln!(
        out,
        "added {}, copies added {}, unchanged {}, stale {}, conflicts {}, failed {}",
        report.created,
        report.copies_added,
        report.unchanged,
        report.stale,
        report.conflicts.len(),
        report.failures.len()
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// volumes / destroyed / reactivate
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct VolumeRow<'a> {
    #[serde(flatten)]
    volume: &'a Volume,
    files: usize,
    bytes: u64,
    attached: bool,
}

#[derive(Serialize)]
struct VolumeDetail<'a> {
    #[serde(flatten)]
    volume: &'a Volume,
    attached: bool,
    files: Vec<&'a FileEntry>,
}

fn volumes(config: &Config, label: Option<&str>, json: bool) -> CliResult<()> {
    let store = ArchiveStore::open_shared(&config.state_dir)?;
    let discovered = Discovery::from_config(config).discover();

    if let Some(label) = label {
        let volume = store
            .registry()
            .get(label)
            .ok_or_else(|| ArcdError::not_found(format!("volume {}", label)))?;
        let detail = VolumeDetail {
            volume,
            attached: discovered.get(label).is_some(),
            files: store.index().entries_on(label),
        };
        return if json {
            write_json(&detail)
        } else {
            print_volume_detail(&detail)
        };
    }

    let usage = store.index().usage();
    let rows: Vec<VolumeRow> = store
        .registry()
        .volumes()
        .map(|volume| {
            let used = usage.get(&volume.label).copied().unwrap_or_default();
            VolumeRow {
                volume,
                files: used.files,
                bytes: used.bytes,
                attached: discovered.get(&volume.label).is_some(),
            }
        })
        .collect();

    if json {
        return write_json(&rows);
    }

    let mut out = io::stdout().lock();
    let mut table = Table::new(&[
        "LABEL", "MEDIUM", "STATUS", "FILES", "SIZE", "ATTACHED", "LAST SEEN",
    ]);
    for row in &rows {
        table.push(vec![
            row.volume.label.clone(),
            row.volume.medium.to_string(),
            row.volume.status.as_str().to_string(),
            row.files.to_string(),
            format_size(row.bytes),
            if row.attached { "yes" } else { "no" }.to_string(),
            row.volume.location.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }
    let attached = rows.iter().filter(|r| r.attached).count();
    writeln!(
        out,
        "{}, {} attached",
        plural(rows.len(), "volume", "volumes"),
        attached
    )?;
    Ok(())
}

fn print_volume_detail(detail: &VolumeDetail) -> CliResult<()> {
    let mut out = io::stdout().lock();
    let volume = detail.volume;
    writeln!(out, "Volume {}", volume.label)?;
    writeln!(out, "  medium:    {}", volume.medium)?;
    writeln!(out, "  status:    {}", volume.status.as_str())?;
    writeln!(out, "  created:   {}", volume.created_at)?;
    writeln!(
        out,
        "  last seen: {}{}",
        volume.location.as_deref().unwrap_or("-"),
        if detail.attached { " (attached)" } else { "" }
    )?;

    let mut table = Table::new(&["PATH", "SIZE"]);
    for entry in &detail.files {
        table.push(vec![entry.path.clone(), format_size(entry.size)]);
    }
    if !table.is_empty() {
        table.write_to(&mut out)?;
    }
    let bytes: u64 = detail.files.iter().map(|e| e.size).sum();
    writeln!(
        out,
        "{} ({}) indexed on this volume",
        plural(detail.files.len(), "file", "files"),
        format_size(bytes)
    )?;
    Ok(())
}

fn destroyed(config: &Config, label: &str, json: bool) -> CliResult<()> {
    let mut store = ArchiveStore::open_exclusive(&config.state_dir)?;
    let summary = store.destroy(label)?;

    if json {
        return write_json(&summary);
    }
    print_removal(label, &summary)
}

fn print_removal(label: &str, summary: &RemovalSummary) -> CliResult<()> {
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "Volume {} marked destroyed: {} dropped",
        label,
        plural(summary.copies_dropped, "copy", "copies")
    )?;
    if !summary.entries_promoted.is_empty() {
        writeln!(
            out,
            "Now served by a previously conflicting copy ({}):",
            summary.entries_promoted.len()
        )?;
        for path in &summary.entries_promoted {
            writeln!(out, "  {}", path)?;
        }
    }
    if !summary.entries_removed.is_empty() {
        writeln!(out, "No copy left ({}):", summary.entries_removed.len())?;
        for path in &summary.entries_removed {
            writeln!(out, "  {}", path)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Reactivated<'a> {
    label: &'a str,
    status: &'a str,
}

fn reactivate(config: &Config, label: &str, json: bool) -> CliResult<()> {
    let mut store = ArchiveStore::open_exclusive(&config.state_dir)?;
    store.reactivate(label)?;

    if json {
        return write_json(&Reactivated {
            label,
            status: "active",
        });
    }
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "Volume {} reactivated; attach it and run `arcd index` to record its copies again",
        label
    )?;
    Ok(())
}
