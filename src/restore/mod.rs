//! Restore
//!
//! Brings requested virtual paths back from volumes, asking for as few
//! volumes as possible.
//!
//! # Algorithm
//!
//! 1. Expand the requested paths against the index (file, else directory
//!    prefix). Unknown and conflicted paths are reported, not restored
//! 2. Drop files already present in the target with the right hash, so a
//!    rerun resumes where an interrupted one stopped
//! 3. Plan a greedy set cover over the remaining files' copies
//! 4. Ask for the first planned volume and wait for discovery to see it,
//!    up to the timeout
//! 5. Extract and verify what it covers
//! 6. Replan whatever is left, excluding skipped volumes and volumes that
//!    failed for a given path, and repeat from 4
//!
//! Volumes are handled one at a time. Each step follows the state machine
//! in [`StepState`].

mod extractor;
mod planner;
mod prompt;
mod session;

pub use extractor::{Extraction, Extractor, PARTIAL_SUFFIX};
pub use planner::{plan_cover, PlannedVolume, RestorePlan};
pub use prompt::{AutoPrompt, ConsolePrompt, MediumPrompt, MediumRequest, PromptResponse};
pub use session::{RestoreStep, StepState};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Config;
use crate::container::ArchiveContainer;
use crate::crash_point::{maybe_crash, points};
use crate::errors::{ArcdError, ArcdErrorCode, ArcdResult, ItemFailure};
use crate::index::FileEntry;
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::store::StoreState;
use crate::volume::{DiscoveredVolume, Discovery};

/// Waiting behaviour for volumes that are not attached
#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl RestoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.prompt_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    /// Files the request expanded to
    pub files: usize,
    /// Volumes planned before the first prompt
    pub planned: Vec<String>,
    pub restored: Vec<String>,
    /// Files found already restored in the target
    pub already_present: usize,
    pub steps: Vec<RestoreStep>,
    /// Copies that failed on one volume, whether or not another volume
    /// supplied the file afterwards
    pub mismatches: Vec<ItemFailure>,
    /// Paths that were not restored
    pub failures: Vec<ItemFailure>,
    pub aborted: bool,
}

impl RestoreReport {
    pub fn into_result(self) -> ArcdResult<Self> {
        if self.aborted {
            return Err(ArcdError::cancelled());
        }
        if self.failures.is_empty() {
            return Ok(self);
        }
        let code = self.failures[0].code;
        if self.failures.iter().all(|f| f.code == code) {
            if let Some(code) = ArcdErrorCode::from_code(code) {
                let paths: Vec<&str> = self.failures.iter().map(|f| f.item.as_str()).collect();
                return Err(ArcdError::uniform_failure(
                    code,
                    format!("Not restored: {} ({})", paths.join(", "), self.failures[0].reason),
                ));
            }
        }
        Err(ArcdError::partial_failure(
            self.failures.len(),
            self.failures.len() + self.restored.len() + self.already_present,
        ))
    }
}

/// Restores paths from the volumes an index knows about
pub struct Restorer<'a> {
    state: &'a StoreState,
    discovery: &'a Discovery,
    container: &'a dyn ArchiveContainer,
    options: RestoreOptions,
    cancel: Arc<AtomicBool>,
}

impl<'a> Restorer<'a> {
    pub fn new(
        state: &'a StoreState,
        discovery: &'a Discovery,
        container: &'a dyn ArchiveContainer,
        options: RestoreOptions,
    ) -> Self {
        Self {
            state,
            discovery,
            container,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag aborts the restore at the next wait
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Plan without touching any volume
    pub fn plan(&self, paths: &[String]) -> (RestorePlan, Vec<ItemFailure>) {
        let (wanted, failures) = self.resolve(paths);
        (plan_cover(&copies_of(&wanted), |_, _| true), failures)
    }

    /// Restore `paths` into `target`, prompting for volumes as needed
    pub fn restore(
        &self,
        paths: &[String],
        target: &Path,
        prompt: &mut dyn MediumPrompt,
    ) -> ArcdResult<RestoreReport> {
        let target_name = target.display().to_string();
        let scope = ObservationScope::with_fields("RESTORE", &[("target", target_name.as_str())]);
        if let Err(e) = fs::create_dir_all(target) {
            let error = ArcdError::io_error_at_path(target, e).into_fatal();
            scope.fail(error.message(), true);
            return Err(error);
        }

        let (mut pending, failures) = self.resolve(paths);
        let mut report = RestoreReport {
            files: pending.len(),
            failures,
            ..RestoreReport::default()
        };

        let extractor = Extractor::new(self.container, target);
        pending.retain(|_, entry| !extractor.is_restored(entry));
        report.already_present = report.files - pending.len();

        let mut skipped: BTreeSet<String> = BTreeSet::new();
        let mut failed_on: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut last_error: BTreeMap<String, ItemFailure> = BTreeMap::new();
        let mut first_volume = true;

        report.planned = plan_cover(&copies_of(&pending), |_, _| true)
            .labels()
            .into_iter()
            .map(str::to_string)
            .collect();

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                report.aborted = true;
                break;
            }

            let plan = plan_cover(&copies_of(&pending), |path, label| {
                !skipped.contains(label)
                    && !failed_on.get(path).map(|l| l.contains(label)).unwrap_or(false)
            });
            for path in plan.unrecoverable {
                let entry = pending.remove(&path);
                let failure = last_error.remove(&path).unwrap_or_else(|| {
                    let copies: Vec<String> = entry
                        .map(|e| e.copies.into_iter().collect())
                        .unwrap_or_default();
                    ItemFailure::new(&path, &ArcdError::unavailable(&copies.join(", ")))
                });
                report.failures.push(failure);
            }

            let Some(next) = plan.volumes.into_iter().next() else {
                break;
            };

            let mut step = RestoreStep::new(&next.label, next.paths.len());
            let Some(volume) = self.acquire(&mut step, prompt) else {
                if step.state == StepState::Aborted {
                    report.aborted = true;
                    report.steps.push(step);
                    break;
                }
                skipped.insert(next.label);
                report.steps.push(step);
                continue;
            };

            let wanted: BTreeMap<String, FileEntry> = next
                .paths
                .iter()
                .filter_map(|p| pending.get(p).map(|e| (p.clone(), e.clone())))
                .collect();
            let extraction = extractor.extract(&volume, &wanted);

            step.restored = extraction.restored.len();
            for path in extraction.restored {
                pending.remove(&path);
                report.restored.push(path);
            }
            for failure in extraction.failed {
                failed_on
                    .entry(failure.item.clone())
                    .or_default()
                    .insert(next.label.clone());
                last_error.insert(failure.item.clone(), failure.clone());
                report.mismatches.push(failure);
            }
            step.advance(StepState::Extracted);
            report.steps.push(step);

            if first_volume {
                first_volume = false;
                maybe_crash(points::RESTORE_AFTER_FIRST_VOLUME);
            }
        }

        if report.aborted {
            for path in pending.into_keys() {
                report
                    .failures
                    .push(ItemFailure::new(path, &ArcdError::cancelled()));
            }
        }

        let restored = report.restored.len().to_string();
        let failed = report.failures.len().to_string();
        scope.complete_with_fields(&[("restored", restored.as_str()), ("failed", failed.as_str())]);
        Ok(report)
    }

    /// Expand requested paths into index entries; unknown and conflicted
    /// paths become failures
    fn resolve(&self, paths: &[String]) -> (BTreeMap<String, FileEntry>, Vec<ItemFailure>) {
        let index = &self.state.index;
        let mut wanted = BTreeMap::new();
        let mut failures = Vec::new();

        for requested in paths {
            let entries = match index.expand(requested) {
                Ok(entries) => entries,
                Err(e) => {
                    failures.push(ItemFailure::new(requested, &e));
                    continue;
                }
            };
            for entry in entries {
                if wanted.contains_key(&entry.path) {
                    continue;
                }
                match index.lookup(&entry.path) {
                    Ok(_) => {
                        wanted.insert(entry.path.clone(), entry.clone());
                    }
                    Err(e) => {
                        if !failures.iter().any(|f: &ItemFailure| f.item == entry.path) {
                            failures.push(ItemFailure::new(&entry.path, &e));
                        }
                    }
                }
            }
        }
        (wanted, failures)
    }

    /// Drive one step until its volume is available, skipped or aborted
    ///
    /// One deadline covers both the prompt and the polling after it. A
    /// timeout too large to express as an instant waits until cancelled.
    fn acquire(&self, step: &mut RestoreStep, prompt: &mut dyn MediumPrompt) -> Option<DiscoveredVolume> {
        let label = step.label.clone();

        if let Some(volume) = self.find(&label) {
            step.advance(StepState::Available);
            log_event_with_fields(Event::MediumAvailable, &[("label", label.as_str())]);
            return Some(volume);
        }

        step.advance(StepState::WaitingForMedium);
        log_event_with_fields(Event::MediumRequested, &[("label", label.as_str())]);
        let deadline = Instant::now().checked_add(self.options.timeout);
        let last_location = self
            .state
            .registry
            .get(&label)
            .and_then(|v| v.location.as_deref());
        let response = if self.cancel.load(Ordering::SeqCst) {
            PromptResponse::Abort
        } else {
            prompt.request(&MediumRequest {
                label: &label,
                last_location,
                files: step.paths,
                deadline,
                cancel: &self.cancel,
            })
        };
        match response {
            PromptResponse::Ready => {}
            PromptResponse::Skip => {
                step.skip("skipped by operator");
                log_event_with_fields(
                    Event::MediumSkipped,
                    &[("label", label.as_str()), ("reason", "operator")],
                );
                return None;
            }
            PromptResponse::Expired => {
                self.expire(step);
                return None;
            }
            PromptResponse::Abort => {
                step.advance(StepState::Aborted);
                return None;
            }
        }

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                step.advance(StepState::Aborted);
                return None;
            }
            if let Some(volume) = self.find(&label) {
                step.advance(StepState::Available);
                log_event_with_fields(Event::MediumAvailable, &[("label", label.as_str())]);
                return Some(volume);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        self.expire(step);
                        return None;
                    }
                    left.min(self.options.poll_interval)
                }
                None => self.options.poll_interval,
            };
            thread::sleep(pause);
        }
    }

    fn expire(&self, step: &mut RestoreStep) {
        let reason = format!("not available within {}s", self.options.timeout.as_secs());
        log_event_with_fields(
            Event::MediumSkipped,
            &[("label", step.label.as_str()), ("reason", reason.as_str())],
        );
        step.skip(reason);
    }

    fn find(&self, label: &str) -> Option<DiscoveredVolume> {
        self.discovery.discover().get(label).cloned()
    }
}

fn copies_of(entries: &BTreeMap<String, FileEntry>) -> BTreeMap<String, BTreeSet<String>> {
    entries
        .iter()
        .map(|(path, entry)| (path.clone(), entry.copies.clone()))
        .collect()
}
