//! Batch orchestration of the extract → join → cleanup → sort pipeline.
//!
//! Drives the per-unit state machine with bounded worker pools at each
//! stage. An error in any single unit's task is caught at the task boundary,
//! recorded against that unit, and never prevents sibling units from
//! proceeding; only a batch with zero successfully extracted units skips its
//! join stage, and even then the run continues with the next batch.

pub mod discovery;
pub mod index;

use crate::config::PipelineConfig;
use crate::constants::{JOINED_DIR_NAME, LOG_DIR_NAME, PROCESSED_DIR_NAME};
use crate::error::{Era5Error, Result};
use crate::extract::VariableExtractor;
use crate::join::UnitJoiner;
use crate::models::{
    ExtractReport, JoinReport, ProcessingUnit, RunSummary, SortReport, UnitKey, UnitState,
};
use crate::schema::VariableRegistry;
use crate::sort::ChronologicalSorter;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, error, info, warn};

use self::index::{parse_joined_file_name, UnitIndex};

/// Memory usage fraction above which stage concurrency is halved
const MEMORY_PRESSURE_THRESHOLD: f64 = 0.8;

/// Orchestrates the full pipeline over all discovered processing units
pub struct BatchOrchestrator {
    input_root: PathBuf,
    output_root: PathBuf,
    config: PipelineConfig,
    extractor: Arc<VariableExtractor>,
    joiner: Arc<UnitJoiner>,
    sorter: Arc<ChronologicalSorter>,
    units: BTreeMap<UnitKey, ProcessingUnit>,
    index: UnitIndex,
    system_monitor: Arc<Mutex<System>>,
}

impl BatchOrchestrator {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let joiner = UnitJoiner::new(config.join.clone(), VariableRegistry::with_defaults())?;
        Ok(Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            extractor: Arc::new(VariableExtractor::new(config.extract.clone())),
            joiner: Arc::new(joiner),
            sorter: Arc::new(ChronologicalSorter::new(config.sort.clone())),
            config,
            units: BTreeMap::new(),
            index: UnitIndex::default(),
            system_monitor: Arc::new(Mutex::new(System::new())),
        })
    }

    /// Unit bookkeeping after a run
    pub fn units(&self) -> &BTreeMap<UnitKey, ProcessingUnit> {
        &self.units
    }

    /// Run the pipeline over every discovered unit.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let processed_dir = self.output_root.join(PROCESSED_DIR_NAME);
        let joined_dir = self.output_root.join(JOINED_DIR_NAME);
        let log_dir = self.output_root.join(LOG_DIR_NAME);
        for dir in [&processed_dir, &joined_dir, &log_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let (groups, skipped) =
            discovery::discover_raw_files(&self.input_root, self.config.year_range)?;
        let mut summary = RunSummary {
            units_discovered: groups.len(),
            files_skipped_no_key: skipped,
            ..Default::default()
        };
        if groups.is_empty() {
            warn!(input = %self.input_root.display(), "no raw files matched discovery criteria");
            return Ok(summary);
        }

        self.index = UnitIndex::scan(&self.output_root)?;
        for (&key, files) in &groups {
            let mut unit = ProcessingUnit::new(key);
            unit.raw_files = files.clone();
            self.units.insert(key, unit);
        }

        let keys: Vec<UnitKey> = groups.keys().copied().collect();
        let total_batches = keys.len().div_ceil(self.config.batch_size);
        info!(
            units = keys.len(),
            batches = total_batches,
            "starting pipeline run"
        );

        let progress = ProgressBar::new(keys.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        progress.set_message("Processing units");

        for (batch_num, batch) in keys.chunks(self.config.batch_size).enumerate() {
            info!(
                batch = batch_num + 1,
                total_batches,
                first = %batch[0],
                last = %batch[batch.len() - 1],
                "processing batch"
            );

            // Resume: deterministically named outputs make re-runs safe
            let mut pending: Vec<UnitKey> = Vec::new();
            for &key in batch {
                if !self.config.force_reprocess && self.index.is_joined(key) {
                    info!(%key, "joined output already on disk, skipping");
                    if let Some(unit) = self.units.get_mut(&key) {
                        unit.state = UnitState::Joined;
                        unit.joined_output = self.index.joined_output(key).map(Path::to_path_buf);
                    }
                    summary.units_resumed += 1;
                    progress.inc(1);
                } else {
                    pending.push(key);
                }
            }
            if pending.is_empty() {
                continue;
            }

            let extracted = self
                .run_extract_stage(&pending, &groups, &processed_dir, &log_dir, &mut summary)
                .await;

            if extracted.is_empty() {
                warn!(
                    batch = batch_num + 1,
                    "no units successfully extracted in this batch, skipping join stage"
                );
            } else {
                self.run_join_stage(&extracted, &processed_dir, &joined_dir, &log_dir, &mut summary)
                    .await;
            }
            progress.inc(pending.len() as u64);

            if batch_num + 1 < total_batches && self.config.batch_delay_secs > 0 {
                info!(
                    seconds = self.config.batch_delay_secs,
                    "waiting before next batch"
                );
                tokio::time::sleep(Duration::from_secs(self.config.batch_delay_secs)).await;
            }
        }
        progress.finish_with_message("All batches processed");

        if self.config.sort_chronologically {
            self.run_sort_pass(&log_dir, &mut summary).await;
        }

        Ok(summary)
    }

    /// Extraction stage: one task per raw file, bounded pool. A unit counts
    /// as extracted when at least one of its raw files succeeded.
    async fn run_extract_stage(
        &mut self,
        pending: &[UnitKey],
        groups: &BTreeMap<UnitKey, Vec<PathBuf>>,
        processed_dir: &Path,
        log_dir: &Path,
        summary: &mut RunSummary,
    ) -> Vec<UnitKey> {
        let mut tasks: Vec<(UnitKey, PathBuf)> = Vec::new();
        for &key in pending {
            if let Some(unit) = self.units.get_mut(&key) {
                unit.state = UnitState::Extracting;
            }
            for file in &groups[&key] {
                tasks.push((key, file.clone()));
            }
        }

        let workers = self.effective_workers(self.config.extract_workers).await;
        let outcomes: Vec<(UnitKey, PathBuf, Result<ExtractReport>)> = stream::iter(tasks)
            .map(|(key, file)| {
                let extractor = Arc::clone(&self.extractor);
                let processed_dir = processed_dir.to_path_buf();
                let log_dir = log_dir.to_path_buf();
                async move {
                    let task_file = file.clone();
                    let result = task::spawn_blocking(move || {
                        extractor.extract_file(&task_file, key, &processed_dir)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(Era5Error::Task {
                            reason: e.to_string(),
                        })
                    });

                    let file_stem = file
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| "input".to_string());
                    write_task_log(&log_dir, "extract", key, Some(&file_stem), &result);
                    (key, file, result)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut succeeded: BTreeSet<UnitKey> = BTreeSet::new();
        for (key, file, result) in outcomes {
            match result {
                Ok(report) => {
                    info!(
                        %key,
                        file = %file.display(),
                        variables = report.variables_extracted.len(),
                        failed = report.variables_failed.len(),
                        rows = report.rows_written,
                        "extraction complete"
                    );
                    succeeded.insert(key);
                    self.index.record_processed(key);
                }
                Err(e) => {
                    error!(%key, file = %file.display(), error = %e, "extraction task failed");
                }
            }
        }

        let mut extracted = Vec::new();
        for &key in pending {
            let state = if succeeded.contains(&key) {
                summary.extract_succeeded += 1;
                extracted.push(key);
                UnitState::Extracted
            } else {
                summary.extract_failed += 1;
                UnitState::ExtractFailed
            };
            if let Some(unit) = self.units.get_mut(&key) {
                unit.state = state;
            }
        }
        extracted
    }

    /// Join stage: one task per extracted unit, bounded pool, followed by
    /// optional cleanup of the unit's per-variable intermediates.
    async fn run_join_stage(
        &mut self,
        extracted: &[UnitKey],
        processed_dir: &Path,
        joined_dir: &Path,
        log_dir: &Path,
        summary: &mut RunSummary,
    ) {
        for &key in extracted {
            if let Some(unit) = self.units.get_mut(&key) {
                unit.state = UnitState::Joining;
            }
        }

        let extension = self.config.join.output_format.extension();
        let workers = self.effective_workers(self.config.join_workers).await;
        let outcomes: Vec<(UnitKey, PathBuf, Result<JoinReport>)> =
            stream::iter(extracted.to_vec())
                .map(|key| {
                    let joiner = Arc::clone(&self.joiner);
                    let processed_dir = processed_dir.to_path_buf();
                    let log_dir = log_dir.to_path_buf();
                    let output_path = joined_dir.join(key.year.to_string()).join(format!(
                        "{}.{extension}",
                        crate::constants::joined_file_stem(key.year, key.month)
                    ));
                    async move {
                        let task_output = output_path.clone();
                        let task_processed = processed_dir.clone();
                        let result = task::spawn_blocking(move || {
                            joiner.join_unit(&task_processed, key, &task_output)
                        })
                        .await
                        .unwrap_or_else(|e| {
                            Err(Era5Error::Task {
                                reason: e.to_string(),
                            })
                        });

                        write_task_log(&log_dir, "join", key, None, &result);
                        (key, output_path, result)
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;

        for (key, output_path, result) in outcomes {
            match result {
                Ok(report) => {
                    info!(
                        %key,
                        rows = report.rows,
                        joined = report.variables_joined.len(),
                        skipped = report.variables_skipped.len(),
                        "join complete"
                    );
                    summary.join_succeeded += 1;
                    self.index.record_joined(key, output_path.clone());
                    if let Some(unit) = self.units.get_mut(&key) {
                        unit.state = UnitState::Joined;
                        unit.joined_output = Some(output_path);
                    }
                    if !self.config.keep_processed {
                        self.cleanup_unit(key, processed_dir, summary);
                    }
                }
                Err(e) => {
                    error!(%key, error = %e, "join task failed");
                    summary.join_failed += 1;
                    if let Some(unit) = self.units.get_mut(&key) {
                        unit.state = UnitState::JoinFailed;
                    }
                }
            }
        }
    }

    /// Remove a unit's per-variable intermediates, only once its joined
    /// output is confirmed on disk. Failures are warning-grade.
    fn cleanup_unit(&mut self, key: UnitKey, processed_dir: &Path, summary: &mut RunSummary) {
        let joined_exists = self
            .index
            .joined_output(key)
            .map(|p| p.exists())
            .unwrap_or(false);
        if !joined_exists {
            warn!(%key, "joined output not found on disk, skipping cleanup");
            return;
        }

        let unit_dir = processed_dir
            .join(key.year.to_string())
            .join(format!("{:02}", key.month));
        if !unit_dir.exists() {
            return;
        }

        match std::fs::remove_dir_all(&unit_dir) {
            Ok(()) => {
                debug!(%key, dir = %unit_dir.display(), "removed intermediates");
                self.index.record_cleaned(key);
                summary.units_cleaned += 1;
                if let Some(unit) = self.units.get_mut(&key) {
                    unit.state = UnitState::Cleaned;
                }
            }
            Err(e) => {
                let warning = Era5Error::Cleanup {
                    path: unit_dir,
                    reason: e.to_string(),
                };
                warn!(%key, warning = %warning, "cleanup failed");
            }
        }
    }

    /// Whole-run sort pass over every known joined output, including those
    /// produced by earlier runs.
    async fn run_sort_pass(&mut self, log_dir: &Path, summary: &mut RunSummary) {
        let files: Vec<PathBuf> = self
            .index
            .all_joined_outputs()
            .into_iter()
            .filter(|p| p.exists())
            .collect();
        if files.is_empty() {
            info!("no joined files to sort");
            return;
        }
        info!(files = files.len(), "starting chronological sort pass");

        let batch_size = self.config.sort.batch_size.max(1);
        let batches: Vec<Vec<PathBuf>> = files.chunks(batch_size).map(|c| c.to_vec()).collect();
        let workers = self.effective_workers(self.config.sort_workers).await;

        let outcomes: Vec<Vec<(PathBuf, Result<SortReport>)>> = stream::iter(batches)
            .map(|batch| {
                let sorter = Arc::clone(&self.sorter);
                let log_dir = log_dir.to_path_buf();
                async move {
                    task::spawn_blocking(move || {
                        batch
                            .into_iter()
                            .map(|path| {
                                let result = sorter.sort_file(&path);
                                if let Some(key) = parse_joined_file_name(&path) {
                                    write_task_log(&log_dir, "sort", key, None, &result);
                                }
                                (path, result)
                            })
                            .collect::<Vec<_>>()
                    })
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "sort worker task failed");
                        Vec::new()
                    })
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        for (path, result) in outcomes.into_iter().flatten() {
            let key = parse_joined_file_name(&path);
            match result {
                Ok(report) => {
                    summary.sort_succeeded += 1;
                    if !report.time_parsed {
                        warn!(file = %path.display(), "sorted lexicographically, not temporally");
                    }
                    if let Some(unit) = key.and_then(|k| self.units.get_mut(&k)) {
                        unit.state = UnitState::Sorted;
                    }
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "sort failed");
                    summary.sort_failed += 1;
                    if let Some(unit) = key.and_then(|k| self.units.get_mut(&k)) {
                        unit.state = UnitState::SortFailed;
                    }
                }
            }
        }
    }

    /// Check if system is under memory pressure
    async fn check_memory_pressure(&self) -> bool {
        let mut system = self.system_monitor.lock().await;
        system.refresh_memory();

        let used = system.used_memory() as f64;
        let total = system.total_memory() as f64;
        if total == 0.0 {
            return false;
        }
        used / total > MEMORY_PRESSURE_THRESHOLD
    }

    async fn effective_workers(&self, configured: usize) -> usize {
        let mut workers = configured.max(1);
        if self.check_memory_pressure().await {
            workers = (workers / 2).max(1);
            debug!(workers, "memory pressure detected, reducing concurrency");
        }
        workers
    }
}

/// One log file per task attempt:
/// `logs/<kind>_<year>_<month>[_<file>].log`
fn write_task_log<T: std::fmt::Debug>(
    log_dir: &Path,
    kind: &str,
    key: UnitKey,
    file_stem: Option<&str>,
    result: &Result<T>,
) {
    let name = match file_stem {
        Some(stem) => format!("{kind}_{}_{:02}_{stem}.log", key.year, key.month),
        None => format!("{kind}_{}_{:02}.log", key.year, key.month),
    };
    let body = match result {
        Ok(report) => format!("status: ok\n{report:#?}\n"),
        Err(e) => format!("status: failed\nerror: {e}\n"),
    };
    if let Err(e) = std::fs::write(log_dir.join(&name), body) {
        warn!(log = name.as_str(), error = %e, "could not write task log");
    }
}
