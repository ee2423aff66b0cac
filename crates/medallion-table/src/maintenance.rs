//! Table maintenance: compaction, Z-order clustering, vacuum.

use chrono::{DateTime, Duration, Utc};
use medallion_core::zorder::z_order;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, TableError};
use crate::manifest::{DataFile, Operation};
use crate::storage::list_files;
use crate::table::{data_file_timestamp_ms, TableStore, DATA_DIR};

/// How an optimize pass rewrote the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeStrategy {
    Compact,
    ZOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeMetrics {
    pub table: String,
    pub strategy: OptimizeStrategy,
    /// Version committed by this pass; `None` when there was nothing to do.
    pub version: Option<u64>,
    pub files_removed: usize,
    pub files_added: usize,
    pub rows_rewritten: u64,
    pub bytes_removed: u64,
    pub bytes_added: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VacuumMetrics {
    pub table: String,
    pub dry_run: bool,
    pub retention_hours: u64,
    /// Files deleted, or that would be deleted on a dry run.
    pub files_deleted: Vec<String>,
    pub bytes_deleted: u64,
    pub files_retained: usize,
}

/// First-fit decreasing: pack `files` into bins of at most `capacity` bytes.
fn bin_pack(mut files: Vec<DataFile>, capacity: u64) -> Vec<Vec<DataFile>> {
    files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    let mut bins: Vec<(u64, Vec<DataFile>)> = Vec::new();
    for file in files {
        match bins
            .iter_mut()
            .find(|(used, _)| used + file.size <= capacity)
        {
            Some((used, bin)) => {
                *used += file.size;
                bin.push(file);
            }
            None => bins.push((file.size, vec![file])),
        }
    }
    bins.into_iter().map(|(_, bin)| bin).collect()
}

impl TableStore {
    /// Rewrite the table's live files.
    ///
    /// With no columns, small files (below `target_file_size_bytes`) are
    /// bin-packed into larger ones; nothing happens unless at least two
    /// small files can be merged. With columns, every live file is rewritten
    /// in Z-order over those columns.
    pub async fn optimize(&self, table: &str, z_order_columns: &[&str]) -> Result<OptimizeMetrics> {
        let latest = self.require_latest(table).await?;

        let (strategy, rewrite): (OptimizeStrategy, Vec<Vec<DataFile>>) =
            if z_order_columns.is_empty() {
                let target = self.maintenance().target_file_size_bytes;
                let small: Vec<DataFile> = latest
                    .files
                    .iter()
                    .filter(|f| f.size < target)
                    .cloned()
                    .collect();
                let bins = if small.len() < 2 {
                    Vec::new()
                } else {
                    bin_pack(small, target)
                        .into_iter()
                        .filter(|bin| bin.len() > 1)
                        .collect()
                };
                (OptimizeStrategy::Compact, bins)
            } else {
                (OptimizeStrategy::ZOrder, vec![latest.files.clone()])
            };

        let mut metrics = OptimizeMetrics {
            table: table.to_string(),
            strategy,
            version: None,
            files_removed: 0,
            files_added: 0,
            rows_rewritten: 0,
            bytes_removed: 0,
            bytes_added: 0,
        };

        if rewrite.is_empty() {
            tracing::info!(table, "Nothing to compact");
            return Ok(metrics);
        }

        let mut removed: HashSet<String> = HashSet::new();
        let mut added: Vec<DataFile> = Vec::new();
        for group in &rewrite {
            let batch = self.read_files(table, group).await?;
            let batch = match strategy {
                OptimizeStrategy::ZOrder => z_order(&batch, z_order_columns)?,
                OptimizeStrategy::Compact => batch,
            };

            for file in group {
                metrics.bytes_removed += file.size;
                removed.insert(file.path.clone());
            }
            metrics.rows_rewritten += batch.num_rows() as u64;
            added.extend(self.write_data_files(table, &batch).await?);
        }

        metrics.files_removed = removed.len();
        metrics.files_added = added.len();
        metrics.bytes_added = added.iter().map(|f| f.size).sum();

        let mut files: Vec<DataFile> = latest
            .files
            .iter()
            .filter(|f| !removed.contains(&f.path))
            .cloned()
            .collect();
        files.extend(added);

        let mut parameters = BTreeMap::new();
        parameters.insert("strategy".to_string(), serde_json::json!(strategy));
        if !z_order_columns.is_empty() {
            parameters.insert("z_order_by".to_string(), serde_json::json!(z_order_columns));
        }

        let manifest = self
            .commit(
                table,
                latest.version + 1,
                Operation::Optimize,
                None,
                files,
                parameters,
            )
            .await?;
        metrics.version = Some(manifest.version);

        tracing::info!(
            "✓ Optimized {}: {} files → {} files (version {})",
            table,
            metrics.files_removed,
            metrics.files_added,
            manifest.version
        );
        Ok(metrics)
    }

    /// Delete data files no reader inside the retention window can need.
    ///
    /// Files of the latest version, of every version committed inside the
    /// window, and of the version that was current when the window opened
    /// are kept. Every other data file older than the window is deleted,
    /// including orphans never referenced by any version.
    pub async fn vacuum(
        &self,
        table: &str,
        retention_hours: Option<u64>,
        dry_run: bool,
    ) -> Result<VacuumMetrics> {
        self.vacuum_as_of(table, retention_hours, dry_run, Utc::now())
            .await
    }

    /// `vacuum` evaluated as if the current time were `now`.
    pub async fn vacuum_as_of(
        &self,
        table: &str,
        retention_hours: Option<u64>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<VacuumMetrics> {
        let maintenance = self.maintenance();
        let retention_hours = retention_hours.unwrap_or(maintenance.default_retention_hours);

        if retention_hours < maintenance.min_retention_hours {
            if maintenance.retention_check_enabled {
                return Err(TableError::retention_too_short(
                    retention_hours,
                    maintenance.min_retention_hours,
                ));
            }
            tracing::warn!(
                table,
                retention_hours,
                min_retention_hours = maintenance.min_retention_hours,
                "Vacuum retention below minimum; retention check disabled"
            );
        }

        let history = self.history(table).await?;
        // A window reaching past the representable range expires nothing.
        let cutoff_ms = i64::try_from(retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_sub_signed(window))
            .map_or(i64::MIN, |cutoff| cutoff.timestamp_millis());

        // history is newest first; the first version at or before the cutoff
        // was the one being read when the window opened.
        let mut protected: HashSet<&str> = HashSet::new();
        let mut window_opened = false;
        for manifest in &history {
            let keep = manifest.timestamp_ms > cutoff_ms || !window_opened;
            if manifest.timestamp_ms <= cutoff_ms {
                window_opened = true;
            }
            if keep {
                protected.extend(manifest.files.iter().map(|f| f.path.as_str()));
            }
        }

        let table_dir = self.table_dir(table)?;
        let data_dir = format!("{}{}", table_dir, DATA_DIR);
        let on_disk = list_files(self.operator(), &data_dir, ".parquet").await?;

        let mut metrics = VacuumMetrics {
            table: table.to_string(),
            dry_run,
            retention_hours,
            files_deleted: Vec::new(),
            bytes_deleted: 0,
            files_retained: 0,
        };

        for path in on_disk {
            let relative = path.strip_prefix(&table_dir).unwrap_or(&path);
            let expired = data_file_timestamp_ms(relative).is_some_and(|ts| ts <= cutoff_ms);
            if protected.contains(relative) || !expired {
                metrics.files_retained += 1;
                continue;
            }

            let size = self
                .operator()
                .stat(&path)
                .await
                .map_err(|e| TableError::storage(&path, e))?
                .content_length();

            if !dry_run {
                self.operator()
                    .delete(&path)
                    .await
                    .map_err(|e| TableError::storage(&path, e))?;
            }
            tracing::debug!(path = %path, size, dry_run, "Vacuum candidate");
            metrics.bytes_deleted += size;
            metrics.files_deleted.push(relative.to_string());
        }

        tracing::info!(
            "✓ Vacuumed {}: {} files {} ({} bytes)",
            table,
            metrics.files_deleted.len(),
            if dry_run { "would be deleted" } else { "deleted" },
            metrics.bytes_deleted
        );
        Ok(metrics)
    }
}
