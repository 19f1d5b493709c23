//! Batch upload orchestration.
//!
//! Drives each candidate file through the pipeline, one file at a time in
//! scan order:
//!
//! ```text
//! path ─▶ classify (first matching rule) ─▶ resolve accession ─▶ upload ─▶ reconcile
//!            │ no rule                          │ error            │ error     │ conflict
//!            ▼                                  ▼                  ▼           ▼
//!         skipped                             failed             failed      failed
//! ```
//!
//! Per-file errors become outcomes and never stop the batch; nothing is
//! retried within a run. Only setup problems (bad rules, unreachable
//! catalog or store) abort a run. Per-run state lives in [`BatchUploader`]
//! and is reset by [`BatchUploader::cleanup`] when every run ends.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::Instrument;
use uuid::Uuid;

use crate::catalog::{CatalogClient, ErmrestCatalog};
use crate::config::{Config, UploadConfig};
use crate::error::UploadError;
use crate::mapping::{base_name, classify, AssetMapping};
use crate::models::{BatchReport, FileOutcome, Outcome, Reconciliation};
use crate::progress::{UploadProgressEvent, UploadProgressReporter};
use crate::reconcile;
use crate::resolver::AccessionResolver;
use crate::scan::scan_directory;
use crate::store::{HatracStore, ObjectStore, ProgressCallback, TransferProgress};
use crate::transport::UploadTransport;

/// Per-run uploader. Catalog and store are borrowed, never owned.
pub struct BatchUploader<'a> {
    rules: &'a [AssetMapping],
    catalog: &'a dyn CatalogClient,
    transport: UploadTransport<'a>,
    reporter: &'a dyn UploadProgressReporter,
    resolver: AccessionResolver,
    outcomes: Vec<FileOutcome>,
}

impl<'a> BatchUploader<'a> {
    pub fn new(
        rules: &'a [AssetMapping],
        catalog: &'a dyn CatalogClient,
        store: &'a dyn ObjectStore,
        upload: &UploadConfig,
        reporter: &'a dyn UploadProgressReporter,
    ) -> Self {
        Self {
            rules,
            catalog,
            transport: UploadTransport::new(store, upload),
            reporter,
            resolver: AccessionResolver::new(),
            outcomes: Vec::new(),
        }
    }

    /// Run the pipeline over `files` and return what happened to each.
    ///
    /// Per-run caches and outcome lists are cleared before returning.
    pub async fn upload_files(&mut self, files: &[PathBuf]) -> BatchReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let span = tracing::info_span!("upload_run", run_id = %run_id);

        async {
            tracing::info!(files = files.len(), "starting upload run");
            let total = files.len() as u64;
            for (i, path) in files.iter().enumerate() {
                self.reporter.report(UploadProgressEvent::File {
                    n: i as u64 + 1,
                    total,
                    file_name: base_name(path),
                });
                let outcome = self.process_file(path).await;
                self.outcomes.push(FileOutcome {
                    path: path.clone(),
                    outcome,
                });
            }
        }
        .instrument(span)
        .await;

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes: std::mem::take(&mut self.outcomes),
            ambiguous: self.resolver.take_ambiguous(),
        };
        tracing::info!(
            uploaded = report.uploaded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "upload run finished"
        );
        self.cleanup();
        report
    }

    /// Classify, resolve, upload, and reconcile a single file.
    pub async fn process_file(&mut self, path: &Path) -> Outcome {
        let file_name = base_name(path);
        let Some(rule) = classify(self.rules, &file_name) else {
            tracing::debug!(file = %file_name, "no asset mapping matches, skipping");
            return Outcome::Skipped;
        };

        match self.upload_matched(path, &file_name, rule).await {
            Ok((url, reconciliation)) => {
                tracing::info!(file = %file_name, %url, ?reconciliation, "uploaded");
                Outcome::Uploaded {
                    url,
                    reconciliation,
                }
            }
            Err(e) => {
                tracing::error!(file = %file_name, kind = e.kind(), error = %e, "upload failed");
                Outcome::Failed(e)
            }
        }
    }

    async fn upload_matched(
        &mut self,
        path: &Path,
        file_name: &str,
        rule: &AssetMapping,
    ) -> Result<(String, Reconciliation), UploadError> {
        tracing::info!(file = file_name, rule = rule.synapse_file_type(), "processing file");
        let record = self.resolver.resolve(self.catalog, file_name, rule).await?;

        let reporter = self.reporter;
        let report_transfer = |p: TransferProgress| {
            reporter.report(UploadProgressEvent::Transfer {
                file_name: file_name.to_string(),
                sent: p.sent,
                total: p.total,
            })
        };
        let progress: ProgressCallback<'_> = &report_transfer;
        let url = self
            .transport
            .upload_for_record(path, file_name, &record, rule, Some(progress))
            .await?;

        let reconciliation = reconcile::reconcile(self.catalog, &record, &url, rule).await?;
        if reconciliation == Reconciliation::Written {
            self.resolver.record_binding(file_name, rule, &record, &url);
            tracing::info!(
                file = file_name,
                accession = %record.id_display(),
                table = %rule.table(),
                "updated catalog"
            );
        }
        Ok((url, reconciliation))
    }

    pub fn resolver(&self) -> &AccessionResolver {
        &self.resolver
    }

    /// Forget every per-run binding and outcome.
    pub fn cleanup(&mut self) {
        self.resolver.clear();
        self.outcomes.clear();
    }
}

/// Entry point for `synapse-upload upload <dir>`.
///
/// Returns an error after printing the summary when any file failed.
pub async fn run_upload(
    config: &Config,
    data_path: &Path,
    dry_run: bool,
    reporter: &dyn UploadProgressReporter,
) -> Result<()> {
    let rules = config.rules()?;

    reporter.report(UploadProgressEvent::Scanning {
        root: data_path.display().to_string(),
    });
    let files = scan_directory(data_path, &config.scan)?;

    if dry_run {
        print_dry_run(data_path, &files, &rules);
        return Ok(());
    }

    let cookie = config.credential()?;
    let client = reqwest::Client::builder()
        .user_agent(concat!("synapse-upload/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let base_url = config.server.base_url();
    let catalog = ErmrestCatalog::new(
        client.clone(),
        &base_url,
        &config.server.catalog_id,
        cookie.clone(),
    );
    let store = HatracStore::new(client, &base_url, cookie);

    catalog
        .check()
        .await
        .with_context(|| format!("Catalog is not reachable: {}", catalog.catalog_url()))?;
    store
        .check(&config.upload.object_root)
        .await
        .with_context(|| format!("Object store is not reachable: {}", base_url))?;

    let mut uploader = BatchUploader::new(&rules, &catalog, &store, &config.upload, reporter);
    let report = uploader.upload_files(&files).await;
    print_summary(data_path, &report);

    if report.failed() > 0 {
        bail!("{} of {} file(s) failed", report.failed(), files.len());
    }
    Ok(())
}

fn print_dry_run(data_path: &Path, files: &[PathBuf], rules: &[AssetMapping]) {
    println!("upload {} (dry-run)", data_path.display());
    let mut matched = 0usize;
    for path in files {
        let name = base_name(path);
        match classify(rules, &name) {
            Some(rule) => {
                matched += 1;
                println!("  {:<16} {}", rule.synapse_file_type(), path.display());
            }
            None => println!("  {:<16} {}", "skipped", path.display()),
        }
    }
    println!("  files found: {}", files.len());
    println!("  matched: {}", matched);
    println!("  skipped: {}", files.len() - matched);
}

pub fn print_summary(data_path: &Path, report: &BatchReport) {
    let untracked = report.uploaded() - report.catalog_writes() - report.unchanged();
    println!("upload {}", data_path.display());
    println!("  run: {}", report.run_id);
    println!("  files: {}", report.outcomes.len());
    println!("  uploaded: {}", report.uploaded());
    println!("  catalog writes: {}", report.catalog_writes());
    println!("  unchanged: {}", report.unchanged());
    println!("  untracked: {}", untracked);
    println!("  skipped: {}", report.skipped());
    println!("  failed: {}", report.failed());
    for (path, err) in report.failures() {
        println!("    {} [{}] {}", path.display(), err.kind(), err);
    }
    if !report.ambiguous.is_empty() {
        println!("  ambiguous lookups: {}", report.ambiguous.len());
        for a in &report.ambiguous {
            println!("    {} ({} rows)", a.query, a.rows);
        }
    }
    let elapsed = report.finished_at - report.started_at;
    println!("  elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    println!("{}", if report.failed() == 0 { "ok" } else { "failed" });
}
