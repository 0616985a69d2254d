pub mod bundle;
pub mod clap_args;
pub mod collector;
pub mod config;
pub mod job_matrix;
pub mod launch_plan;
pub mod launcher;
pub mod manifest;
pub mod provision;
pub mod report;
pub mod revisions;
pub mod store;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use collector::Collector;
use colored::Colorize;
use launch_plan::Profile;
use launcher::LaunchSpec;
use manifest::BenchId;
use provision::{LaunchedInstance, Provisioner};
use revisions::RevisionResolver;
use std::{io::Write, path::Path, time::Duration};
use store::ObjectStore;
use tokio_util::sync::CancellationToken;

pub struct StartOptions<'a> {
    pub profile: Profile,
    pub trials: u32,
    pub rev_specs: &'a [String],
    pub bench_script: &'a [String],
    pub bucket: &'a str,
    pub owner: &'a str,
    pub expiry: DateTime<Utc>,
    pub driver_dir: &'a Path,
}

/// Launches a full benchmark fleet: builds the job matrix, records the
/// manifest, provisions one cluster per job. Returns the generated bench id
/// and every instance that was launched.
pub async fn start(
    store: &dyn ObjectStore,
    provisioner: &dyn Provisioner,
    resolver: &dyn RevisionResolver,
    opts: &StartOptions<'_>,
) -> anyhow::Result<(BenchId, Vec<LaunchedInstance>)> {
    let (entry_module, entry_args) = opts
        .bench_script
        .split_first()
        .context("No benchmark script given")?;

    let manifest = job_matrix::build_matrix(opts.trials, opts.rev_specs, resolver).await?;
    let driver_payload_b64 = bundle::package_driver(opts.driver_dir)?;
    let bench_id = BenchId::generate();

    let spec = LaunchSpec {
        bench_id: &bench_id,
        profile: opts.profile,
        bucket: opts.bucket,
        entry_module,
        entry_args,
        driver_payload_b64: &driver_payload_b64,
        owner: opts.owner,
        expiry: opts.expiry,
    };
    let launched = launcher::launch_fleet(store, provisioner, &spec, &manifest).await?;

    Ok((bench_id, launched))
}

/// Blocks until every job of the given run has resolved, then either writes
/// the merged report to `out` or prints every failed instance's captured logs
/// to stderr and fails with the failure count. All-or-nothing: a run with any
/// failed instance produces no report at all.
pub async fn check<W: Write>(
    store: &dyn ObjectStore,
    bucket: &str,
    bench_id: &str,
    poll_interval: Duration,
    cancel: &CancellationToken,
    out: W,
) -> anyhow::Result<()> {
    let collector = Collector::new(store, bucket, BenchId::from(bench_id));
    let manifest = collector.fetch_manifest().await?;
    let results = collector.collect(&manifest, poll_interval, cancel).await?;

    let (tables, failures) = report::partition_outcomes(&manifest, &results)?;
    if !failures.is_empty() {
        for failure in &failures {
            eprintln!(
                "{}\nstdout:\n{}\nstderr:\n{}",
                format!("Run of instance {} failed", failure.entry.instance_key()).red(),
                failure.stdout,
                failure.stderr
            );
        }
        bail!("{} runs FAILED!", failures.len());
    }

    report::merge_tables(&tables, out)
}
