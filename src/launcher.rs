use crate::{
    launch_plan::{build_launch_plan, BootstrapContext, Profile},
    manifest::{BenchId, Manifest},
    provision::{ClusterRequest, LaunchedInstance, Provisioner},
    store::ObjectStore,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};
use tracing::info;

/// Everything `launch_fleet` needs beyond its collaborators: the run
/// identity, what to run, and how to tag what gets launched.
pub struct LaunchSpec<'a> {
    pub bench_id: &'a BenchId,
    pub profile: Profile,
    pub bucket: &'a str,
    pub entry_module: &'a str,
    pub entry_args: &'a [String],
    pub driver_payload_b64: &'a str,
    pub owner: &'a str,
    pub expiry: DateTime<Utc>,
}

/// Launches one cluster per manifest entry.
///
/// The manifest is written durably to the object store *before* the first
/// provisioning call so a collector started concurrently, or after a crash
/// partway through launching, still discovers the complete intended job set.
/// Provisioning failures are fatal and not retried; entries whose cluster
/// never launched are left to the collector to diagnose.
pub async fn launch_fleet(
    store: &dyn ObjectStore,
    provisioner: &dyn Provisioner,
    spec: &LaunchSpec<'_>,
    manifest: &Manifest,
) -> anyhow::Result<Vec<LaunchedInstance>> {
    store
        .put(
            spec.bucket,
            &Manifest::key(spec.bench_id),
            manifest.render().into_bytes(),
        )
        .await
        .context("Failed to write the run manifest")?;
    info!(
        "wrote manifest with {} entries for bench id {}",
        manifest.len(),
        spec.bench_id
    );

    let mut launched = vec![];
    for entry in manifest.entries() {
        let ctx = BootstrapContext {
            bench_id: spec.bench_id,
            instance_key: entry.instance_key(),
            bucket: spec.bucket,
            entry_module: spec.entry_module,
            entry_args: spec.entry_args,
            driver_payload_b64: spec.driver_payload_b64,
        };
        let descriptors = build_launch_plan(spec.profile, &ctx)?;

        let request = ClusterRequest {
            descriptors: &descriptors,
            nonce: format!("{}-{}", spec.bench_id, entry.instance_key()),
            tags: vec![
                ("bench_id".to_string(), spec.bench_id.to_string()),
                ("bench_rev".to_string(), entry.revision.clone()),
                ("bench_i".to_string(), entry.trial.to_string()),
                ("LaunchedBy".to_string(), spec.owner.to_string()),
            ],
            expiry: spec.expiry,
            revision: entry.revision.clone(),
        };

        let instances = provisioner
            .launch_cluster(request)
            .await
            .with_context(|| format!("Failed to provision cluster {}", entry.instance_key()))?;
        launched.extend(instances);
    }

    Ok(launched)
}

/// Renders the launched instances as a table for the `start` summary.
pub fn render_instance_table(instances: &[LaunchedInstance]) -> String {
    let mut table_rows = rows![row![
        TableCell::builder("Instance").build(),
        TableCell::builder("Machine").build(),
        TableCell::builder("Type").build(),
        TableCell::builder("Revision").build(),
        TableCell::builder("Cluster").build()
    ]];
    for instance in instances {
        table_rows.push(row![
            TableCell::new(&instance.instance_id),
            TableCell::new(&instance.machine_name),
            TableCell::new(&instance.instance_type),
            TableCell::new(&instance.revision),
            TableCell::new(&instance.nonce)
        ]);
    }

    Table::builder()
        .rows(table_rows)
        .style(TableStyle::rounded())
        .build()
        .render()
}
