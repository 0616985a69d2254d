use crate::{
    manifest::{BenchId, Manifest, ManifestEntry},
    store::ObjectStore,
};
use anyhow::{bail, Context};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The resolution state of one manifest entry. Transitions are monotonic:
/// `Pending` moves to exactly one of the terminal variants and never back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOutcome {
    Pending,
    Success { raw_table: String },
    Failure { stdout: String, stderr: String },
}

impl InstanceOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, InstanceOutcome::Pending)
    }
}

/// Polling state machine that resolves every manifest entry to a terminal
/// outcome by watching the object store. The collector is a pure reader; the
/// store is only ever written by the instances themselves.
pub struct Collector<'a> {
    store: &'a dyn ObjectStore,
    bucket: String,
    bench_id: BenchId,
}

impl<'a> Collector<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &str, bench_id: BenchId) -> Self {
        Collector {
            store,
            bucket: bucket.to_string(),
            bench_id,
        }
    }

    /// Reads the job set recorded at launch time. A missing manifest means
    /// the bench id is unknown, which is fatal rather than a poll outcome.
    pub async fn fetch_manifest(&self) -> anyhow::Result<Manifest> {
        let bytes = self
            .store
            .get(&self.bucket, &Manifest::key(&self.bench_id))
            .await?
            .with_context(|| format!("No instances found for bench id {}", self.bench_id))?;
        let raw = String::from_utf8(bytes).context("Manifest is not valid UTF-8")?;
        Manifest::parse(&raw)
    }

    /// Fetches a key, degrading transient store errors to "not yet there".
    /// The entry stays pending and is retried on the next cycle.
    async fn try_get(&self, key: &str) -> Option<String> {
        match self.store.get(&self.bucket, key).await {
            Ok(bytes) => bytes.map(|b| String::from_utf8_lossy(&b).to_string()),
            Err(e) => {
                warn!("transient error fetching {}: {:#}", key, e);
                None
            }
        }
    }

    async fn poll_entry(&self, entry: &ManifestEntry) -> InstanceOutcome {
        if let Some(raw_table) = self.try_get(&entry.result_key(&self.bench_id)).await {
            return InstanceOutcome::Success { raw_table };
        }

        let stdout = self.try_get(&entry.failure_out_key(&self.bench_id)).await;
        let stderr = self.try_get(&entry.failure_err_key(&self.bench_id)).await;
        match (stdout, stderr) {
            // an instance may write one artifact before the other; only the
            // complete pair counts as resolved-as-failed
            (Some(stdout), Some(stderr)) => InstanceOutcome::Failure { stdout, stderr },
            _ => InstanceOutcome::Pending,
        }
    }

    /// Runs one poll cycle over the entries still pending. Resolved entries
    /// are removed from `pending` and never fetched again.
    pub async fn poll_pass(
        &self,
        manifest: &Manifest,
        results: &mut [InstanceOutcome],
        pending: &mut Vec<usize>,
    ) {
        for &i in pending.iter() {
            let entry = &manifest.entries()[i];
            let outcome = self.poll_entry(entry).await;
            debug!("polled {}: {:?}", entry.instance_key(), outcome);
            results[i] = outcome;
        }
        pending.retain(|&i| results[i].is_pending());
    }

    /// Polls until every entry is terminal, sleeping `poll_interval` between
    /// cycles. Blocks indefinitely unless cancelled; cancellation exits the
    /// loop and leaves the store untouched.
    pub async fn collect(
        &self,
        manifest: &Manifest,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<InstanceOutcome>> {
        let mut results = vec![InstanceOutcome::Pending; manifest.len()];
        let mut pending: Vec<usize> = (0..manifest.len()).collect();

        loop {
            self.poll_pass(manifest, &mut results, &mut pending).await;
            if pending.is_empty() {
                return Ok(results);
            }

            eprintln!(
                "> benchmark not done; {} of {} instances pending - waiting {} seconds",
                pending.len(),
                manifest.len(),
                poll_interval.as_secs()
            );
            tokio::select! {
                _ = cancel.cancelled() => bail!("Collection cancelled"),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}
