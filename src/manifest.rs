use anyhow::{anyhow, bail, Context};
use nanoid::nanoid;
use std::fmt;

/// Object-store key of the manifest, relative to the bench id prefix.
pub const MANIFEST_KEY: &str = "MANIFEST";

/// Globally unique identifier for a single benchmark run. Generated once at
/// launch time and used as the key prefix for everything the run writes to
/// the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchId(String);

impl BenchId {
    pub fn generate() -> Self {
        BenchId(nanoid!(8, &nanoid::alphabet::SAFE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BenchId {
    fn from(id: &str) -> Self {
        BenchId(id.to_string())
    }
}

impl fmt::Display for BenchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One expected job of a benchmark run: a single trial of a single resolved
/// revision. Position within the manifest is significant, it fixes report row
/// ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub trial: u32,
    pub revision: String,
}

impl ManifestEntry {
    pub fn new(trial: u32, revision: &str) -> Self {
        ManifestEntry {
            trial,
            revision: revision.to_string(),
        }
    }

    /// The key under which this job addresses its result artifacts in the
    /// object store.
    pub fn instance_key(&self) -> String {
        format!("{}-{}", self.trial, self.revision)
    }

    pub fn result_key(&self, bench_id: &BenchId) -> String {
        format!("{}/{}.csv", bench_id, self.instance_key())
    }

    pub fn failure_out_key(&self, bench_id: &BenchId) -> String {
        format!("{}/{}-FAILURE.out", bench_id, self.instance_key())
    }

    pub fn failure_err_key(&self, bench_id: &BenchId) -> String {
        format!("{}/{}-FAILURE.err", bench_id, self.instance_key())
    }

    fn parse(key: &str) -> anyhow::Result<ManifestEntry> {
        let (trial, revision) = key
            .split_once('-')
            .with_context(|| format!("Malformed manifest entry: {}", key))?;
        let trial = trial
            .parse::<u32>()
            .with_context(|| format!("Malformed trial index in manifest entry: {}", key))?;
        if revision.is_empty() {
            bail!("Empty revision in manifest entry: {}", key);
        }
        Ok(ManifestEntry::new(trial, revision))
    }
}

/// The durable, ordered list of expected jobs for one benchmark run. Written
/// to the object store once, before any cluster is provisioned, and never
/// rewritten. The collector reads the job set from here verbatim rather than
/// re-deriving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Manifest { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key(bench_id: &BenchId) -> String {
        format!("{}/{}", bench_id, MANIFEST_KEY)
    }

    /// Renders the manifest as newline-separated instance keys, one line per
    /// entry in order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.instance_key());
            out.push('\n');
        }
        out
    }

    /// Exact inverse of [`Manifest::render`]. An empty manifest is rejected,
    /// a run with no jobs cannot exist.
    pub fn parse(raw: &str) -> anyhow::Result<Manifest> {
        let entries = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ManifestEntry::parse)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if entries.is_empty() {
            return Err(anyhow!("Manifest contains no instances"));
        }
        Ok(Manifest { entries })
    }
}
