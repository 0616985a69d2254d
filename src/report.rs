use crate::{
    collector::InstanceOutcome,
    manifest::{Manifest, ManifestEntry},
};
use anyhow::{bail, Context};
use csv::{ReaderBuilder, WriterBuilder};
use itertools::Itertools;
use std::io::Write;

/// Columns appended to every merged row, after the instance's own columns.
pub const APPENDED_COLUMNS: [&str; 3] = ["InstanceIndex", "Rev", "Trial"];

/// A successful instance's raw table, still unparsed.
pub struct InstanceTable<'a> {
    pub entry: &'a ManifestEntry,
    pub raw: &'a str,
}

/// Both captured logs of an instance whose benchmark exited non-zero.
pub struct FailureLogs<'a> {
    pub entry: &'a ManifestEntry,
    pub stdout: &'a str,
    pub stderr: &'a str,
}

/// Splits fully resolved outcomes into successes and failures, keeping
/// manifest order. A `Pending` outcome here is a caller bug: aggregation only
/// runs once collection has terminated.
pub fn partition_outcomes<'a>(
    manifest: &'a Manifest,
    results: &'a [InstanceOutcome],
) -> anyhow::Result<(Vec<InstanceTable<'a>>, Vec<FailureLogs<'a>>)> {
    if manifest.len() != results.len() {
        bail!(
            "Manifest has {} entries but {} outcomes were collected",
            manifest.len(),
            results.len()
        );
    }

    let mut tables = vec![];
    let mut failures = vec![];
    for (entry, outcome) in manifest.entries().iter().zip(results) {
        match outcome {
            InstanceOutcome::Pending => {
                bail!("Instance {} has not resolved yet", entry.instance_key())
            }
            InstanceOutcome::Success { raw_table } => tables.push(InstanceTable {
                entry,
                raw: raw_table,
            }),
            InstanceOutcome::Failure { stdout, stderr } => failures.push(FailureLogs {
                entry,
                stdout,
                stderr,
            }),
        }
    }

    Ok((tables, failures))
}

/// Merges the instance tables into a single report.
///
/// Every instance must have produced the same header, column names and order
/// both; the check runs once, over all instances, before a single row is
/// written. Row order is manifest order then per-instance row order, so the
/// output is byte-identical across repeated runs regardless of completion
/// timing.
pub fn merge_tables<W: Write>(tables: &[InstanceTable<'_>], out: W) -> anyhow::Result<()> {
    let mut parsed = vec![];
    for table in tables {
        let mut reader = ReaderBuilder::new().from_reader(table.raw.as_bytes());
        let header = reader
            .headers()
            .with_context(|| {
                format!(
                    "Failed to parse results of instance {}",
                    table.entry.instance_key()
                )
            })?
            .iter()
            .map(str::to_string)
            .collect_vec();
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| {
                format!(
                    "Failed to parse results of instance {}",
                    table.entry.instance_key()
                )
            })?;
        parsed.push((table.entry, header, rows));
    }

    let headers = parsed
        .iter()
        .map(|(_, header, _)| header.clone())
        .unique()
        .collect_vec();
    if headers.len() > 1 {
        bail!("Mismatched headers: {:?}", headers);
    }

    let mut writer = WriterBuilder::new().from_writer(out);

    let mut merged_header = headers.into_iter().next().unwrap_or_default();
    merged_header.extend(APPENDED_COLUMNS.iter().map(|c| c.to_string()));
    writer
        .write_record(&merged_header)
        .context("Failed to write report header")?;

    for (entry, _, rows) in &parsed {
        for (index, row) in rows.iter().enumerate() {
            let mut record = row.iter().map(str::to_string).collect_vec();
            record.push(index.to_string());
            record.push(entry.revision.clone());
            record.push(entry.trial.to_string());
            writer
                .write_record(&record)
                .with_context(|| format!("Failed to write row for {}", entry.instance_key()))?;
        }
    }
    writer.flush().context("Failed to flush report")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_of(keys: &[&str]) -> Manifest {
        Manifest::parse(&(keys.join("\n") + "\n")).expect("test manifest should parse")
    }

    fn success(raw: &str) -> InstanceOutcome {
        InstanceOutcome::Success {
            raw_table: raw.to_string(),
        }
    }

    fn merge_to_string(manifest: &Manifest, results: &[InstanceOutcome]) -> anyhow::Result<String> {
        let (tables, failures) = partition_outcomes(manifest, results)?;
        assert!(failures.is_empty());
        let mut out = vec![];
        merge_tables(&tables, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn merges_two_instances_in_manifest_order() -> anyhow::Result<()> {
        let manifest = manifest_of(&["0-abc123", "1-abc123"]);
        let results = vec![success("name,value\nfoo,1\n"), success("name,value\nbar,2\n")];

        let merged = merge_to_string(&manifest, &results)?;
        assert_eq!(
            merged,
            "name,value,InstanceIndex,Rev,Trial\n\
             foo,1,0,abc123,0\n\
             bar,2,0,abc123,1\n"
        );

        Ok(())
    }

    #[test]
    fn row_index_counts_within_each_instance() -> anyhow::Result<()> {
        let manifest = manifest_of(&["0-abc123"]);
        let results = vec![success("name,value\nfoo,1\nbar,2\n")];

        let merged = merge_to_string(&manifest, &results)?;
        assert_eq!(
            merged,
            "name,value,InstanceIndex,Rev,Trial\n\
             foo,1,0,abc123,0\n\
             bar,2,1,abc123,0\n"
        );

        Ok(())
    }

    #[test]
    fn merge_is_deterministic() -> anyhow::Result<()> {
        let manifest = manifest_of(&["0-aaa", "0-bbb", "1-aaa", "1-bbb"]);
        let results = vec![
            success("metric,ms\nload,10\n"),
            success("metric,ms\nload,11\n"),
            success("metric,ms\nload,12\n"),
            success("metric,ms\nload,13\n"),
        ];

        let first = merge_to_string(&manifest, &results)?;
        let second = merge_to_string(&manifest, &results)?;
        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn mismatched_headers_fail_without_partial_output() {
        let manifest = manifest_of(&["0-abc123", "1-abc123"]);
        let results = vec![success("name,value\nfoo,1\n"), success("value,name\n2,bar\n")];

        let (tables, _) = partition_outcomes(&manifest, &results).unwrap();
        let mut out = vec![];
        let err = merge_tables(&tables, &mut out).unwrap_err();

        assert!(err.to_string().contains("Mismatched headers"));
        assert!(out.is_empty());
    }

    #[test]
    fn differing_column_names_also_mismatch() {
        let manifest = manifest_of(&["0-abc123", "1-abc123"]);
        let results = vec![success("name,value\nfoo,1\n"), success("name,count\nbar,2\n")];

        let (tables, _) = partition_outcomes(&manifest, &results).unwrap();
        assert!(merge_tables(&tables, &mut vec![]).is_err());
    }

    #[test]
    fn failures_are_partitioned_with_their_logs() -> anyhow::Result<()> {
        let manifest = manifest_of(&["0-abc123", "1-abc123"]);
        let results = vec![
            success("name,value\nfoo,1\n"),
            InstanceOutcome::Failure {
                stdout: "some stdout".to_string(),
                stderr: "some stderr".to_string(),
            },
        ];

        let (tables, failures) = partition_outcomes(&manifest, &results)?;
        assert_eq!(tables.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entry.instance_key(), "1-abc123");
        assert_eq!(failures[0].stdout, "some stdout");
        assert_eq!(failures[0].stderr, "some stderr");

        Ok(())
    }

    #[test]
    fn pending_outcomes_are_rejected() {
        let manifest = manifest_of(&["0-abc123"]);
        let results = vec![InstanceOutcome::Pending];

        assert!(partition_outcomes(&manifest, &results).is_err());
    }
}
