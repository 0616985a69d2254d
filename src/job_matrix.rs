use crate::{
    manifest::{Manifest, ManifestEntry},
    revisions::RevisionResolver,
};
use itertools::Itertools;

/// Builds the job matrix for a run: the cross product of trial indices and
/// resolved revisions, in trial-major order (outer loop over trials, inner
/// over revisions). The collector and the report both depend on this ordering,
/// so it must never change.
///
/// # Arguments
///
/// * trials - number of trials to run per revision, must be at least 1
/// * rev_specs - revision specifiers as given on the command line
/// * resolver - resolves each specifier to a canonical commit id
pub async fn build_matrix(
    trials: u32,
    rev_specs: &[String],
    resolver: &dyn RevisionResolver,
) -> anyhow::Result<Manifest> {
    // resolve each spec exactly once, keeping command-line order
    let mut revisions = vec![];
    for spec in rev_specs {
        revisions.push(resolver.resolve(spec).await?);
    }

    let entries = (0..trials)
        .cartesian_product(revisions)
        .map(|(trial, revision)| ManifestEntry { trial, revision })
        .collect_vec();

    Ok(Manifest::new(entries))
}
