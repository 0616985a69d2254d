use anyhow::{anyhow, Context};
use async_trait::async_trait;

/// Resolves a user-supplied revision specifier (branch, tag, `HEAD~2`, short
/// sha) to a canonical commit id.
#[async_trait]
pub trait RevisionResolver: Send + Sync {
    async fn resolve(&self, spec: &str) -> anyhow::Result<String>;
}

/// Resolver backed by the local git repository.
pub struct GitResolver;

#[async_trait]
impl RevisionResolver for GitResolver {
    async fn resolve(&self, spec: &str) -> anyhow::Result<String> {
        let output = tokio::process::Command::new("git")
            .args(["rev-parse", "--verify", spec])
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run git rev-parse. Is git installed?")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let error_message = String::from_utf8_lossy(&output.stderr).to_string();
            Err(anyhow!(
                "Unable to resolve revision {}: {}",
                spec,
                error_message
            ))
        }
    }
}
