//! External tool wrappers: kubectl, docker and shell hook bodies
//!
//! Every call runs through `tokio::process::Command` with a hard timeout.
//! A non-zero exit surfaces the full argv and the tool's stderr, so the
//! failing invocation can be replayed by hand.

use miette::{miette, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use berth_core::RenderContext;

/// Run an external tool to completion, optionally feeding stdin
pub async fn run_tool(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<String> {
    let argv = format!("{program} {}", args.join(" "));
    debug!(%argv, "running external tool");

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| miette!("failed to spawn {program}: {e}"))?;

    if let Some(body) = stdin {
        let mut handle = child
            .stdin
            .take()
            .ok_or_else(|| miette!("failed to open stdin of {program}"))?;
        handle
            .write_all(body.as_bytes())
            .await
            .map_err(|e| miette!("failed to write to {program} stdin: {e}"))?;
        drop(handle);
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| miette!("timed out after {}s: {argv}", timeout.as_secs()))?
        .map_err(|e| miette!("failed to run {argv}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(miette!("{argv} failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Retry an operation with exponential backoff, up to `attempts` tries
pub async fn with_retries<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < attempts {
                    warn!(attempt, error = %e, "attempt failed, retrying in {}s", delay.as_secs());
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| miette!("no attempts were made")))
}

/// kubectl wrapper for applying and deleting manifest streams
pub struct Kubectl {
    timeout: Duration,
}

impl Kubectl {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn scoped(&self, namespace: &str, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::new();
        if !namespace.is_empty() {
            argv.push("-n".to_string());
            argv.push(namespace.to_string());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// `kubectl apply -f -` with the manifest stream on stdin
    pub async fn apply(&self, stream: &str, namespace: &str) -> Result<()> {
        let args = self.scoped(namespace, &["apply", "-f", "-"]);
        run_tool("kubectl", &args, Some(stream), self.timeout).await?;
        Ok(())
    }

    /// `kubectl delete -f -`; already-gone resources are not an error
    pub async fn delete(&self, stream: &str, namespace: &str) -> Result<()> {
        let args = self.scoped(namespace, &["delete", "--ignore-not-found=true", "-f", "-"]);
        run_tool("kubectl", &args, Some(stream), self.timeout).await?;
        Ok(())
    }

    /// Create the namespace if it does not exist yet
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        let args = vec!["create".to_string(), "namespace".to_string(), name.to_string()];
        match run_tool("kubectl", &args, None, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("AlreadyExists")
                || e.to_string().contains("already exists") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Block until a deployment's rollout completes
    pub async fn rollout_status(&self, deployment: &str, namespace: &str) -> Result<()> {
        let target = format!("deployment/{deployment}");
        let wait = format!("--timeout={}s", self.timeout.as_secs());
        let args = self.scoped(namespace, &["rollout", "status", &target, &wait]);
        // The rollout itself may take the full window on top of startup.
        run_tool("kubectl", &args, None, self.timeout * 2).await?;
        Ok(())
    }
}

/// docker wrapper for the service image build path
pub struct Docker {
    timeout: Duration,
}

impl Docker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `docker build -t <image> -f <dockerfile> <context>`
    pub async fn build(&self, context: &Path, dockerfile: &Path, image: &str) -> Result<()> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ];
        // Image builds dwarf every other call; give them a wide window.
        run_tool("docker", &args, None, self.timeout * 20).await?;
        Ok(())
    }

    pub async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let args = vec!["tag".to_string(), source.to_string(), target.to_string()];
        run_tool("docker", &args, None, self.timeout).await?;
        Ok(())
    }

    pub async fn push(&self, image: &str) -> Result<()> {
        let args = vec!["push".to_string(), image.to_string()];
        run_tool("docker", &args, None, self.timeout * 10).await?;
        Ok(())
    }

    pub async fn pull(&self, image: &str) -> Result<()> {
        let args = vec!["pull".to_string(), image.to_string()];
        run_tool("docker", &args, None, self.timeout * 10).await?;
        Ok(())
    }
}

/// Run a rendered hook body through `sh -c` in the project root
///
/// The variable table and the slot coordinates are exported into the
/// hook's environment, so bodies can read them without re-templating.
pub async fn run_shell(body: &str, ctx: &RenderContext, timeout: Duration) -> Result<()> {
    debug!(body, "running hook body");

    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg(body)
        .current_dir(&ctx.project_root)
        .env("BERTH_ENV", &ctx.env)
        .env("BERTH_NAMESPACE", &ctx.namespace)
        .env("BERTH_SLOT", ctx.slot.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in ctx.vars.iter() {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .map_err(|e| miette!("failed to spawn shell: {e}"))?;

    let status = tokio::time::timeout(timeout, child.wait())
        .await
        .map_err(|_| miette!("hook timed out after {}s", timeout.as_secs()))?
        .map_err(|e| miette!("failed to run hook: {e}"))?;

    if !status.success() {
        return Err(miette!("hook exited with {status}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retries_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(miette!("transient"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(2, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(miette!("still broken"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_kubectl_scoped_args() {
        let kubectl = Kubectl::new(Duration::from_secs(5));
        assert_eq!(
            kubectl.scoped("shop-ai-1", &["apply", "-f", "-"]),
            vec!["-n", "shop-ai-1", "apply", "-f", "-"]
        );
        assert_eq!(kubectl.scoped("", &["apply"]), vec!["apply"]);
    }
}
