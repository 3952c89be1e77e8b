//! ConfigMap backend driven through the `kubectl` CLI
//!
//! The cluster control tool is a black box: argument lists in, YAML/JSON on
//! stdin, exit code and captured output back. Create-if-absent maps onto
//! `kubectl create` (the API server rejects a duplicate name), which makes
//! it safe under concurrent invocations without any locking here.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::record::SlotRecord;
use crate::SlotBackend;

/// Label applied to and selected on every backing ConfigMap
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by=berth";

/// Default per-call deadline
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Slot store backed by ConfigMaps in a fixed control namespace
#[derive(Debug, Clone)]
pub struct KubectlBackend {
    /// Control namespace holding the records
    namespace: String,

    /// Optional kubeconfig path passed through to every call
    kubeconfig: Option<PathBuf>,

    /// Per-call deadline
    timeout: Duration,
}

impl KubectlBackend {
    /// Create a backend for the given control namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kubeconfig: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Pass `--kubeconfig` on every call
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Override the per-call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one kubectl invocation, optionally piping stdin
    ///
    /// Returns captured stdout; a non-zero exit surfaces the argv and
    /// stderr, a missed deadline kills the child and surfaces the argv.
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<Vec<u8>> {
        let mut argv: Vec<String> = Vec::with_capacity(args.len() + 4);
        if let Some(kubeconfig) = &self.kubeconfig {
            argv.push("--kubeconfig".to_string());
            argv.push(kubeconfig.display().to_string());
        }
        argv.extend(["-n".to_string(), self.namespace.clone()]);
        argv.extend(args.iter().map(|a| a.to_string()));

        let rendered_cmd = format!("kubectl {}", argv.join(" "));
        debug!(command = %rendered_cmd, "running cluster tool");

        let mut command = Command::new("kubectl");
        command
            .args(&argv)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| StoreError::Backend {
            message: format!("failed to spawn kubectl: {e}"),
        })?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(input.as_bytes()).await?;
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| StoreError::Timeout {
                argv: rendered_cmd.clone(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("AlreadyExists") || stderr.contains("already exists") {
                return Err(StoreError::AlreadyExists { name: rendered_cmd });
            }
            if stderr.contains("NotFound") || stderr.contains("not found") {
                return Err(StoreError::RecordNotFound { name: rendered_cmd });
            }
            return Err(StoreError::Tool {
                argv: rendered_cmd,
                stderr,
            });
        }

        Ok(output.stdout)
    }

    /// Build the ConfigMap document for a record
    fn configmap_json(&self, record: &SlotRecord) -> String {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": record.name,
                "namespace": self.namespace,
                "labels": {
                    "app.kubernetes.io/managed-by": "berth",
                    "berth.dev/env": record.env,
                },
            },
            "data": record.to_data(),
        })
        .to_string()
    }
}

/// Shape of `kubectl get configmaps -o json`
#[derive(Debug, Deserialize)]
struct ConfigMapList {
    #[serde(default)]
    items: Vec<ConfigMapItem>,
}

#[derive(Debug, Deserialize)]
struct ConfigMapItem {
    metadata: ConfigMapMeta,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ConfigMapMeta {
    name: String,
}

#[async_trait]
impl SlotBackend for KubectlBackend {
    async fn create(&self, record: &SlotRecord) -> Result<()> {
        let body = self.configmap_json(record);
        match self.run(&["create", "-f", "-"], Some(&body)).await {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists { .. }) => Err(StoreError::AlreadyExists {
                name: record.name.clone(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<SlotRecord>> {
        let stdout = self
            .run(
                &["get", "configmaps", "-l", MANAGED_BY_LABEL, "-o", "json"],
                None,
            )
            .await?;

        let list: ConfigMapList = serde_json::from_slice(&stdout)?;
        Ok(list
            .items
            .iter()
            .map(|item| SlotRecord::from_data(&item.metadata.name, &item.data))
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.run(&["delete", "configmap", name], None).await {
            Ok(_) => Ok(()),
            Err(StoreError::RecordNotFound { .. }) => Err(StoreError::RecordNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn patch(&self, name: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let patch = serde_json::json!({ "data": fields }).to_string();
        self.run(
            &["patch", "configmap", name, "--type", "merge", "-p", &patch],
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configmap_json_shape() {
        let backend = KubectlBackend::new("berth-system");
        let record = SlotRecord::new("berth-slot-", 2, "ai", "shop-ai-2", 7, 0);

        let body: serde_json::Value =
            serde_json::from_str(&backend.configmap_json(&record)).unwrap();

        assert_eq!(body["kind"], "ConfigMap");
        assert_eq!(body["metadata"]["name"], "berth-slot-2");
        assert_eq!(body["metadata"]["namespace"], "berth-system");
        assert_eq!(
            body["metadata"]["labels"]["app.kubernetes.io/managed-by"],
            "berth"
        );
        assert_eq!(body["data"]["slot"], "2");
        assert_eq!(body["data"]["issue"], "7");
    }

    #[test]
    fn test_list_decoding() {
        let payload = r#"{
            "items": [
                {
                    "metadata": {"name": "berth-slot-1"},
                    "data": {
                        "slot": "1", "env": "ai", "namespace": "shop-ai-1",
                        "owner": "berth", "issue": "12", "pr": "0",
                        "createdAt": "2025-06-01T12:00:00+00:00"
                    }
                },
                {"metadata": {"name": "stray"}}
            ]
        }"#;

        let list: ConfigMapList = serde_json::from_str(payload).unwrap();
        let records: Vec<SlotRecord> = list
            .items
            .iter()
            .map(|item| SlotRecord::from_data(&item.metadata.name, &item.data))
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].slot, 1);
        assert_eq!(records[0].issue, 12);
        // Record with no data degrades instead of failing the listing.
        assert_eq!(records[1].slot, 0);
        assert_eq!(records[1].name, "stray");
    }

    #[test]
    fn test_builder() {
        let backend = KubectlBackend::new("ns")
            .with_kubeconfig("/tmp/kubeconfig")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(backend.namespace, "ns");
        assert_eq!(backend.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(backend.timeout, Duration::from_secs(5));
    }
}
