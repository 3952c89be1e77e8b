//! GitHub metadata through the `gh` CLI
//!
//! The issue or PR a slot is bound to contributes two things: labels that
//! carry variable overrides, and a place to leave lifecycle comments.
//! Everything here is best-effort from the caller's point of view; a
//! missing `gh` binary or a stale token must never block a deploy.

use miette::Result;
use serde::Deserialize;
use std::time::Duration;

use berth_core::Vars;

use crate::tools::run_tool;

/// Label prefix carrying a variable override, e.g. `berth:REPLICAS=3`
const OVERRIDE_LABEL_PREFIX: &str = "berth:";

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

/// Metadata shared by issues and pull requests
#[derive(Debug, Clone, Deserialize)]
pub struct SubjectInfo {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub url: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

pub struct Gh {
    timeout: Duration,
}

impl Gh {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Fetch metadata for the bound issue or PR, whichever is set
    pub async fn metadata(&self, issue: u64, pr: u64) -> Result<Option<SubjectInfo>> {
        if issue > 0 {
            return Ok(Some(self.view("issue", issue).await?));
        }
        if pr > 0 {
            return Ok(Some(self.view("pr", pr).await?));
        }
        Ok(None)
    }

    async fn view(&self, kind: &str, number: u64) -> Result<SubjectInfo> {
        let args = vec![
            kind.to_string(),
            "view".to_string(),
            number.to_string(),
            "--json".to_string(),
            "number,title,state,url,labels".to_string(),
        ];
        let output = run_tool("gh", &args, None, self.timeout).await?;
        serde_json::from_str(&output)
            .map_err(|e| miette::miette!("failed to decode gh {kind} output: {e}"))
    }

    /// Leave a comment on the bound issue or PR
    pub async fn comment(&self, issue: u64, pr: u64, body: &str) -> Result<()> {
        let (kind, number) = if issue > 0 {
            ("issue", issue)
        } else if pr > 0 {
            ("pr", pr)
        } else {
            return Ok(());
        };
        let args = vec![
            kind.to_string(),
            "comment".to_string(),
            number.to_string(),
            "--body".to_string(),
            body.to_string(),
        ];
        run_tool("gh", &args, None, self.timeout).await?;
        Ok(())
    }
}

/// Extract variable overrides from `berth:KEY=value` labels
///
/// Labels without the prefix or without a `=` are ignored; they are
/// ordinary labels, not configuration.
pub fn label_overrides(labels: &[Label]) -> Vars {
    let mut vars = Vars::new();
    for label in labels {
        let Some(rest) = label.name.strip_prefix(OVERRIDE_LABEL_PREFIX) else {
            continue;
        };
        if let Some((key, value)) = rest.split_once('=') {
            if !key.is_empty() {
                vars.set(key.trim(), value.trim());
            }
        }
    }
    vars
}
