//! Manifest rendering engine
//!
//! Consumes the stack model and a per-invocation context and produces the
//! concrete ordered sequence of resource documents: infrastructure groups
//! first, then services, declaration order within each. Service documents
//! are post-processed (namespace injection, image resolution, host-mount
//! overlay, drop-kind filtering); infrastructure manifests pass through
//! untouched. Any file-read, template or decode error aborts the whole
//! render; partial output is never returned.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use berth_core::{resolve_environment, EnvironmentSpec, RenderContext, Stack, Vars};
use serde_yaml::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::functions::truthy_when;
use crate::postprocess;
use crate::renderer::Renderer;

/// "only"/"skip" name sets restricting which items are rendered
///
/// Comparison is case-insensitive: names are lowercased on construction.
#[derive(Debug, Clone, Default)]
pub struct RenderFilters {
    only: Option<HashSet<String>>,
    skip: HashSet<String>,
}

impl RenderFilters {
    /// Build filters from raw name lists
    pub fn new(only: &[String], skip: &[String]) -> Self {
        let only = if only.is_empty() {
            None
        } else {
            Some(only.iter().map(|n| n.to_lowercase()).collect())
        };
        Self {
            only,
            skip: skip.iter().map(|n| n.to_lowercase()).collect(),
        }
    }

    /// An item is rendered iff it passes "only" (when set) and is not skipped
    pub fn includes(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if let Some(only) = &self.only {
            if !only.contains(&name) {
                return false;
            }
        }
        !self.skip.contains(&name)
    }
}

/// One rendered resource document, tagged with its origin for error context
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    /// Infra group or service name the document came from
    pub item: String,

    /// Source manifest file
    pub file: PathBuf,

    /// The document body
    pub body: Value,
}

/// Render the full stack into an ordered document sequence
pub fn render_stack(
    stack: &Stack,
    ctx: &RenderContext,
    filters: &RenderFilters,
) -> Result<Vec<RenderedDocument>> {
    let renderer = Renderer::new().with_project(&stack.project);
    let overlay = environment_overlay(stack, &ctx.env)?;

    // Environment-declared vars act as defaults under the invocation
    // table: process env, env files and --set overrides all keep
    // precedence over them.
    let ctx = if overlay.vars.is_empty() {
        ctx.clone()
    } else {
        let mut vars: Vars = overlay
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.merge(&ctx.vars);
        RenderContext {
            vars,
            ..ctx.clone()
        }
    };
    let ctx = &ctx;

    let mut documents = Vec::new();

    for group in &stack.infrastructure {
        if !filters.includes(&group.name) {
            debug!(item = %group.name, "filtered out");
            continue;
        }
        if !when_included(&renderer, ctx, &group.name, group.when.as_deref())? {
            debug!(item = %group.name, "excluded by when");
            continue;
        }

        for file in &group.manifests {
            let docs = render_manifest_file(&renderer, ctx, &group.name, file)?;
            documents.extend(docs);
        }
    }

    for service in &stack.services {
        if !filters.includes(&service.name) {
            debug!(item = %service.name, "filtered out");
            continue;
        }
        if !when_included(&renderer, ctx, &service.name, service.when.as_deref())? {
            debug!(item = %service.name, "excluded by when");
            continue;
        }

        for file in &service.manifests {
            for mut doc in render_manifest_file(&renderer, ctx, &service.name, file)? {
                if postprocess::is_dropped_kind(&doc.body, &overlay.drop_kinds) {
                    debug!(item = %service.name, file = %doc.file.display(), "kind dropped");
                    continue;
                }
                postprocess::inject_namespace(&mut doc.body, &ctx.namespace);
                if let Some(image) = &service.image {
                    postprocess::resolve_image(
                        &mut doc.body,
                        &service.name,
                        image,
                        &renderer,
                        ctx,
                    )?;
                }
                postprocess::apply_host_mounts(&mut doc.body, &overlay.mounts);
                documents.push(doc);
            }
        }
    }

    Ok(documents)
}

/// Serialize documents as a multi-document YAML stream in render order
pub fn encode_documents(documents: &[RenderedDocument]) -> Result<String> {
    let mut out = String::new();
    for doc in documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&doc.body)?);
    }
    Ok(out)
}

/// Resolve the active environment's overlay, tolerating undeclared names
///
/// A stack without an `environments` entry for the active name gets an
/// empty overlay: namespace patterns alone are a valid way to define an
/// environment. A declared name always goes through inheritance resolution.
fn environment_overlay(stack: &Stack, env: &str) -> Result<EnvironmentSpec> {
    if env.is_empty() || !stack.environments.contains_key(env) {
        return Ok(EnvironmentSpec::default());
    }
    Ok(resolve_environment(stack, env)?)
}

/// Evaluate an item's `when` expression against the current context
///
/// A render error is fatal, never treated as "false". Shared with the
/// hook executor, which gates steps on the same expression form.
pub fn when_included(
    renderer: &Renderer,
    ctx: &RenderContext,
    item: &str,
    when: Option<&str>,
) -> Result<bool> {
    match when {
        Some(expr) => {
            let rendered = renderer.render(&format!("{item}.when"), expr, ctx)?;
            Ok(truthy_when(&rendered))
        }
        None => Ok(true),
    }
}

/// Read, template-render and decode one manifest file
///
/// Splits the rendered text into documents; comment-only and empty
/// documents are silently dropped.
fn render_manifest_file(
    renderer: &Renderer,
    ctx: &RenderContext,
    item: &str,
    file: &Path,
) -> Result<Vec<RenderedDocument>> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        ctx.project_root.join(file)
    };

    let raw = std::fs::read_to_string(&path).map_err(|e| EngineError::ManifestRead {
        item: item.to_string(),
        file: path.display().to_string(),
        message: e.to_string(),
    })?;

    let rendered = renderer.render(&path.display().to_string(), &raw, ctx)?;

    let mut documents = Vec::new();
    for chunk in rendered.split("\n---") {
        let chunk = chunk.trim().trim_start_matches("---").trim();
        if chunk.is_empty() {
            continue;
        }
        if chunk
            .lines()
            .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        {
            continue;
        }

        let body: Value =
            serde_yaml::from_str(chunk).map_err(|e| EngineError::ManifestParse {
                item: item.to_string(),
                file: path.display().to_string(),
                message: e.to_string(),
            })?;

        if body.is_null() {
            continue;
        }

        documents.push(RenderedDocument {
            item: item.to_string(),
            file: path.clone(),
            body,
        });
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::Vars;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn test_stack() -> Stack {
        Stack::from_yaml(
            r#"
project: shop
environments:
  staging:
    mounts:
      - name: src
        hostPath: /srv/src
        mountPath: /app/src
    dropKinds: [Ingress]
infrastructure:
  - name: postgres
    manifests: [infra/postgres.yaml]
  - name: kafka
    manifests: [infra/kafka.yaml]
    when: "{{ env_or('WITH_KAFKA', '') }}"
services:
  - name: api
    manifests: [services/api.yaml]
    image:
      repository: registry/svc
      tagTemplate: "{{ env }}-build"
"#,
        )
        .unwrap()
    }

    fn write_fixtures(dir: &Path) {
        write_file(
            dir,
            "infra/postgres.yaml",
            "kind: StatefulSet\nmetadata:\n  name: postgres\n",
        );
        write_file(
            dir,
            "infra/kafka.yaml",
            "kind: StatefulSet\nmetadata:\n  name: kafka\n",
        );
        write_file(
            dir,
            "services/api.yaml",
            r#"kind: Deployment
metadata:
  name: api
spec:
  template:
    spec:
      containers:
        - name: api
          image: registry/svc:old
---
kind: Service
metadata:
  name: api
---
kind: Ingress
metadata:
  name: api
"#,
        );
    }

    fn test_ctx(root: &Path) -> RenderContext {
        RenderContext::new("staging", root, Vars::new())
            .with_namespace("shop-staging-1")
            .with_slot(1)
            .with_now(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_render_order_and_postprocessing() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let ctx = test_ctx(dir.path());

        let docs = render_stack(&test_stack(), &ctx, &RenderFilters::default()).unwrap();

        // postgres (infra), then api Deployment + Service; kafka excluded by
        // when (unset var renders empty), Ingress dropped by overlay.
        let names: Vec<_> = docs
            .iter()
            .map(|d| postprocess::name_of(&d.body).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["postgres", "api", "api"]);

        // Infra untouched: no namespace injected.
        assert!(docs[0].body["metadata"].get("namespace").is_none());

        // Service documents got namespace + image + mounts.
        let deployment = &docs[1].body;
        assert_eq!(
            deployment["metadata"]["namespace"].as_str(),
            Some("shop-staging-1")
        );
        assert_eq!(
            deployment["spec"]["template"]["spec"]["containers"][0]["image"].as_str(),
            Some("registry/svc:staging-build")
        );
        assert_eq!(
            deployment["spec"]["template"]["spec"]["volumes"][0]["name"].as_str(),
            Some("src")
        );

        let service = &docs[2].body;
        assert_eq!(
            service["metadata"]["namespace"].as_str(),
            Some("shop-staging-1")
        );
    }

    #[test]
    fn test_when_includes_on_truthy_var() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());

        let vars: Vars = [("WITH_KAFKA".to_string(), "yes".to_string())]
            .into_iter()
            .collect();
        let ctx = RenderContext::new("staging", dir.path(), vars);

        let docs = render_stack(&test_stack(), &ctx, &RenderFilters::default()).unwrap();
        assert!(docs
            .iter()
            .any(|d| postprocess::name_of(&d.body) == Some("kafka")));
    }

    #[test]
    fn test_environment_vars_reach_templates() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "services/api.yaml",
            "kind: ConfigMap\nmetadata:\n  name: api\ndata:\n  level: \"{{ vars.LOG_LEVEL }}\"\n",
        );
        let stack = Stack::from_yaml(
            r#"
project: shop
environments:
  staging:
    vars:
      LOG_LEVEL: debug
services:
  - name: api
    manifests: [services/api.yaml]
"#,
        )
        .unwrap();

        let ctx = RenderContext::new("staging", dir.path(), Vars::new());
        let docs = render_stack(&stack, &ctx, &RenderFilters::default()).unwrap();
        assert_eq!(docs[0].body["data"]["level"].as_str(), Some("debug"));

        // The invocation table keeps precedence over the environment's vars.
        let vars: Vars = [("LOG_LEVEL".to_string(), "trace".to_string())]
            .into_iter()
            .collect();
        let ctx = RenderContext::new("staging", dir.path(), vars);
        let docs = render_stack(&stack, &ctx, &RenderFilters::default()).unwrap();
        assert_eq!(docs[0].body["data"]["level"].as_str(), Some("trace"));
    }

    #[test]
    fn test_only_and_skip_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let ctx = test_ctx(dir.path());
        let stack = test_stack();

        let only = RenderFilters::new(&["API".to_string()], &[]);
        let docs = render_stack(&stack, &ctx, &only).unwrap();
        assert!(docs.iter().all(|d| d.item == "api"));

        let skip = RenderFilters::new(&[], &["api".to_string()]);
        let docs = render_stack(&stack, &ctx, &skip).unwrap();
        assert!(docs.iter().all(|d| d.item != "api"));
    }

    #[test]
    fn test_missing_manifest_aborts_whole_render() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        std::fs::remove_file(dir.path().join("services/api.yaml")).unwrap();
        let ctx = test_ctx(dir.path());

        let err = render_stack(&test_stack(), &ctx, &RenderFilters::default()).unwrap_err();
        match err {
            EngineError::ManifestRead { item, .. } => assert_eq!(item, "api"),
            other => panic!("expected ManifestRead, got {other}"),
        }
    }

    #[test]
    fn test_comment_only_document_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "infra/postgres.yaml",
            "# nothing here\n---\nkind: ConfigMap\nmetadata:\n  name: cfg\n",
        );
        write_file(dir.path(), "infra/kafka.yaml", "# empty\n");
        write_file(dir.path(), "services/api.yaml", "kind: Service\nmetadata:\n  name: api\n");
        let ctx = test_ctx(dir.path());

        let vars: Vars = [("WITH_KAFKA".to_string(), "1".to_string())]
            .into_iter()
            .collect();
        let ctx = RenderContext::new("staging", dir.path(), vars)
            .with_namespace(ctx.namespace)
            .with_now(ctx.now);

        let docs = render_stack(&test_stack(), &ctx, &RenderFilters::default()).unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|d| postprocess::name_of(&d.body).unwrap())
            .collect();
        assert_eq!(names, vec!["cfg", "api"]);
    }

    #[test]
    fn test_render_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let ctx = test_ctx(dir.path());
        let stack = test_stack();

        let first = encode_documents(&render_stack(&stack, &ctx, &RenderFilters::default()).unwrap())
            .unwrap();
        let second =
            encode_documents(&render_stack(&stack, &ctx, &RenderFilters::default()).unwrap())
                .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_documents_stream() {
        let docs = vec![
            RenderedDocument {
                item: "a".to_string(),
                file: PathBuf::from("a.yaml"),
                body: serde_yaml::from_str("kind: ConfigMap\nmetadata:\n  name: one\n").unwrap(),
            },
            RenderedDocument {
                item: "b".to_string(),
                file: PathBuf::from("b.yaml"),
                body: serde_yaml::from_str("kind: Service\nmetadata:\n  name: two\n").unwrap(),
            },
        ];

        let stream = encode_documents(&docs).unwrap();
        assert_eq!(stream.matches("---\n").count(), 2);
        let one = stream.find("name: one").unwrap();
        let two = stream.find("name: two").unwrap();
        assert!(one < two, "render order preserved");
    }
}
