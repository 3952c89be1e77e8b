//! Stack descriptor loading and namespace resolution
//!
//! Loading is a two-step dance: the raw descriptor text is first rendered
//! through the template renderer with a bootstrap context (variables only,
//! no stack-derived values yet), and the rendered text is then parsed into
//! the typed `Stack` model and validated.

use std::path::Path;

use berth_core::{CoreError, RenderContext, Stack, Vars};

use crate::error::Result;
use crate::renderer::Renderer;

/// Load a stack descriptor: first template pass, then parse and validate
///
/// `base` is the process-environment snapshot plus any CLI env files;
/// `overrides` are the inline `--set` pairs. Descriptor-listed `envFiles`
/// are layered on top of `base` and below `overrides`, so a file value
/// beats the process environment while an inline override beats both.
/// The first pass sees `base` and `overrides` only; descriptor env files
/// affect manifest rendering, not the descriptor text itself.
pub fn load_stack(path: &Path, base: &Vars, overrides: &Vars) -> Result<(Stack, Vars)> {
    let raw = std::fs::read_to_string(path).map_err(|_| CoreError::StackNotFound {
        path: path.display().to_string(),
    })?;

    let mut bootstrap_vars = base.clone();
    bootstrap_vars.merge(overrides);
    let bootstrap = RenderContext::new(
        "",
        path.parent().unwrap_or(Path::new(".")),
        bootstrap_vars,
    );
    let rendered = Renderer::new().render(&path.display().to_string(), &raw, &bootstrap)?;

    let stack = Stack::from_yaml(&rendered)?;

    let mut merged = base.clone();
    let root = path.parent().unwrap_or(Path::new("."));
    for file in &stack.env_files {
        let resolved = if file.is_absolute() {
            file.clone()
        } else {
            root.join(file)
        };
        merged.merge(&berth_core::parse_env_file(&resolved)?);
    }
    merged.merge(overrides);

    Ok((stack, merged))
}

/// Resolve the namespace for an environment
///
/// The context's explicit namespace wins when set; otherwise the
/// environment's namespace pattern is rendered against the context; an
/// unset pattern yields an empty namespace (cluster-scoped or
/// manifest-declared namespaces apply).
pub fn resolve_namespace(stack: &Stack, ctx: &RenderContext, env: &str) -> Result<String> {
    if !ctx.namespace.is_empty() {
        return Ok(ctx.namespace.clone());
    }

    match stack.namespace_pattern(env) {
        Some(pattern) => {
            let renderer = Renderer::new().with_project(&stack.project);
            let name = format!("namespace.patterns.{env}");
            Ok(renderer.render(&name, pattern, ctx)?.trim().to_string())
        }
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_with_first_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "stack.yaml",
            r#"
project: "{{ vars.PROJECT }}"
maxSlots: 2
environments:
  ai: {}
"#,
        );

        let vars: Vars = [("PROJECT".to_string(), "shop".to_string())]
            .into_iter()
            .collect();

        let (stack, merged) = load_stack(&path, &vars, &Vars::new()).unwrap();
        assert_eq!(stack.project, "shop");
        assert_eq!(stack.max_slots, 2);
        assert_eq!(merged.get("PROJECT"), Some("shop"));
    }

    #[test]
    fn test_load_env_files_between_base_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            ".env",
            "FROM_FILE=yes\nFROM_BASE=from-file\nPINNED=file\n",
        );
        let path = write_file(
            dir.path(),
            "stack.yaml",
            "project: shop\nenvFiles: [.env]\n",
        );

        // Stand-in for the process-environment snapshot.
        let base: Vars = [("FROM_BASE".to_string(), "from-process".to_string())]
            .into_iter()
            .collect();
        let overrides: Vars = [("PINNED".to_string(), "inline".to_string())]
            .into_iter()
            .collect();

        let (_, merged) = load_stack(&path, &base, &overrides).unwrap();
        assert_eq!(merged.get("FROM_FILE"), Some("yes"));
        // A file value beats the process environment.
        assert_eq!(merged.get("FROM_BASE"), Some("from-file"));
        // An inline override beats the file.
        assert_eq!(merged.get("PINNED"), Some("inline"));
    }

    #[test]
    fn test_load_missing_file() {
        let err =
            load_stack(Path::new("/nonexistent/stack.yaml"), &Vars::new(), &Vars::new())
                .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_resolve_namespace_explicit_wins() {
        let stack = Stack::from_yaml(
            "project: shop\nnamespace:\n  patterns:\n    ai: \"shop-ai-{{ slot }}\"\n",
        )
        .unwrap();
        let ctx = RenderContext::new("ai", "/", Vars::new())
            .with_namespace("forced")
            .with_slot(4);

        assert_eq!(resolve_namespace(&stack, &ctx, "ai").unwrap(), "forced");
    }

    #[test]
    fn test_resolve_namespace_pattern() {
        let stack = Stack::from_yaml(
            "project: shop\nnamespace:\n  patterns:\n    ai: \"{{ project }}-ai-{{ slot }}\"\n",
        )
        .unwrap();
        let ctx = RenderContext::new("ai", "/", Vars::new()).with_slot(4);

        assert_eq!(resolve_namespace(&stack, &ctx, "ai").unwrap(), "shop-ai-4");
    }

    #[test]
    fn test_resolve_namespace_unset_pattern() {
        let stack = Stack::from_yaml("project: shop\n").unwrap();
        let ctx = RenderContext::new("prod", "/", Vars::new());

        assert_eq!(resolve_namespace(&stack, &ctx, "prod").unwrap(), "");
    }
}
