//! Environment inheritance resolution
//!
//! Environments form a DAG via their `from` references. Resolution walks the
//! chain child-first with a visited set (a repeated name is a fatal cycle
//! error) and merges field by field: only non-empty child fields override,
//! and `mounts`/`dropKinds`/`vars` merge by name with child precedence.

use indexmap::IndexMap;

use crate::error::{CoreError, Result};
use crate::stack::{EnvironmentSpec, HostMount, Stack};

/// Resolve an environment by following its inheritance chain
pub fn resolve_environment(stack: &Stack, name: &str) -> Result<EnvironmentSpec> {
    let mut visited: Vec<String> = Vec::new();
    let mut chain: Vec<&EnvironmentSpec> = Vec::new();

    let mut current = name;
    loop {
        if visited.iter().any(|v| v == current) {
            visited.push(current.to_string());
            return Err(CoreError::InheritanceCycle {
                chain: visited.join(" -> "),
            });
        }
        visited.push(current.to_string());

        let spec = stack
            .environments
            .get(current)
            .ok_or_else(|| CoreError::UnknownEnvironment {
                name: current.to_string(),
            })?;
        chain.push(spec);

        match &spec.from {
            Some(parent) => current = parent,
            None => break,
        }
    }

    // Fold root-first so that each child overrides its parent.
    let mut resolved = EnvironmentSpec::default();
    for spec in chain.into_iter().rev() {
        merge_into(&mut resolved, spec);
    }
    resolved.from = None;

    Ok(resolved)
}

/// Merge a child spec over an accumulated parent spec
fn merge_into(base: &mut EnvironmentSpec, child: &EnvironmentSpec) {
    merge_mounts(&mut base.mounts, &child.mounts);
    merge_kinds(&mut base.drop_kinds, &child.drop_kinds);
    merge_vars(&mut base.vars, &child.vars);
}

/// Merge mounts by name: a child mount replaces a same-named parent mount
fn merge_mounts(base: &mut Vec<HostMount>, overlay: &[HostMount]) {
    for mount in overlay {
        match base.iter_mut().find(|m| m.name == mount.name) {
            Some(existing) => *existing = mount.clone(),
            None => base.push(mount.clone()),
        }
    }
}

/// Merge drop-kind lists, case-insensitively deduplicated
fn merge_kinds(base: &mut Vec<String>, overlay: &[String]) {
    for kind in overlay {
        if !base.iter().any(|k| k.eq_ignore_ascii_case(kind)) {
            base.push(kind.clone());
        }
    }
}

fn merge_vars(base: &mut IndexMap<String, String>, overlay: &IndexMap<String, String>) {
    for (k, v) in overlay {
        base.insert(k.clone(), v.clone());
    }
}
