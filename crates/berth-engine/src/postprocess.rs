//! Per-document post-processing for service manifests
//!
//! Applied only to documents belonging to services, never to raw
//! infrastructure manifests: namespace injection, image resolution for the
//! service's Deployment, host-mount overlay injection, and drop-kind
//! filtering. All operations are plain YAML surgery on `serde_yaml::Value`
//! mappings; nothing here talks to a cluster.

use berth_core::{HostMount, ImageSpec, RenderContext};
use serde_yaml::{Mapping, Value};

use crate::error::Result;
use crate::renderer::Renderer;

/// Kinds that never receive a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];

/// Get a document's `kind`, if declared
pub fn kind_of(doc: &Value) -> Option<&str> {
    doc.get("kind")?.as_str()
}

/// Get a document's `metadata.name`, if declared
pub fn name_of(doc: &Value) -> Option<&str> {
    doc.get("metadata")?.get("name")?.as_str()
}

/// Check a kind against an environment's drop list, case-insensitively
pub fn is_dropped_kind(doc: &Value, drop_kinds: &[String]) -> bool {
    match kind_of(doc) {
        Some(kind) => drop_kinds.iter().any(|k| k.eq_ignore_ascii_case(kind)),
        None => false,
    }
}

/// Inject `metadata.namespace` into a namespaced document
///
/// A no-op for cluster-scoped kinds, for documents that already declare a
/// non-blank namespace, and when the target namespace is empty.
pub fn inject_namespace(doc: &mut Value, namespace: &str) {
    if namespace.is_empty() {
        return;
    }
    if let Some(kind) = kind_of(doc) {
        if CLUSTER_SCOPED_KINDS.iter().any(|k| *k == kind) {
            return;
        }
    }

    let Some(root) = doc.as_mapping_mut() else {
        return;
    };
    let metadata = root
        .entry(Value::from("metadata"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Some(metadata) = metadata.as_mapping_mut() else {
        return;
    };

    let declared = metadata
        .get(Value::from("namespace"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if !declared.trim().is_empty() {
        return;
    }

    metadata.insert(Value::from("namespace"), Value::from(namespace));
}

/// Resolve the image of a service's Deployment
///
/// Only a Deployment whose `metadata.name` matches the service name is
/// touched. The primary container's image becomes `repository[:tag]` with
/// the tag rendered from the image spec's template. Init containers whose
/// image is empty or equal to the primary's prior image are updated to the
/// same resolved image, so they track the main image without hard-coding it.
pub fn resolve_image(
    doc: &mut Value,
    service_name: &str,
    image: &ImageSpec,
    renderer: &Renderer,
    ctx: &RenderContext,
) -> Result<()> {
    if kind_of(doc) != Some("Deployment") || name_of(doc) != Some(service_name) {
        return Ok(());
    }

    let resolved = match &image.tag_template {
        Some(template) => {
            let tag = renderer.render(
                &format!("services.{service_name}.image.tagTemplate"),
                template,
                ctx,
            )?;
            let tag = tag.trim();
            if tag.is_empty() {
                image.repository.clone()
            } else {
                format!("{}:{}", image.repository, tag)
            }
        }
        None => image.repository.clone(),
    };

    let Some(pod_spec) = pod_spec_mut(doc) else {
        return Ok(());
    };

    let prior = pod_spec
        .get(Value::from("containers"))
        .and_then(|c| c.as_sequence())
        .and_then(|c| c.first())
        .and_then(|c| c.get("image"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    if let Some(containers) = pod_spec
        .get_mut(Value::from("containers"))
        .and_then(Value::as_sequence_mut)
    {
        if let Some(primary) = containers.first_mut().and_then(Value::as_mapping_mut) {
            primary.insert(Value::from("image"), Value::from(resolved.clone()));
        }
    }

    if let Some(init_containers) = pod_spec
        .get_mut(Value::from("initContainers"))
        .and_then(Value::as_sequence_mut)
    {
        for init in init_containers.iter_mut().filter_map(Value::as_mapping_mut) {
            let current = init
                .get(Value::from("image"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if current.is_empty() || current == prior {
                init.insert(Value::from("image"), Value::from(resolved.clone()));
            }
        }
    }

    Ok(())
}

/// Overlay host-path mounts onto a workload document
///
/// Adds a `hostPath` volume and a matching volume mount (on the primary and
/// all init containers) per overlay entry, replacing any pre-existing
/// volume or mount with the same name. Volumes and mounts the overlay does
/// not reference are left untouched. Documents without a pod template are
/// skipped.
pub fn apply_host_mounts(doc: &mut Value, mounts: &[HostMount]) {
    if mounts.is_empty() {
        return;
    }
    let Some(pod_spec) = pod_spec_mut(doc) else {
        return;
    };

    let volumes = pod_spec
        .entry(Value::from("volumes"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if let Some(volumes) = volumes.as_sequence_mut() {
        for mount in mounts {
            let volume = host_path_volume(mount);
            match volumes
                .iter_mut()
                .find(|v| v.get("name").and_then(Value::as_str) == Some(mount.name.as_str()))
            {
                Some(existing) => *existing = volume,
                None => volumes.push(volume),
            }
        }
    }

    for key in ["containers", "initContainers"] {
        let Some(containers) = pod_spec
            .get_mut(Value::from(key))
            .and_then(Value::as_sequence_mut)
        else {
            continue;
        };
        for (idx, container) in containers.iter_mut().enumerate() {
            // Mounts go to the primary container and every init container.
            if key == "containers" && idx > 0 {
                break;
            }
            let Some(container) = container.as_mapping_mut() else {
                continue;
            };
            let volume_mounts = container
                .entry(Value::from("volumeMounts"))
                .or_insert_with(|| Value::Sequence(Vec::new()));
            let Some(volume_mounts) = volume_mounts.as_sequence_mut() else {
                continue;
            };
            for mount in mounts {
                let entry = volume_mount(mount);
                match volume_mounts
                    .iter_mut()
                    .find(|m| m.get("name").and_then(Value::as_str) == Some(mount.name.as_str()))
                {
                    Some(existing) => *existing = entry,
                    None => volume_mounts.push(entry),
                }
            }
        }
    }
}

/// Navigate to `spec.template.spec` of a workload document
fn pod_spec_mut(doc: &mut Value) -> Option<&mut Mapping> {
    doc.as_mapping_mut()?
        .get_mut(Value::from("spec"))?
        .as_mapping_mut()?
        .get_mut(Value::from("template"))?
        .as_mapping_mut()?
        .get_mut(Value::from("spec"))?
        .as_mapping_mut()
}

fn host_path_volume(mount: &HostMount) -> Value {
    let mut host_path = Mapping::new();
    host_path.insert(Value::from("path"), Value::from(mount.host_path.clone()));

    let mut volume = Mapping::new();
    volume.insert(Value::from("name"), Value::from(mount.name.clone()));
    volume.insert(Value::from("hostPath"), Value::Mapping(host_path));
    Value::Mapping(volume)
}

fn volume_mount(mount: &HostMount) -> Value {
    let mut entry = Mapping::new();
    entry.insert(Value::from("name"), Value::from(mount.name.clone()));
    entry.insert(Value::from("mountPath"), Value::from(mount.mount_path.clone()));
    Value::Mapping(entry)
}
