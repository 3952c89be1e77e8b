//! Slot lifecycle operations: allocate, find, garbage-collect, update
//!
//! Allocation deliberately carries no optimistic pre-check: the create call
//! *is* the check. Two racing CLI invocations walking the same candidate
//! order each attempt the create; per distinct key exactly one succeeds,
//! so both end up with distinct slots without coordination.

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use berth_core::{RenderContext, Stack};
use berth_engine::resolve_namespace;

use crate::backend::SlotBackend;
use crate::error::{Result, StoreError};
use crate::record::SlotRecord;

/// Candidate cap when the stack declares no slot bound
pub const UNBOUNDED_SEARCH_CAP: u32 = 10_000;

/// TTL applied when unset or non-positive
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parameters for one allocation attempt
#[derive(Debug, Clone, Default)]
pub struct AllocateRequest {
    /// Environment class to allocate within
    pub env: String,

    /// Upper slot bound (0 = unbounded)
    pub max_slots: u32,

    /// Slot to try first (0 = none)
    pub preferred: u32,

    /// Issue number recorded on the slot (0 = none)
    pub issue: u64,

    /// Pull request number recorded on the slot (0 = none)
    pub pr: u64,
}

/// Allocate a slot: walk the candidate order, create-if-absent each one
///
/// The candidate order is the preferred slot (when > 0 and within the
/// bound) followed by ascending integers from 1 to the bound, duplicates
/// skipped. A bounded stack therefore always yields a slot in
/// `[1, maxSlots]`, regardless of the preference. For each
/// candidate the namespace is resolved from the stack's pattern with that
/// slot number and a blank context namespace, so the pattern, not an
/// external override, determines the value. The first successful create
/// wins and returns immediately.
///
/// Any create failure moves to the next candidate, including backend
/// errors that are not `AlreadyExists`; a fully searched order yields the
/// distinguished `NoFreeSlot` error so callers can special-case
/// exhaustion.
pub async fn allocate(
    backend: &dyn SlotBackend,
    stack: &Stack,
    ctx: &RenderContext,
    request: &AllocateRequest,
) -> Result<SlotRecord> {
    let bound = if request.max_slots > 0 {
        request.max_slots
    } else {
        UNBOUNDED_SEARCH_CAP
    };

    let mut candidates: Vec<u32> = Vec::with_capacity(bound as usize + 1);
    if request.preferred > 0 && request.preferred <= bound {
        candidates.push(request.preferred);
    }
    for slot in 1..=bound {
        if slot != request.preferred {
            candidates.push(slot);
        }
    }

    for slot in candidates {
        let candidate_ctx = ctx
            .clone()
            .with_slot(slot)
            .with_namespace(String::new());
        let namespace = resolve_namespace(stack, &candidate_ctx, &request.env)?;

        let record = SlotRecord::new(
            &stack.state.prefix,
            slot,
            &request.env,
            &namespace,
            request.issue,
            request.pr,
        );

        match backend.create(&record).await {
            Ok(()) => {
                info!(slot, env = %request.env, namespace = %namespace, "slot allocated");
                return Ok(record);
            }
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(slot, "slot taken, trying next");
            }
            Err(e) => {
                // Treated the same as a taken slot: keep scanning.
                debug!(slot, error = %e, "create failed, trying next");
            }
        }
    }

    Err(StoreError::NoFreeSlot {
        max: request.max_slots,
    })
}

/// Find an existing record for the environment
///
/// Match precedence: slot number (when > 0), then issue (when > 0), then
/// pull request (when > 0). No match is not an error; it signals the
/// caller to allocate a new slot.
pub fn find_matching(
    records: &[SlotRecord],
    env: &str,
    slot: u32,
    issue: u64,
    pr: u64,
) -> Option<SlotRecord> {
    let for_env: Vec<&SlotRecord> = records.iter().filter(|r| r.env == env).collect();

    if slot > 0 {
        if let Some(found) = for_env.iter().find(|r| r.slot == slot) {
            return Some((*found).clone());
        }
    }
    if issue > 0 {
        if let Some(found) = for_env.iter().find(|r| r.issue == issue) {
            return Some((*found).clone());
        }
    }
    if pr > 0 {
        if let Some(found) = for_env.iter().find(|r| r.pr == pr) {
            return Some((*found).clone());
        }
    }
    None
}

/// Delete records older than the TTL, returning the removed set
///
/// GC is best-effort per record: a failed deletion is logged and that
/// record is skipped, never aborting the batch. Records with malformed
/// timestamps age as zero and are never collected.
pub async fn garbage_collect(
    backend: &dyn SlotBackend,
    env_filter: Option<&str>,
    ttl: Option<Duration>,
) -> Result<Vec<SlotRecord>> {
    let ttl = match ttl {
        Some(t) if !t.is_zero() => t,
        _ => DEFAULT_TTL,
    };
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));

    let now = Utc::now();
    let mut removed = Vec::new();

    for record in backend.list().await? {
        if let Some(env) = env_filter {
            if record.env != env {
                continue;
            }
        }
        if record.age(now) <= ttl {
            continue;
        }

        match backend.delete(&record.name).await {
            Ok(()) => {
                info!(slot = record.slot, env = %record.env, "expired slot reclaimed");
                removed.push(record);
            }
            Err(e) => {
                warn!(record = %record.name, error = %e, "failed to delete expired slot, skipping");
            }
        }
    }

    Ok(removed)
}

/// Merge-patch the issue/pr attributes of a record; no-op when both are 0
pub async fn update_attributes(
    backend: &dyn SlotBackend,
    name: &str,
    issue: u64,
    pr: u64,
) -> Result<()> {
    let mut fields = BTreeMap::new();
    if issue > 0 {
        fields.insert("issue".to_string(), issue.to_string());
    }
    if pr > 0 {
        fields.insert("pr".to_string(), pr.to_string());
    }
    if fields.is_empty() {
        return Ok(());
    }
    backend.patch(name, &fields).await
}

/// Merge-patch the namespace of a record; no-op when empty
pub async fn update_namespace(
    backend: &dyn SlotBackend,
    name: &str,
    namespace: &str,
) -> Result<()> {
    if namespace.is_empty() {
        return Ok(());
    }
    let fields: BTreeMap<String, String> =
        [("namespace".to_string(), namespace.to_string())].into_iter().collect();
    backend.patch(name, &fields).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use berth_core::Vars;

    fn test_stack() -> Stack {
        Stack::from_yaml(
            r#"
project: shop
maxSlots: 2
namespace:
  patterns:
    ai: "{{ project }}-ai-{{ slot }}"
environments:
  ai: {}
"#,
        )
        .unwrap()
    }

    fn test_ctx() -> RenderContext {
        RenderContext::new("ai", "/", Vars::new())
    }

    fn request(max: u32) -> AllocateRequest {
        AllocateRequest {
            env: "ai".to_string(),
            max_slots: max,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_allocate_first_free_slot() {
        let backend = MemoryBackend::new();
        let stack = test_stack();

        let record = allocate(&backend, &stack, &test_ctx(), &request(2))
            .await
            .unwrap();

        assert_eq!(record.slot, 1);
        assert_eq!(record.namespace, "shop-ai-1");
        assert_eq!(record.name, "berth-slot-1");
    }

    #[tokio::test]
    async fn test_allocate_preferred_slot_first() {
        let backend = MemoryBackend::new();
        let stack = test_stack();

        let req = AllocateRequest {
            preferred: 2,
            ..request(2)
        };
        let record = allocate(&backend, &stack, &test_ctx(), &req).await.unwrap();

        assert_eq!(record.slot, 2);
        assert_eq!(record.namespace, "shop-ai-2");
        // Exactly one create: the preferred slot was free.
        assert_eq!(backend.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_allocate_taken_preferred_falls_through() {
        let backend = MemoryBackend::new();
        let stack = test_stack();
        let ctx = test_ctx();

        let req = AllocateRequest {
            preferred: 1,
            ..request(2)
        };
        let first = allocate(&backend, &stack, &ctx, &req).await.unwrap();
        assert_eq!(first.slot, 1);

        let second = allocate(&backend, &stack, &ctx, &req).await.unwrap();
        assert_eq!(second.slot, 2);
    }

    #[tokio::test]
    async fn test_preferred_above_bound_is_ignored() {
        let backend = MemoryBackend::new();
        let stack = test_stack();

        let req = AllocateRequest {
            preferred: 7,
            ..request(2)
        };
        let record = allocate(&backend, &stack, &test_ctx(), &req).await.unwrap();

        assert!(
            (1..=2).contains(&record.slot),
            "slot {} outside the declared bound",
            record.slot
        );
        assert_eq!(record.slot, 1);
    }

    #[tokio::test]
    async fn test_allocation_exhaustion() {
        let backend = MemoryBackend::new();
        let stack = test_stack();
        let ctx = test_ctx();

        allocate(&backend, &stack, &ctx, &request(2)).await.unwrap();
        allocate(&backend, &stack, &ctx, &request(2)).await.unwrap();

        let err = allocate(&backend, &stack, &ctx, &request(2)).await.unwrap_err();
        match err {
            StoreError::NoFreeSlot { max } => assert_eq!(max, 2),
            other => panic!("expected NoFreeSlot, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_allocations_get_distinct_slots() {
        let backend = MemoryBackend::new();
        let stack = test_stack();
        let ctx = test_ctx();
        let req = request(2);

        let (a, b) = tokio::join!(
            allocate(&backend, &stack, &ctx, &req),
            allocate(&backend, &stack, &ctx, &req),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut slots = vec![a.slot, b.slot];
        slots.sort_unstable();
        assert_eq!(slots, vec![1, 2]);

        let err = allocate(&backend, &stack, &ctx, &req).await.unwrap_err();
        assert!(matches!(err, StoreError::NoFreeSlot { .. }));
    }

    #[tokio::test]
    async fn test_allocate_unbounded_reports_zero_max() {
        let backend = MemoryBackend::with_records(
            (1..=UNBOUNDED_SEARCH_CAP)
                .map(|s| SlotRecord::new("berth-slot-", s, "ai", "", 0, 0))
                .collect(),
        );
        // No namespace pattern, so the candidate walk is pure create attempts.
        let stack = Stack::from_yaml("project: shop\nenvironments:\n  ai: {}\n").unwrap();

        let err = allocate(&backend, &stack, &test_ctx(), &request(0))
            .await
            .unwrap_err();
        match err {
            StoreError::NoFreeSlot { max } => assert_eq!(max, 0),
            other => panic!("expected NoFreeSlot, got {other}"),
        }
    }

    #[test]
    fn test_find_matching_precedence() {
        let by_issue = SlotRecord::new("s-", 1, "ai", "", 7, 0);
        let by_pr = SlotRecord::new("s-", 2, "ai", "", 0, 9);
        let records = vec![by_issue, by_pr];

        // Slot wins over issue/pr.
        assert_eq!(find_matching(&records, "ai", 2, 7, 0).unwrap().slot, 2);
        // Issue beats pr.
        assert_eq!(find_matching(&records, "ai", 0, 7, 9).unwrap().slot, 1);
        // Pr alone.
        assert_eq!(find_matching(&records, "ai", 0, 0, 9).unwrap().slot, 2);
        // Wrong environment never matches.
        assert!(find_matching(&records, "staging", 1, 7, 9).is_none());
        // Nothing requested, nothing found.
        assert!(find_matching(&records, "ai", 0, 0, 0).is_none());
    }

    #[tokio::test]
    async fn test_gc_removes_only_stale_records() {
        let mut stale = SlotRecord::new("s-", 1, "ai", "", 0, 0);
        stale.created_at = Utc::now() - chrono::Duration::hours(25);
        let mut fresh = SlotRecord::new("s-", 2, "ai", "", 0, 0);
        fresh.created_at = Utc::now() - chrono::Duration::hours(1);

        let backend = MemoryBackend::with_records(vec![stale, fresh]);

        let removed = garbage_collect(&backend, Some("ai"), Some(DEFAULT_TTL))
            .await
            .unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].slot, 1);
        assert_eq!(backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_gc_env_filter() {
        let mut ai = SlotRecord::new("s-", 1, "ai", "", 0, 0);
        ai.created_at = Utc::now() - chrono::Duration::hours(48);
        let mut staging = SlotRecord::new("t-", 1, "staging", "", 0, 0);
        staging.created_at = Utc::now() - chrono::Duration::hours(48);

        let backend = MemoryBackend::with_records(vec![ai, staging]);

        let removed = garbage_collect(&backend, Some("ai"), None).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].env, "ai");
        assert_eq!(backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_gc_default_ttl_on_zero() {
        let mut stale = SlotRecord::new("s-", 1, "ai", "", 0, 0);
        stale.created_at = Utc::now() - chrono::Duration::hours(25);
        let backend = MemoryBackend::with_records(vec![stale]);

        // Zero TTL falls back to the 24h default rather than sweeping everything.
        let removed = garbage_collect(&backend, None, Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
    }

    #[tokio::test]
    async fn test_update_attributes_noop_when_empty() {
        let backend = MemoryBackend::with_records(vec![SlotRecord::new("s-", 1, "ai", "", 0, 0)]);

        update_attributes(&backend, "s-1", 0, 0).await.unwrap();
        assert_eq!(backend.operation_counts().patches, 0);

        update_attributes(&backend, "s-1", 42, 9).await.unwrap();
        let records = backend.list().await.unwrap();
        assert_eq!(records[0].issue, 42);
        assert_eq!(records[0].pr, 9);
    }

    #[tokio::test]
    async fn test_update_namespace() {
        let backend = MemoryBackend::with_records(vec![SlotRecord::new("s-", 1, "ai", "old", 0, 0)]);

        update_namespace(&backend, "s-1", "").await.unwrap();
        assert_eq!(backend.operation_counts().patches, 0);

        update_namespace(&backend, "s-1", "fresh").await.unwrap();
        assert_eq!(backend.list().await.unwrap()[0].namespace, "fresh");
    }
}
