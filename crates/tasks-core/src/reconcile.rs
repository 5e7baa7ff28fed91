//! The instance reconciler: diffs a task's existing instances against its
//! freshly generated occurrences and plans the corrective writes.

use crate::error::CoreError;
use crate::models::{Instance, InstanceId, InstanceValues, TaskId};
use crate::occurrence::Occurrence;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// One write against the instance store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { task_id: TaskId, values: InstanceValues },
    Update { instance_id: InstanceId, values: InstanceValues },
    Delete { instance_id: InstanceId },
    /// Flag an instance as overridden by an exception task.
    LinkException { instance_id: InstanceId, exception_task_id: TaskId },
    /// Clear the override flag.
    UnlinkException { instance_id: InstanceId },
}

/// Ordered list of instance writes, applied inside the caller's transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPlan {
    operations: Vec<Operation>,
}

impl OperationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Appends another plan, keeping both orders.
    pub fn append(&mut self, mut other: OperationPlan) {
        self.operations.append(&mut other.operations);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn inserts(&self) -> usize {
        self.count(|op| matches!(op, Operation::Insert { .. }))
    }

    pub fn updates(&self) -> usize {
        self.count(|op| matches!(op, Operation::Update { .. }))
    }

    pub fn deletes(&self) -> usize {
        self.count(|op| matches!(op, Operation::Delete { .. }))
    }

    fn count(&self, f: impl Fn(&Operation) -> bool) -> usize {
        self.operations.iter().filter(|op| f(op)).count()
    }
}

impl IntoIterator for OperationPlan {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

impl<'a> IntoIterator for &'a OperationPlan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Plans the writes that bring `previous` in line with `occurrences`.
///
/// Instances are matched by anchor (start, or due for due-only instances).
/// Matched instances are updated only when their derived values changed;
/// overridden instances are never touched by their owner and their deletion
/// is left to the exception cleanup. A single leftover occurrence and a
/// single leftover instance are paired as an in-place update.
///
/// Plan order: deletes, updates, inserts.
pub fn reconcile<I>(task_id: TaskId, previous: &[Instance], occurrences: I) -> Result<OperationPlan, CoreError>
where
    I: IntoIterator<Item = Result<Occurrence, CoreError>>,
{
    let mut by_anchor: BTreeMap<DateTime<Utc>, &Instance> = BTreeMap::new();
    let mut leftovers: Vec<&Instance> = Vec::new();

    for instance in previous {
        match instance.anchor() {
            Some(anchor) if !by_anchor.contains_key(&anchor) => {
                by_anchor.insert(anchor, instance);
            }
            // Untimed or duplicated rows cannot be matched.
            _ => leftovers.push(instance),
        }
    }

    let mut updates = Vec::new();
    let mut unmatched = Vec::new();

    for occurrence in occurrences {
        let occurrence = occurrence?;
        let values = occurrence.values();
        let matched = values.anchor().and_then(|anchor| by_anchor.remove(&anchor));

        match matched {
            Some(instance) if instance.has_exception() => {}
            Some(instance) => {
                if instance.values() != values {
                    updates.push(Operation::Update { instance_id: instance.id, values });
                }
            }
            None => unmatched.push(values),
        }
    }

    leftovers.extend(by_anchor.into_values());
    let (deferred, mut stale): (Vec<&Instance>, Vec<&Instance>) =
        leftovers.into_iter().partition(|i| i.has_exception());

    if !deferred.is_empty() {
        debug!(%task_id, deferred = deferred.len(), "reconcile: overridden instances left for exception cleanup");
    }

    if unmatched.len() == 1 && stale.len() == 1 {
        if let (Some(values), Some(instance)) = (unmatched.pop(), stale.pop()) {
            updates.push(Operation::Update { instance_id: instance.id, values });
        }
    }

    let mut plan = OperationPlan::new();
    for instance in stale {
        plan.push(Operation::Delete { instance_id: instance.id });
    }
    for update in updates {
        plan.push(update);
    }
    for values in unmatched {
        plan.push(Operation::Insert { task_id, values });
    }

    debug!(
        %task_id,
        inserts = plan.inserts(),
        updates = plan.updates(),
        deletes = plan.deletes(),
        "reconcile: plan built"
    );
    Ok(plan)
}

/// Deletes every instance of a task, overridden ones included.
pub fn delete_all(previous: &[Instance]) -> OperationPlan {
    let mut plan = OperationPlan::new();
    for instance in previous {
        plan.push(Operation::Delete { instance_id: instance.id });
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn occ(start: DateTime<Utc>, len: Duration) -> Occurrence {
        Occurrence { start: Some(start), due: Some(start + len), duration: Some(len), timezone: Some("UTC".into()) }
    }

    fn instance(id: i64, o: &Occurrence) -> Instance {
        let values = o.values();
        Instance {
            id: InstanceId(id),
            task_id: TaskId(1),
            instance_start: values.start,
            instance_due: values.due,
            instance_duration: values.duration_ms,
            timezone: values.timezone,
            exception_task_id: None,
        }
    }

    fn ok(occs: Vec<Occurrence>) -> impl Iterator<Item = Result<Occurrence, CoreError>> {
        occs.into_iter().map(Ok)
    }

    /// Applies a plan to an in-memory instance list.
    fn apply(mut rows: Vec<Instance>, plan: &OperationPlan) -> Vec<Instance> {
        let mut next_id = rows.iter().map(|i| i.id.0).max().unwrap_or(0) + 1;
        for op in plan {
            match op {
                Operation::Insert { task_id, values } => {
                    rows.push(Instance {
                        id: InstanceId(next_id),
                        task_id: *task_id,
                        instance_start: values.start,
                        instance_due: values.due,
                        instance_duration: values.duration_ms,
                        timezone: values.timezone.clone(),
                        exception_task_id: None,
                    });
                    next_id += 1;
                }
                Operation::Update { instance_id, values } => {
                    let row = rows.iter_mut().find(|i| i.id == *instance_id).unwrap();
                    row.instance_start = values.start;
                    row.instance_due = values.due;
                    row.instance_duration = values.duration_ms;
                    row.timezone = values.timezone.clone();
                }
                Operation::Delete { instance_id } => rows.retain(|i| i.id != *instance_id),
                Operation::LinkException { .. } | Operation::UnlinkException { .. } => {}
            }
        }
        rows
    }

    #[test]
    fn test_insert_into_empty() {
        let plan = reconcile(TaskId(1), &[], ok(vec![occ(t0(), Duration::days(1))])).unwrap();
        assert_eq!(plan.len(), 1);
        match plan.iter().next().unwrap() {
            Operation::Insert { task_id, values } => {
                assert_eq!(*task_id, TaskId(1));
                assert_eq!(values.start, Some(t0()));
                assert_eq!(values.due, Some(t0() + Duration::milliseconds(86_400_000)));
                assert_eq!(values.duration_ms, Some(86_400_000));
            }
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_reconciling_materialized_rows_is_empty() {
        let occs = vec![occ(t0(), Duration::hours(1)), occ(t0() + Duration::days(1), Duration::hours(1))];
        let rows: Vec<_> = occs.iter().enumerate().map(|(i, o)| instance(i as i64 + 1, o)).collect();
        let plan = reconcile(TaskId(1), &rows, ok(occs)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_due_change_is_a_single_update() {
        let before = occ(t0(), Duration::days(1));
        let rows = vec![instance(1, &before)];
        let plan = reconcile(TaskId(1), &rows, ok(vec![occ(t0(), Duration::hours(1))])).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan.iter().next(),
            Some(&Operation::Update {
                instance_id: InstanceId(1),
                values: InstanceValues {
                    start: Some(t0()),
                    due: Some(t0() + Duration::milliseconds(3_600_000)),
                    duration_ms: Some(3_600_000),
                    timezone: Some("UTC".into()),
                },
            })
        );
    }

    #[test]
    fn test_moved_single_occurrence_keeps_instance() {
        let rows = vec![instance(1, &occ(t0(), Duration::hours(1)))];
        let moved = occ(t0() + Duration::hours(3), Duration::hours(1));
        let plan = reconcile(TaskId(1), &rows, ok(vec![moved.clone()])).unwrap();
        assert_eq!(plan.updates(), 1);
        assert_eq!(plan.inserts() + plan.deletes(), 0);
        assert_eq!(apply(rows, &plan)[0].instance_start, moved.start);
    }

    #[test]
    fn test_due_only_change_is_an_update() {
        let due_only = |due: DateTime<Utc>| Occurrence { start: None, due: Some(due), duration: None, timezone: None };
        let rows = vec![instance(1, &due_only(t0()))];
        let plan = reconcile(TaskId(1), &rows, ok(vec![due_only(t0() + Duration::hours(1))])).unwrap();
        assert_eq!((plan.updates(), plan.inserts(), plan.deletes()), (1, 0, 0));
    }

    #[test]
    fn test_empty_occurrences_delete_everything() {
        let rows = vec![instance(1, &occ(t0(), Duration::hours(1)))];
        let plan = reconcile(TaskId(1), &rows, ok(vec![])).unwrap();
        assert_eq!(plan.iter().collect::<Vec<_>>(), vec![&Operation::Delete { instance_id: InstanceId(1) }]);
    }

    #[test]
    fn test_overridden_instance_is_deferred() {
        let first = occ(t0(), Duration::hours(1));
        let second = occ(t0() + Duration::days(1), Duration::hours(1));
        let mut overridden = instance(1, &first);
        overridden.exception_task_id = Some(TaskId(9));
        let rows = vec![overridden, instance(2, &second)];

        // Rule now starts a week later: neither old anchor survives.
        let plan = reconcile(TaskId(1), &rows, ok(vec![occ(t0() + Duration::weeks(1), Duration::hours(1))])).unwrap();
        assert!(!plan.iter().any(|op| *op == Operation::Delete { instance_id: InstanceId(1) }));
        // The lone stale instance is moved in place.
        assert_eq!((plan.updates(), plan.inserts(), plan.deletes()), (1, 0, 0));
    }

    #[test]
    fn test_overridden_instance_is_not_updated() {
        let mut overridden = instance(1, &occ(t0(), Duration::hours(1)));
        overridden.exception_task_id = Some(TaskId(9));
        let plan = reconcile(TaskId(1), &[overridden], ok(vec![occ(t0(), Duration::hours(2))])).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_orders_deletes_updates_inserts() {
        let a = occ(t0(), Duration::hours(1));
        let b = occ(t0() + Duration::days(1), Duration::hours(1));
        let c = occ(t0() + Duration::days(2), Duration::hours(1));
        let rows = vec![instance(1, &a), instance(2, &b), instance(3, &c)];
        let next = vec![
            occ(t0(), Duration::hours(2)),
            occ(t0() + Duration::days(3), Duration::hours(1)),
            occ(t0() + Duration::days(4), Duration::hours(1)),
        ];
        let plan = reconcile(TaskId(1), &rows, ok(next)).unwrap();
        let kinds: Vec<&str> = plan
            .iter()
            .map(|op| match op {
                Operation::Delete { .. } => "delete",
                Operation::Update { .. } => "update",
                Operation::Insert { .. } => "insert",
                _ => "link",
            })
            .collect();
        assert_eq!(kinds, vec!["delete", "delete", "update", "insert", "insert"]);
    }

    #[test]
    fn test_generator_error_aborts() {
        let occs = vec![Ok(occ(t0(), Duration::hours(1))), Err(CoreError::InconsistentRule("dup".into()))];
        assert!(matches!(reconcile(TaskId(1), &[], occs), Err(CoreError::InconsistentRule(_))));
    }

    #[test]
    fn test_delete_all_includes_overridden() {
        let mut overridden = instance(1, &occ(t0(), Duration::hours(1)));
        overridden.exception_task_id = Some(TaskId(4));
        let rows = vec![overridden, instance(2, &occ(t0() + Duration::days(1), Duration::hours(1)))];
        assert_eq!(delete_all(&rows).deletes(), 2);
    }

    proptest! {
        #[test]
        fn prop_apply_then_reconcile_is_empty(
            before in proptest::collection::btree_set(0i64..200, 0..12),
            after in proptest::collection::btree_set(0i64..200, 0..12),
            len_before in 1i64..48,
            len_after in 1i64..48,
        ) {
            let rows: Vec<Instance> = before
                .iter()
                .enumerate()
                .map(|(i, h)| instance(i as i64 + 1, &occ(t0() + Duration::hours(*h), Duration::hours(len_before))))
                .collect();
            let target: Vec<Occurrence> =
                after.iter().map(|h| occ(t0() + Duration::hours(*h), Duration::hours(len_after))).collect();

            let plan = reconcile(TaskId(1), &rows, ok(target.clone())).unwrap();
            let applied = apply(rows, &plan);

            let mut anchors: Vec<_> = applied.iter().filter_map(|i| i.anchor()).collect();
            anchors.sort();
            let expected: Vec<_> = target.iter().filter_map(|o| o.anchor()).collect();
            prop_assert_eq!(anchors, expected);

            let again = reconcile(TaskId(1), &applied, ok(target)).unwrap();
            prop_assert!(again.is_empty());
        }
    }
}
