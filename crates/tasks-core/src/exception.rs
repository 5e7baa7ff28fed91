//! Exception linkage: resolving an override task to the instance it replaces,
//! and releasing that instance again when the override goes away.

use crate::error::CoreError;
use crate::models::{Instance, InstanceRef, Task};
use crate::occurrence::Occurrence;
use crate::reconcile::{Operation, OperationPlan};
use crate::store::InstanceStore;
use std::fmt;
use tracing::debug;

/// How an exception task names its original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideReference<'a> {
    /// The original task's row id.
    TaskId(crate::models::TaskId),
    /// The original task's sync id.
    SyncId(&'a str),
}

impl fmt::Display for OverrideReference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideReference::TaskId(id) => write!(f, "task id {}", id),
            OverrideReference::SyncId(sync_id) => write!(f, "sync id '{}'", sync_id),
        }
    }
}

/// Checks that a task carries at most one override reference.
///
/// Returns `None` for ordinary tasks. Runs before any store access.
pub fn validate_exception_shape(task: &Task) -> Result<Option<OverrideReference<'_>>, CoreError> {
    match (task.original_instance_id, task.original_instance_sync_id.as_deref()) {
        (Some(_), Some(_)) => Err(CoreError::MalformedException(format!(
            "task {} sets both original_instance_id and original_instance_sync_id",
            task.id
        ))),
        (Some(id), None) => Ok(Some(OverrideReference::TaskId(id))),
        (None, Some(sync_id)) => Ok(Some(OverrideReference::SyncId(sync_id))),
        (None, None) => {
            if task.original_instance_time.is_some() {
                return Err(CoreError::MalformedException(format!(
                    "task {} sets original_instance_time without an override reference",
                    task.id
                )));
            }
            Ok(None)
        }
    }
}

/// Resolves an exception task to the instance it overrides.
///
/// The original task is looked up by id or sync id. Within its instances the
/// target is the one anchored at `original_instance_time`, or the sole
/// instance when no time is given.
pub async fn resolve_override<S>(store: &mut S, task: &Task) -> Result<InstanceRef, CoreError>
where
    S: InstanceStore + ?Sized,
{
    let reference = validate_exception_shape(task)?.ok_or_else(|| {
        CoreError::MalformedException(format!("task {} has no override reference", task.id))
    })?;

    let original = match reference {
        OverrideReference::TaskId(id) => store.find_task(id).await?,
        OverrideReference::SyncId(sync_id) => store.find_task_by_sync_id(sync_id).await?,
    };
    let original = original.ok_or_else(|| {
        CoreError::DanglingReference(format!("task {} overrides {}, which does not exist", task.id, reference))
    })?;

    if original.id == task.id {
        return Err(CoreError::MalformedException(format!("task {} overrides itself", task.id)));
    }
    if original.is_exception() {
        return Err(CoreError::MalformedException(format!(
            "task {} overrides task {}, which is itself an exception",
            task.id, original.id
        )));
    }
    let held = store
        .instances_for_task(task.id)
        .await?
        .into_iter()
        .find_map(|instance| instance.exception_task_id.map(|holder| (instance.id, holder)));
    if let Some((instance_id, holder)) = held {
        return Err(CoreError::MalformedException(format!(
            "task {} cannot override task {} while its own instance {} is overridden by task {}",
            task.id, original.id, instance_id, holder
        )));
    }

    let instances = store.instances_for_task(original.id).await?;
    let target = select_target(task, &original, instances)?;

    if let Some(other) = target.exception_task_id.filter(|other| *other != task.id) {
        return Err(CoreError::MalformedException(format!(
            "instance {} of task {} is already overridden by task {}",
            target.id, original.id, other
        )));
    }

    debug!(exception = %task.id, original = %original.id, instance = %target.id, "resolve_override: resolved");
    Ok(InstanceRef { instance_id: target.id, original_task_id: original.id })
}

fn select_target(task: &Task, original: &Task, instances: Vec<Instance>) -> Result<Instance, CoreError> {
    match task.original_instance_time {
        Some(time) => instances.into_iter().find(|i| i.anchor() == Some(time)).ok_or_else(|| {
            CoreError::DanglingReference(format!("task {} has no occurrence at {}", original.id, time))
        }),
        None => {
            let count = instances.len();
            let mut instances = instances.into_iter();
            match (instances.next(), count) {
                (Some(sole), 1) => Ok(sole),
                (None, _) => Err(CoreError::DanglingReference(format!(
                    "task {} has no instance to override",
                    original.id
                ))),
                (Some(_), _) => Err(CoreError::DanglingReference(format!(
                    "task {} has {} instances and task {} names no original_instance_time",
                    original.id, count, task.id
                ))),
            }
        }
    }
}

/// Plan for an overridden instance whose exception no longer targets it.
///
/// `current` is the owner's occurrence at the instance's anchor, if the owner
/// still generates one. A surviving occurrence is unlinked and refreshed; a
/// vanished one was only kept alive by the override and is deleted.
pub fn release(overridden: &Instance, current: Option<&Occurrence>) -> OperationPlan {
    let mut plan = OperationPlan::new();
    match current {
        Some(occurrence) => {
            let values = occurrence.values();
            if values != overridden.values() {
                plan.push(Operation::Update { instance_id: overridden.id, values });
            }
            plan.push(Operation::UnlinkException { instance_id: overridden.id });
        }
        None => plan.push(Operation::Delete { instance_id: overridden.id }),
    }
    debug!(instance = %overridden.id, kept = current.is_some(), "release: planned");
    plan
}
