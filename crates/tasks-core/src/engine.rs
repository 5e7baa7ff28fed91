//! The mutation hooks the surrounding provider calls around every task write.

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::exception::{self, resolve_override, validate_exception_shape};
use crate::models::{Instance, Task};
use crate::occurrence::{occurrences, Horizon, Occurrence, RRuleExpander, RuleExpander};
use crate::reconcile::{delete_all, reconcile, Operation, OperationPlan};
use crate::store::InstanceStore;
use crate::time::{ResolvedCell, ResolvedTime};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// MaterializationEngine: derives a task's instances and keeps them in step
/// with the task row.
///
/// Every hook takes the caller's store handle explicitly, reads what it needs
/// through it, and returns an [`OperationPlan`] without writing anything. The
/// caller applies the plan in the same transaction as the task write.
pub struct MaterializationEngine {
    config: EngineConfig,
    expander: Box<dyn RuleExpander>,
}

impl std::fmt::Debug for MaterializationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializationEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Default for MaterializationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MaterializationEngine {
    /// Creates an engine expanding rules with [`RRuleExpander`].
    pub fn new(config: EngineConfig) -> Self {
        Self::with_expander(config, Box::new(RRuleExpander))
    }

    pub fn with_expander(config: EngineConfig, expander: Box<dyn RuleExpander>) -> Self {
        Self { config, expander }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The horizon for a mutation happening at `now`.
    pub fn horizon_at(&self, now: DateTime<Utc>) -> Horizon {
        self.config.horizon_at(now)
    }

    /// Pre-write checks that need no store access: exception shape, time
    /// shape, timezone and, for recurring tasks, the rule itself.
    pub fn validate(&self, task: &Task) -> Result<(), CoreError> {
        self.check(&ResolvedCell::new(task))
    }

    fn check(&self, cell: &ResolvedCell<'_>) -> Result<(), CoreError> {
        let task = cell.task();
        validate_exception_shape(task)?;
        let resolved = cell.get()?;

        if let (Some(rule), ResolvedTime::Timed { span, zone }) = (recurrence_rule(task), resolved) {
            let probe = Horizon::until(span.anchor()).with_max_instances(1);
            self.expander.expand(rule, span.anchor(), *zone, &probe)?;
        }
        Ok(())
    }

    /// Plans the writes that bring `previous` in line with the task's
    /// occurrences. Pure; reads nothing but its arguments.
    pub fn materialize(&self, task: &Task, previous: &[Instance], horizon: &Horizon) -> Result<OperationPlan, CoreError> {
        self.materialize_cell(&ResolvedCell::new(task), previous, horizon)
    }

    fn materialize_cell(
        &self,
        cell: &ResolvedCell<'_>,
        previous: &[Instance],
        horizon: &Horizon,
    ) -> Result<OperationPlan, CoreError> {
        let task = cell.task();
        let sequence = occurrences(cell.get()?, recurrence_rule(task), self.expander.as_ref(), horizon)?;
        reconcile(task.id, previous, sequence)
    }

    /// Called after a task row was inserted.
    pub async fn on_task_inserted<S>(&self, store: &mut S, task: &Task, horizon: &Horizon) -> Result<OperationPlan, CoreError>
    where
        S: InstanceStore + ?Sized,
    {
        debug!(task_id = %task.id, recurring = task.is_recurring(), "on_task_inserted: start");
        let cell = ResolvedCell::new(task);
        self.check(&cell)?;

        let previous = store.instances_for_task(task.id).await?;
        let mut plan = self.materialize_cell(&cell, &previous, horizon)?;

        if task.is_exception() {
            let target = resolve_override(store, task).await?;
            plan.push(Operation::LinkException { instance_id: target.instance_id, exception_task_id: task.id });
        }

        info!(task_id = %task.id, operations = plan.len(), "on_task_inserted: planned");
        Ok(plan)
    }

    /// Called after a task row was updated from `old` to `new`.
    pub async fn on_task_updated<S>(
        &self,
        store: &mut S,
        old: &Task,
        new: &Task,
        horizon: &Horizon,
    ) -> Result<OperationPlan, CoreError>
    where
        S: InstanceStore + ?Sized,
    {
        debug!(task_id = %new.id, was_exception = old.is_exception(), "on_task_updated: start");
        if old.id != new.id {
            return Err(CoreError::InvalidInput(format!("task id changed from {} to {}", old.id, new.id)));
        }
        let cell = ResolvedCell::new(new);
        self.check(&cell)?;

        let previous = store.instances_for_task(new.id).await?;
        let mut plan = self.materialize_cell(&cell, &previous, horizon)?;

        let linked = store.find_overridden_instance(new.id).await?;
        let target = if new.is_exception() { Some(resolve_override(store, new).await?) } else { None };

        match (linked, target) {
            (Some(current), Some(target)) if current.id == target.instance_id => {}
            (linked, target) => {
                if let Some(current) = linked {
                    plan.append(self.release(store, &current).await?);
                }
                if let Some(target) = target {
                    plan.push(Operation::LinkException { instance_id: target.instance_id, exception_task_id: new.id });
                }
            }
        }

        info!(task_id = %new.id, operations = plan.len(), "on_task_updated: planned");
        Ok(plan)
    }

    /// Called before a task row is deleted.
    ///
    /// Deletes every owned instance, overridden ones included, and releases
    /// the instance this task overrides, if any. Exception tasks linked to the
    /// deleted instances are the caller's to delete.
    pub async fn on_task_deleted<S>(&self, store: &mut S, task: &Task) -> Result<OperationPlan, CoreError>
    where
        S: InstanceStore + ?Sized,
    {
        let previous = store.instances_for_task(task.id).await?;
        let mut plan = delete_all(&previous);

        if let Some(current) = store.find_overridden_instance(task.id).await? {
            plan.append(self.release(store, &current).await?);
        }

        info!(task_id = %task.id, operations = plan.len(), "on_task_deleted: planned");
        Ok(plan)
    }

    /// Plans the release of an instance no longer overridden by its exception.
    async fn release<S>(&self, store: &mut S, overridden: &Instance) -> Result<OperationPlan, CoreError>
    where
        S: InstanceStore + ?Sized,
    {
        let current = match (store.find_task(overridden.task_id).await?, overridden.anchor()) {
            (Some(owner), Some(anchor)) => self.occurrence_at(&owner, anchor)?,
            (None, _) => {
                warn!(instance = %overridden.id, owner = %overridden.task_id, "release: owner task is gone");
                None
            }
            _ => None,
        };
        Ok(exception::release(overridden, current.as_ref()))
    }

    /// The owner's occurrence anchored exactly at `anchor`, if it still has one.
    fn occurrence_at(&self, owner: &Task, anchor: DateTime<Utc>) -> Result<Option<Occurrence>, CoreError> {
        let cell = ResolvedCell::new(owner);
        let horizon = Horizon::until(anchor).with_max_instances(self.config.max_instances);
        for occurrence in occurrences(cell.get()?, recurrence_rule(owner), self.expander.as_ref(), &horizon)? {
            let occurrence = occurrence?;
            if occurrence.anchor() == Some(anchor) {
                return Ok(Some(occurrence));
            }
        }
        Ok(None)
    }
}

fn recurrence_rule(task: &Task) -> Option<&str> {
    if task.is_recurring() {
        task.rrule.as_deref()
    } else {
        None
    }
}
