use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasks_core::duration::TaskDuration;
use tasks_core::models::{ListId, Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: ListId,
    pub name: String,
    pub visible: bool,
    pub sync_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTaskList {
    pub name: String,
    pub visible: bool,
    pub sync_enabled: bool,
}

impl NewTaskList {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            sync_enabled: true,
        }
    }
}

/// Data transfer object for creating new tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    /// Required; inserts without a list are rejected.
    pub list_id: Option<ListId>,
    pub sync_id: Option<String>,
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub duration: Option<TaskDuration>,
    pub timezone: Option<String>,
    pub rrule: Option<String>,
    pub original_instance_sync_id: Option<String>,
    pub original_instance_id: Option<TaskId>,
    pub original_instance_time: Option<DateTime<Utc>>,
}

impl NewTask {
    /// The row this would become, before an id is assigned.
    pub fn to_task(&self, list_id: ListId) -> Task {
        Task {
            id: TaskId::default(),
            list_id,
            sync_id: self.sync_id.clone(),
            title: self.title.clone(),
            start: self.start,
            due: self.due,
            duration: self.duration,
            timezone: self.timezone.clone(),
            rrule: self.rrule.clone(),
            original_instance_sync_id: self.original_instance_sync_id.clone(),
            original_instance_id: self.original_instance_id,
            original_instance_time: self.original_instance_time,
        }
    }
}

/// Partial update. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub list_id: Option<ListId>,
    pub sync_id: Option<Option<String>>,
    pub title: Option<Option<String>>,
    pub start: Option<Option<DateTime<Utc>>>,
    pub due: Option<Option<DateTime<Utc>>>,
    pub duration: Option<Option<TaskDuration>>,
    pub timezone: Option<Option<String>>,
    pub rrule: Option<Option<String>>,
    pub original_instance_sync_id: Option<Option<String>>,
    pub original_instance_id: Option<Option<TaskId>>,
    pub original_instance_time: Option<Option<DateTime<Utc>>>,
}

impl UpdateTask {
    pub fn apply_to(&self, task: &Task) -> Task {
        fn pick<T: Clone>(change: &Option<T>, current: &T) -> T {
            change.as_ref().unwrap_or(current).clone()
        }

        Task {
            id: task.id,
            list_id: self.list_id.unwrap_or(task.list_id),
            sync_id: pick(&self.sync_id, &task.sync_id),
            title: pick(&self.title, &task.title),
            start: pick(&self.start, &task.start),
            due: pick(&self.due, &task.due),
            duration: pick(&self.duration, &task.duration),
            timezone: pick(&self.timezone, &task.timezone),
            rrule: pick(&self.rrule, &task.rrule),
            original_instance_sync_id: pick(&self.original_instance_sync_id, &task.original_instance_sync_id),
            original_instance_id: pick(&self.original_instance_id, &task.original_instance_id),
            original_instance_time: pick(&self.original_instance_time, &task.original_instance_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_update_leaves_clears_and_sets() {
        let due = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let task = Task {
            id: TaskId(5),
            title: Some("before".to_string()),
            due: Some(due),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        let update = UpdateTask {
            title: Some(Some("after".to_string())),
            timezone: Some(None),
            ..Default::default()
        };

        let updated = update.apply_to(&task);
        assert_eq!(updated.id, TaskId(5));
        assert_eq!(updated.title.as_deref(), Some("after"));
        assert_eq!(updated.due, Some(due));
        assert_eq!(updated.timezone, None);
    }
}
