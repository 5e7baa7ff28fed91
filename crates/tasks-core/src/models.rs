use crate::duration::TaskDuration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Row id of a task.
    TaskId
);
row_id!(
    /// Row id of a materialized instance.
    InstanceId
);
row_id!(
    /// Row id of a task list.
    ListId
);

/// A persisted task row, as seen by the materialization engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub list_id: ListId,
    /// Stable identity assigned by a sync source.
    pub sync_id: Option<String>,
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub duration: Option<TaskDuration>,
    /// IANA zone name; `None` means the task is floating.
    pub timezone: Option<String>,
    /// Opaque recurrence rule, handed to the rule expander untouched.
    pub rrule: Option<String>,
    /// Exception linkage by the original task's sync id.
    pub original_instance_sync_id: Option<String>,
    /// Exception linkage by the original task's row id.
    pub original_instance_id: Option<TaskId>,
    /// Anchor of the overridden occurrence within the original task.
    pub original_instance_time: Option<DateTime<Utc>>,
}

impl Task {
    /// A task carrying any override reference is an exception.
    pub fn is_exception(&self) -> bool {
        self.original_instance_sync_id.is_some() || self.original_instance_id.is_some()
    }

    /// True if the task recurs. Exceptions never do, whatever their rule says.
    pub fn is_recurring(&self) -> bool {
        self.rrule.is_some() && !self.is_exception()
    }
}

/// A derived occurrence row. Owned and mutated only through operation plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub task_id: TaskId,
    pub instance_start: Option<DateTime<Utc>>,
    pub instance_due: Option<DateTime<Utc>>,
    /// `instance_due - instance_start` in milliseconds.
    pub instance_duration: Option<i64>,
    pub timezone: Option<String>,
    /// Set while an exception task overrides this occurrence.
    pub exception_task_id: Option<TaskId>,
}

impl Instance {
    /// The natural key of an instance within its task.
    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.instance_start.or(self.instance_due)
    }

    pub fn has_exception(&self) -> bool {
        self.exception_task_id.is_some()
    }

    pub fn values(&self) -> InstanceValues {
        InstanceValues {
            start: self.instance_start,
            due: self.instance_due,
            duration_ms: self.instance_duration,
            timezone: self.timezone.clone(),
        }
    }
}

/// The derived columns of an instance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceValues {
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub timezone: Option<String>,
}

impl InstanceValues {
    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.start.or(self.due)
    }
}

/// A reference to the instance an exception overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceRef {
    pub instance_id: InstanceId,
    /// The task that owns the overridden instance.
    pub original_task_id: TaskId,
}
