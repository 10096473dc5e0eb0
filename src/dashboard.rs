use chrono_tz::Tz;

use crate::models::{Task, TaskStatus, Timestamp};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DashboardSummary {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
    pub overdue: Vec<Task>,
    pub due_today: Vec<Task>,
}

impl DashboardSummary {
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Todo => self.todo,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Done => self.done,
        }
    }
}

/// Builds the dashboard header numbers. Overdue means past its deadline and not
/// done; "today" is the calendar day of `now` in `tz`.
pub fn summarize(tasks: &[Task], now: Timestamp, tz: Tz) -> DashboardSummary {
    let today = now.with_timezone(&tz).date_naive();
    let mut summary = DashboardSummary {
        total: tasks.len(),
        ..DashboardSummary::default()
    };
    for task in tasks {
        match task.status {
            TaskStatus::Todo => summary.todo += 1,
            TaskStatus::InProgress => summary.in_progress += 1,
            TaskStatus::Done => summary.done += 1,
        }
        if task.deadline_date(tz) == Some(today) {
            summary.due_today.push(task.clone());
        }
        if !task.is_done() && task.deadline.is_some_and(|deadline| deadline < now) {
            summary.overdue.push(task.clone());
        }
    }
    summary.overdue.sort_by_key(|task| task.deadline);
    summary
}
