//! The active window: tasks still eligible for processing, in id order.

use std::collections::VecDeque;

use crate::model::{Task, TaskId};

#[derive(Debug, Default, Clone)]
pub struct ActiveWindow {
    tasks: VecDeque<Task>,
}

impl ActiveWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from recovered tasks. Sorted by id regardless of input order.
    pub fn from_tasks(mut tasks: Vec<Task>) -> Self {
        tasks.sort_by_key(|t| t.id);
        Self {
            tasks: tasks.into(),
        }
    }

    /// Next task to attempt.
    pub fn head(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let index = self.position(id)?;
        self.tasks.remove(index)
    }

    /// Swap in a newer snapshot of a task already in the window.
    /// Returns false if no entry has that id.
    pub fn replace(&mut self, task: Task) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn push_back(&mut self, task: Task) {
        debug_assert!(
            self.tasks.back().is_none_or(|last| last.id < task.id),
            "window must stay in ascending id order"
        );
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Failure;
    use serde_json::json;

    fn task(id: u64) -> Task {
        Task::new(TaskId(id), json!(id))
    }

    #[test]
    fn recovered_tasks_are_sorted() {
        let window = ActiveWindow::from_tasks(vec![task(5), task(1), task(3)]);
        assert_eq!(window.ids(), vec![TaskId(1), TaskId(3), TaskId(5)]);
        assert_eq!(window.head().map(|t| t.id), Some(TaskId(1)));
    }

    #[test]
    fn replace_keeps_position() {
        let mut window = ActiveWindow::from_tasks(vec![task(0), task(1)]);
        let failed = task(0).started().failed(Failure::new("x"));

        assert!(window.replace(failed));
        assert_eq!(window.head().map(|t| t.fail_count), Some(1));
        assert!(!window.replace(task(9)));
    }

    #[test]
    fn remove_from_middle() {
        let mut window = ActiveWindow::from_tasks(vec![task(0), task(1), task(2)]);
        assert_eq!(window.remove(TaskId(1)).map(|t| t.id), Some(TaskId(1)));
        assert_eq!(window.ids(), vec![TaskId(0), TaskId(2)]);
        assert!(window.remove(TaskId(1)).is_none());
    }
}
