//! MapReduce job.

use crate::task::{Task, TaskKind};

/// Map and reduce tasks of a single request.
#[derive(Clone, Debug, Default)]
pub struct Job {
    pub map_tasks: Vec<Task>,
    pub reduce_tasks: Vec<Task>,
}

impl Job {
    pub fn new(map_tasks: Vec<Task>, reduce_tasks: Vec<Task>) -> Self {
        debug_assert!(map_tasks.iter().all(|t| t.kind == TaskKind::Map));
        debug_assert!(reduce_tasks.iter().all(|t| t.kind == TaskKind::Reduce));
        Self {
            map_tasks,
            reduce_tasks,
        }
    }

    /// Iterates over all tasks, map tasks first.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.map_tasks.iter().chain(self.reduce_tasks.iter())
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.map_tasks.iter_mut().chain(self.reduce_tasks.iter_mut())
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks_mut().find(|t| t.id == id)
    }

    pub fn task_count(&self) -> usize {
        self.map_tasks.len() + self.reduce_tasks.len()
    }

    pub fn all_map_tasks_finished(&self) -> bool {
        self.map_tasks.iter().all(|t| t.finished)
    }

    pub fn all_tasks_finished(&self) -> bool {
        self.tasks().all(|t| t.finished)
    }
}
