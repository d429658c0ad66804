//! Map and reduce tasks.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Kind of a task, i.e. the job stage it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TaskKind::Map => write!(f, "Map"),
            TaskKind::Reduce => write!(f, "Reduce"),
        }
    }
}

/// Status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A unit of work of a MapReduce job.
///
/// Tasks are plain data: the engine moves them between the pending set, datacenters and the owning request,
/// identifying them by id.
#[derive(Clone, Debug, Serialize)]
pub struct Task {
    pub id: u64,
    pub request_id: u32,
    pub kind: TaskKind,
    /// Amount of computation in MI as specified by the job.
    pub base_length: f64,
    /// Amount of computation in MI including the data transfer, set once the VM placement is known.
    pub length: f64,
    /// Size of the input read from the data source, MB.
    pub data_size: f64,
    /// Size of the intermediate output sent to reducers, MB.
    pub intermediate_size: f64,
    pub status: TaskStatus,
    pub finished: bool,
    /// VM the task is bound to, `None` means any VM of the request.
    pub vm_id: Option<u32>,
    pub submission_time: Option<f64>,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,
}

impl Task {
    pub fn new(id: u64, request_id: u32, kind: TaskKind, length: f64) -> Self {
        Self {
            id,
            request_id,
            kind,
            base_length: length,
            length,
            data_size: 0.,
            intermediate_size: 0.,
            status: TaskStatus::Pending,
            finished: false,
            vm_id: None,
            submission_time: None,
            start_time: None,
            finish_time: None,
        }
    }

    pub fn map(id: u64, request_id: u32, length: f64, data_size: f64, intermediate_size: f64) -> Self {
        Self {
            data_size,
            intermediate_size,
            ..Self::new(id, request_id, TaskKind::Map, length)
        }
    }

    pub fn reduce(id: u64, request_id: u32, length: f64) -> Self {
        Self::new(id, request_id, TaskKind::Reduce, length)
    }

    pub fn is_map(&self) -> bool {
        self.kind == TaskKind::Map
    }

    /// Amount of data which has to be moved for this task.
    ///
    /// Both the input and the intermediate output transfers are accounted to map tasks.
    pub fn transfer_size(&self) -> f64 {
        match self.kind {
            TaskKind::Map => self.data_size + self.intermediate_size,
            TaskKind::Reduce => 0.,
        }
    }

    /// Recomputes task length for a VM of the given speed, converting the transfer time into work.
    pub fn update_length(&mut self, transfer_time: f64, mips: f64) {
        self.length = self.base_length + transfer_time * mips;
    }

    /// Execution time of a completed task.
    pub fn execution_time(&self) -> Option<f64> {
        Some(self.finish_time? - self.start_time?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_includes_transfer() {
        let mut task = Task::map(0, 0, 1000., 30., 20.);
        assert_eq!(task.transfer_size(), 50.);
        task.update_length(5., 100.);
        assert_eq!(task.length, 1500.);
        task.update_length(0., 100.);
        assert_eq!(task.length, 1000.);
    }

    #[test]
    fn reduce_tasks_have_no_transfer() {
        let task = Task::reduce(1, 0, 500.);
        assert_eq!(task.transfer_size(), 0.);
        assert!(!task.is_map());
    }
}
