//! Per-task outcomes and per-request QoS summaries of a simulation run.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::cloud::Cloud;
use crate::error::RequestError;
use crate::provisioning::RequestPhase;
use crate::request::{Request, Requests};
use crate::task::{Task, TaskKind, TaskStatus};
use crate::vm::vm_cost;

/// Outcome of a single task.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TaskRecord {
    pub request_id: u32,
    pub task_id: u64,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub submission_time: Option<f64>,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,
    pub execution_time: Option<f64>,
    pub vm_id: Option<u32>,
    pub vm_type: Option<String>,
}

impl TaskRecord {
    fn new(task: &Task, request: &Request, cloud: &Cloud) -> Self {
        let vm_type = task
            .vm_id
            .and_then(|vm_id| request.vm(vm_id))
            .map(|vm| cloud.vm_type(vm.vm_type_id).name.clone());
        Self {
            request_id: request.id,
            task_id: task.id,
            kind: task.kind,
            status: task.status,
            submission_time: task.submission_time,
            start_time: task.start_time,
            finish_time: task.finish_time,
            execution_time: task.execution_time(),
            vm_id: task.vm_id,
            vm_type,
        }
    }
}

/// Cost of a single VM.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct VmCostRecord {
    pub vm_id: u32,
    pub vm_type: String,
    /// Seconds of successfully completed work.
    pub processing_time: f64,
    pub cost: f64,
}

/// QoS summary of a request.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RequestSummary {
    pub request_id: u32,
    pub user_class: String,
    pub policy: String,
    /// Final phase of the request, e.g. `Completed` or `Abandoned`.
    pub state: String,
    pub vms: Vec<VmCostRecord>,
    pub deadline: f64,
    pub budget: f64,
    pub execution_time: f64,
    pub total_cost: f64,
    pub deadline_violated: bool,
    pub budget_violated: bool,
}

impl RequestSummary {
    fn new(request: &Request, phase: Option<RequestPhase>, cloud: &Cloud) -> Self {
        let vms: Vec<VmCostRecord> = request
            .vms()
            .map(|vm| {
                let vm_type = cloud.vm_type(vm.vm_type_id);
                VmCostRecord {
                    vm_id: vm.id,
                    vm_type: vm_type.name.clone(),
                    processing_time: vm.execution_time,
                    cost: vm_cost(vm.execution_time, vm_type.cost),
                }
            })
            .collect();
        let total_cost = vms.iter().map(|vm| vm.cost).sum::<f64>();
        let execution_time = request.execution_time();
        Self {
            request_id: request.id,
            user_class: request.user_class.clone(),
            policy: request.policy.clone(),
            state: phase.map_or("Pending".to_string(), |phase| format!("{:?}", phase)),
            vms,
            deadline: request.deadline,
            budget: request.budget,
            execution_time,
            total_cost,
            deadline_violated: execution_time > request.deadline,
            budget_violated: total_cost > request.budget,
        }
    }
}

#[derive(Serialize)]
struct RequestRow<'a> {
    request_id: u32,
    user_class: &'a str,
    policy: &'a str,
    state: &'a str,
    vm_count: usize,
    deadline: f64,
    budget: f64,
    execution_time: f64,
    total_cost: f64,
    deadline_violated: bool,
    budget_violated: bool,
}

/// Results of a simulation run.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct RunReport {
    /// Simulation time when the run was finalized.
    pub finish_time: f64,
    /// Whether the run was stopped because no VM of some request could be created.
    pub aborted: bool,
    pub tasks: Vec<TaskRecord>,
    pub requests: Vec<RequestSummary>,
    /// Messages of all errors recorded during the run.
    pub errors: Vec<String>,
}

impl RunReport {
    /// Collects the report from the current state of requests.
    pub fn build(
        requests: &Requests,
        phases: &BTreeMap<u32, RequestPhase>,
        cloud: &Cloud,
        errors: &[RequestError],
        aborted: bool,
        finish_time: f64,
    ) -> Self {
        let mut tasks = Vec::new();
        let mut summaries = Vec::new();
        for request in requests.iter() {
            tasks.extend(request.job.tasks().map(|task| TaskRecord::new(task, request, cloud)));
            summaries.push(RequestSummary::new(request, phases.get(&request.id).copied(), cloud));
        }
        Self {
            finish_time,
            aborted,
            tasks,
            requests: summaries,
            errors: errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn request(&self, request_id: u32) -> Option<&RequestSummary> {
        self.requests.iter().find(|r| r.request_id == request_id)
    }

    pub fn task(&self, task_id: u64) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn total_cost(&self) -> f64 {
        self.requests.iter().map(|r| r.total_cost).sum()
    }

    pub fn save_tasks_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        for record in &self.tasks {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_requests_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        for summary in &self.requests {
            wtr.serialize(RequestRow {
                request_id: summary.request_id,
                user_class: &summary.user_class,
                policy: &summary.policy,
                state: &summary.state,
                vm_count: summary.vms.len(),
                deadline: summary.deadline,
                budget: summary.budget,
                execution_time: summary.execution_time,
                total_cost: summary.total_cost,
                deadline_violated: summary.deadline_violated,
                budget_violated: summary.budget_violated,
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Prints task outcomes and request summaries to stdout.
    pub fn print_summary(&self) {
        println!("========== TASKS ==========");
        println!(
            "{:>8} {:>8} {:>7} {:>10} {:>10} {:>10} {:>10} {:>6} {:>10}",
            "Request", "Task", "Kind", "Status", "Submitted", "Started", "Finished", "VM", "VM type"
        );
        let time = |t: Option<f64>| t.map_or("-".to_string(), |t| format!("{:.2}", t));
        for task in &self.tasks {
            println!(
                "{:>8} {:>8} {:>7} {:>10} {:>10} {:>10} {:>10} {:>6} {:>10}",
                task.request_id,
                task.task_id,
                task.kind.to_string(),
                task.status.to_string(),
                time(task.submission_time),
                time(task.start_time),
                time(task.finish_time),
                task.vm_id.map_or("-".to_string(), |id| id.to_string()),
                task.vm_type.as_deref().unwrap_or("-"),
            );
        }
        println!("========== REQUESTS ==========");
        for summary in &self.requests {
            println!(
                "request {} ({}, policy {}): {}",
                summary.request_id,
                if summary.user_class.is_empty() { "-" } else { summary.user_class.as_str() },
                summary.policy,
                summary.state
            );
            for vm in &summary.vms {
                println!(
                    "    vm {} ({}): processing time {:.2}s, cost {:.4}",
                    vm.vm_id, vm.vm_type, vm.processing_time, vm.cost
                );
            }
            println!(
                "    execution time {:.2}s / deadline {:.2}s{}",
                summary.execution_time,
                summary.deadline,
                if summary.deadline_violated { " VIOLATED" } else { "" }
            );
            println!(
                "    total cost {:.4} / budget {:.4}{}",
                summary.total_cost,
                summary.budget,
                if summary.budget_violated { " VIOLATED" } else { "" }
            );
        }
        if !self.errors.is_empty() {
            println!("========== ERRORS ==========");
            for error in &self.errors {
                println!("{}", error);
            }
        }
        if self.aborted {
            println!("run was aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{DatacenterCharacteristics, DatacenterKind};
    use crate::job::Job;
    use crate::vm::{VmInstance, VmType};

    fn cloud() -> Cloud {
        Cloud::new(
            vec![VmType::new(0, "small", 0.1, 100., 1)],
            vec![DatacenterCharacteristics {
                id: 0,
                name: "dc".to_string(),
                kind: DatacenterKind::Public,
                vm_types: [0].into_iter().collect(),
                max_vms: None,
                bandwidth: None,
            }],
        )
    }

    fn requests() -> Requests {
        let job = Job::new(vec![Task::map(0, 0, 100., 0., 0.)], vec![Task::reduce(1, 0, 100.)]);
        let mut request = Request::new(0, 0., 0.15, 90., "Simple", job);
        let mut vm = VmInstance::new(0, 0);
        vm.execution_time = 7200.;
        request.map_and_reduce_vm_provision_list.push(vm);
        let mut vm = VmInstance::new(1, 0);
        vm.execution_time = 3601.;
        request.map_and_reduce_vm_provision_list.push(vm);
        request.first_submission_time = Some(0.);
        request.last_finish_time = Some(100.);
        let task = &mut request.job.map_tasks[0];
        task.vm_id = Some(1);
        task.status = TaskStatus::Success;
        task.start_time = Some(10.);
        task.finish_time = Some(25.);
        Requests::new(vec![request]).unwrap()
    }

    #[test]
    fn request_summary() {
        let phases = BTreeMap::from([(0, RequestPhase::Completed)]);
        let report = RunReport::build(&requests(), &phases, &cloud(), &[], false, 100.);
        let summary = report.request(0).unwrap();
        assert_eq!(summary.state, "Completed");
        assert_eq!(summary.vms[0].cost, 0.2);
        assert_eq!(summary.vms[1].cost, 0.2);
        assert!((summary.total_cost - 0.4).abs() < 1e-12);
        assert_eq!(summary.execution_time, 100.);
        assert!(summary.deadline_violated);
        assert!(summary.budget_violated);
    }

    #[test]
    fn task_records() {
        let report = RunReport::build(&requests(), &BTreeMap::new(), &cloud(), &[], false, 100.);
        let record = report.task(0).unwrap();
        assert_eq!(record.execution_time, Some(15.));
        assert_eq!(record.vm_type.as_deref(), Some("small"));
        let record = report.task(1).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.vm_type, None);
        assert_eq!(report.request(0).unwrap().state, "Pending");
    }
}
