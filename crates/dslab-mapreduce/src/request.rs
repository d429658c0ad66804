//! Requests: jobs submitted with QoS constraints and the plans produced for them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cloud::Cloud;
use crate::error::ConfigError;
use crate::job::Job;
use crate::task::{Task, TaskStatus};
use crate::vm::{vm_cost, VmInstance};

/// A MapReduce job submission with its budget, deadline and provisioning policy.
#[derive(Clone, Debug)]
pub struct Request {
    pub id: u32,
    /// Delay from the end of resource discovery to the start of provisioning.
    pub submission_time: f64,
    pub budget: f64,
    /// Maximum allowed execution time in seconds.
    pub deadline: f64,
    pub job_file: String,
    pub user_class: String,
    /// Identifier of the provisioning policy, resolved through the policy registry.
    pub policy: String,
    pub job: Job,
    /// VMs used by map tasks (and possibly reduce tasks), provisioned when the request starts.
    pub map_and_reduce_vm_provision_list: Vec<VmInstance>,
    /// VMs used by reduce tasks only, provisioned when all map tasks are finished.
    pub reduce_only_vm_provision_list: Vec<VmInstance>,
    /// Task to VM binding. Tasks absent from the plan are placed round-robin at dispatch.
    pub scheduling_plan: BTreeMap<u64, u32>,
    pub total_cost: f64,
    pub first_submission_time: Option<f64>,
    pub last_finish_time: Option<f64>,
}

impl Request {
    pub fn new(id: u32, submission_time: f64, budget: f64, deadline: f64, policy: &str, job: Job) -> Self {
        Self {
            id,
            submission_time,
            budget,
            deadline,
            job_file: String::new(),
            user_class: String::new(),
            policy: policy.to_string(),
            job,
            map_and_reduce_vm_provision_list: Vec::new(),
            reduce_only_vm_provision_list: Vec::new(),
            scheduling_plan: BTreeMap::new(),
            total_cost: 0.,
            first_submission_time: None,
            last_finish_time: None,
        }
    }

    /// Iterates over all VMs of the request, map-and-reduce VMs first.
    pub fn vms(&self) -> impl Iterator<Item = &VmInstance> {
        self.map_and_reduce_vm_provision_list
            .iter()
            .chain(self.reduce_only_vm_provision_list.iter())
    }

    pub fn vm(&self, vm_id: u32) -> Option<&VmInstance> {
        self.vms().find(|vm| vm.id == vm_id)
    }

    pub fn vm_mut(&mut self, vm_id: u32) -> Option<&mut VmInstance> {
        self.map_and_reduce_vm_provision_list
            .iter_mut()
            .chain(self.reduce_only_vm_provision_list.iter_mut())
            .find(|vm| vm.id == vm_id)
    }

    /// Drops the provisioning lists and the plan, e.g. after a failed policy run.
    pub fn clear_plan(&mut self) {
        self.map_and_reduce_vm_provision_list.clear();
        self.reduce_only_vm_provision_list.clear();
        self.scheduling_plan.clear();
    }

    /// Checks that the plan refers only to tasks and VMs of this request.
    pub fn validate_plan(&self) -> Result<(), String> {
        let mut vm_ids = BTreeSet::new();
        for vm in self.vms() {
            if !vm_ids.insert(vm.id) {
                return Err(format!("vm id {} is used twice", vm.id));
            }
        }
        if vm_ids.is_empty() && self.job.task_count() > 0 {
            return Err("no vms selected".to_string());
        }
        for (task_id, vm_id) in self.scheduling_plan.iter() {
            if self.job.task(*task_id).is_none() {
                return Err(format!("task {} does not belong to the request", task_id));
            }
            if !vm_ids.contains(vm_id) {
                return Err(format!("task {} is bound to unknown vm {}", task_id, vm_id));
            }
        }
        let reduce_only: BTreeSet<u32> = self.reduce_only_vm_provision_list.iter().map(|vm| vm.id).collect();
        for task in self.job.map_tasks.iter() {
            if let Some(vm_id) = self.scheduling_plan.get(&task.id) {
                if reduce_only.contains(vm_id) {
                    return Err(format!("map task {} is bound to reduce-only vm {}", task.id, vm_id));
                }
            }
        }
        Ok(())
    }

    /// Replaces VM ids chosen by the policy with consecutive ids starting from `first_id`.
    ///
    /// Returns the next free id.
    pub fn renumber_vms(&mut self, first_id: u32) -> u32 {
        let mut mapping = HashMap::new();
        let mut next_id = first_id;
        for vm in self
            .map_and_reduce_vm_provision_list
            .iter_mut()
            .chain(self.reduce_only_vm_provision_list.iter_mut())
        {
            mapping.insert(vm.id, next_id);
            vm.id = next_id;
            next_id += 1;
        }
        for vm_id in self.scheduling_plan.values_mut() {
            *vm_id = mapping[vm_id];
        }
        next_id
    }

    /// Accounts a returned task: successful tasks add their execution time to the VM
    /// and extend the request execution interval.
    pub fn record_task_completion(&mut self, task: &Task) {
        if task.status != TaskStatus::Success {
            return;
        }
        let (Some(vm_id), Some(execution_time)) = (task.vm_id, task.execution_time()) else {
            return;
        };
        if let Some(vm) = self.vm_mut(vm_id) {
            vm.execution_time += execution_time;
        }
        if let Some(submission_time) = task.submission_time {
            self.first_submission_time =
                Some(self.first_submission_time.map_or(submission_time, |t| t.min(submission_time)));
        }
        if let Some(finish_time) = task.finish_time {
            self.last_finish_time = Some(self.last_finish_time.map_or(finish_time, |t| t.max(finish_time)));
        }
    }

    /// Computes the total cost of the request VMs from their accumulated execution time.
    pub fn update_total_cost(&mut self, cloud: &Cloud) -> f64 {
        self.total_cost = self
            .vms()
            .map(|vm| vm_cost(vm.execution_time, cloud.vm_type(vm.vm_type_id).cost))
            .sum();
        self.total_cost
    }

    /// Time between the first submission and the last finish of successful tasks.
    pub fn execution_time(&self) -> f64 {
        match (self.first_submission_time, self.last_finish_time) {
            (Some(first), Some(last)) => last - first,
            _ => 0.,
        }
    }

    pub fn deadline_violated(&self) -> bool {
        self.execution_time() > self.deadline
    }

    pub fn budget_violated(&self) -> bool {
        self.total_cost > self.budget
    }
}

/// All requests of a simulation run with the task ownership index.
#[derive(Clone, Debug, Default)]
pub struct Requests {
    requests: Vec<Request>,
    task_owner: HashMap<u64, usize>,
}

impl Requests {
    /// Builds the collection, checking that every task id belongs to exactly one request.
    pub fn new(requests: Vec<Request>) -> Result<Self, ConfigError> {
        let mut task_owner = HashMap::new();
        for (idx, request) in requests.iter().enumerate() {
            for task in request.job.tasks() {
                if task_owner.insert(task.id, idx).is_some() {
                    return Err(ConfigError::DuplicateTaskId(task.id));
                }
            }
        }
        Ok(Self { requests, task_owner })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Request> {
        self.requests.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn get(&self, request_id: u32) -> Option<&Request> {
        self.requests.iter().find(|r| r.id == request_id)
    }

    pub fn get_mut(&mut self, request_id: u32) -> Option<&mut Request> {
        self.requests.iter_mut().find(|r| r.id == request_id)
    }

    pub fn by_task(&self, task_id: u64) -> Option<&Request> {
        self.task_owner.get(&task_id).map(|idx| &self.requests[*idx])
    }

    pub fn by_task_mut(&mut self, task_id: u64) -> Option<&mut Request> {
        self.task_owner.get(&task_id).map(|idx| &mut self.requests[*idx])
    }

    pub fn task(&self, task_id: u64) -> Option<&Task> {
        self.by_task(task_id).and_then(|r| r.job.task(task_id))
    }

    pub fn task_mut(&mut self, task_id: u64) -> Option<&mut Task> {
        self.by_task_mut(task_id).and_then(|r| r.job.task_mut(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn request() -> Request {
        let job = Job::new(vec![Task::map(0, 0, 100., 0., 0.)], vec![Task::reduce(1, 0, 50.)]);
        let mut request = Request::new(0, 0., 1., 90., "Simple", job);
        request.map_and_reduce_vm_provision_list.push(VmInstance::new(0, 0));
        request.reduce_only_vm_provision_list.push(VmInstance::new(1, 0));
        request
    }

    #[test]
    fn deadline_violation() {
        let mut request = request();
        request.first_submission_time = Some(0.);
        request.last_finish_time = Some(100.);
        assert!(request.deadline_violated());
        request.deadline = 120.;
        assert!(!request.deadline_violated());
    }

    #[test]
    fn renumbering_rewrites_plan() {
        let mut request = request();
        request.scheduling_plan.insert(0, 0);
        request.scheduling_plan.insert(1, 1);
        assert_eq!(request.renumber_vms(10), 12);
        assert_eq!(request.map_and_reduce_vm_provision_list[0].id, 10);
        assert_eq!(request.reduce_only_vm_provision_list[0].id, 11);
        assert_eq!(request.scheduling_plan[&0], 10);
        assert_eq!(request.scheduling_plan[&1], 11);
    }

    #[test]
    fn plan_validation() {
        let mut request = request();
        assert!(request.validate_plan().is_ok());
        request.scheduling_plan.insert(0, 1);
        assert!(request.validate_plan().is_err());
        request.scheduling_plan.insert(0, 7);
        assert!(request.validate_plan().is_err());
        request.scheduling_plan.clear();
        request.scheduling_plan.insert(42, 0);
        assert!(request.validate_plan().is_err());
        request.clear_plan();
        assert_eq!(request.validate_plan(), Err("no vms selected".to_string()));
    }

    #[test]
    fn only_successful_tasks_are_accounted() {
        let mut request = request();
        let mut task = request.job.map_tasks[0].clone();
        task.vm_id = Some(0);
        task.submission_time = Some(5.);
        task.start_time = Some(10.);
        task.finish_time = Some(40.);
        task.status = TaskStatus::Failed;
        request.record_task_completion(&task);
        assert_eq!(request.vm(0).unwrap().execution_time, 0.);
        assert_eq!(request.first_submission_time, None);

        task.status = TaskStatus::Success;
        request.record_task_completion(&task);
        assert_eq!(request.vm(0).unwrap().execution_time, 30.);
        assert_eq!(request.execution_time(), 35.);
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let first = request();
        let mut second = request();
        second.id = 1;
        assert!(matches!(
            Requests::new(vec![first, second]),
            Err(ConfigError::DuplicateTaskId(0))
        ));
    }
}
