//! Largest-fit-first provisioning heuristic.
//!
//! For every candidate VM type and VM count, tasks are placed largest first on the least loaded VM and
//! the resulting makespan and cost are estimated. Among the plans meeting both the deadline and the budget
//! the cheapest (or the fastest) one is chosen.
//!
//! Simplifying assumptions:
//! - VMs are provisioned once for the whole job, there is no scaling during the run;
//! - there is a single data source, the transfer time is computed with the bandwidth of the first
//!   datacenter offering the VM type;
//! - data transfer, including the intermediate data sent to reducers, is accounted to map tasks;
//! - at most one private VM type is used, the first one offered by the private cloud.

use std::str::FromStr;

use crate::cloud::{Cloud, DatacenterKind};
use crate::policy::params::PolicyParams;
use crate::policy::Policy;
use crate::request::Request;
use crate::task::Task;
use crate::vm::{vm_cost, VmInstance};

/// Clouds the policy may provision VMs from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentModel {
    Public,
    Private,
    Hybrid,
}

impl FromStr for DeploymentModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("unknown deployment model `{}`", s)),
        }
    }
}

/// Objective used to order candidates and to compare feasible plans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LffObjective {
    Cost,
    Performance,
}

#[derive(Clone, Debug)]
struct Candidate {
    vm_type_id: u32,
    max_count: usize,
}

#[derive(Clone, Debug)]
struct Estimate {
    vm_type_id: u32,
    vm_count: usize,
    assignment: Vec<(u64, usize)>,
    makespan: f64,
    cost: f64,
}

pub struct LffPolicy {
    objective: LffObjective,
    model: DeploymentModel,
}

impl LffPolicy {
    pub fn new(objective: LffObjective, model: DeploymentModel) -> Self {
        Self { objective, model }
    }

    pub fn from_params(objective: LffObjective, params: &PolicyParams) -> Result<Self, String> {
        if let Some(key) = params.unknown_keys(&["model"]).next() {
            return Err(format!("unknown parameter `{}`", key));
        }
        let model = match params.try_get::<String, _>("model")? {
            Some(model) => model.parse()?,
            None => DeploymentModel::Hybrid,
        };
        Ok(Self::new(objective, model))
    }

    fn candidates(&self, cloud: &Cloud) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if self.model != DeploymentModel::Private {
            for vm_type in cloud.vm_types() {
                if cloud.is_offered_by(vm_type.id, DatacenterKind::Public) {
                    candidates.push(Candidate {
                        vm_type_id: vm_type.id,
                        max_count: public_capacity(cloud, vm_type.id),
                    });
                }
            }
        }
        if self.model != DeploymentModel::Public {
            let private = cloud
                .datacenters()
                .iter()
                .find(|dc| dc.kind == DatacenterKind::Private && !dc.vm_types.is_empty());
            if let Some(dc) = private {
                if let Some(vm_type_id) = dc.vm_types.iter().next() {
                    if !candidates.iter().any(|c| c.vm_type_id == *vm_type_id) {
                        candidates.push(Candidate {
                            vm_type_id: *vm_type_id,
                            max_count: dc.max_vms.map_or(usize::MAX, |n| n as usize),
                        });
                    }
                }
            }
        }
        candidates.sort_by(|a, b| {
            let (a, b) = (cloud.vm_type(a.vm_type_id), cloud.vm_type(b.vm_type_id));
            let order = match self.objective {
                LffObjective::Cost => a.cost.total_cmp(&b.cost).then(b.mips.total_cmp(&a.mips)),
                LffObjective::Performance => b.mips.total_cmp(&a.mips).then(a.cost.total_cmp(&b.cost)),
            };
            order.then(a.id.cmp(&b.id))
        });
        candidates
    }

    fn is_better(&self, estimate: &Estimate, best: &Estimate) -> bool {
        match self.objective {
            LffObjective::Cost => {
                estimate.cost < best.cost || (estimate.cost == best.cost && estimate.makespan < best.makespan)
            }
            LffObjective::Performance => {
                estimate.makespan < best.makespan || (estimate.makespan == best.makespan && estimate.cost < best.cost)
            }
        }
    }
}

/// Number of VMs public datacenters can run, unlimited if some of them has no limit.
fn public_capacity(cloud: &Cloud, vm_type_id: u32) -> usize {
    let mut capacity = 0usize;
    for dc in cloud.datacenters() {
        if dc.kind == DatacenterKind::Public && dc.offers(vm_type_id) {
            match dc.max_vms {
                Some(max_vms) => capacity = capacity.saturating_add(max_vms as usize),
                None => return usize::MAX,
            }
        }
    }
    capacity
}

/// Sorts tasks largest first, ties resolved by id.
fn largest_first(tasks: &[Task]) -> Vec<&Task> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(|a, b| b.base_length.total_cmp(&a.base_length).then(a.id.cmp(&b.id)));
    sorted
}

/// Index of the least loaded VM, the first one on ties.
fn least_loaded(loads: &[f64]) -> usize {
    let mut best = 0;
    for (i, load) in loads.iter().enumerate() {
        if *load < loads[best] {
            best = i;
        }
    }
    best
}

fn estimate(cloud: &Cloud, request: &Request, vm_type_id: u32, vm_count: usize) -> Estimate {
    let vm_type = cloud.vm_type(vm_type_id);
    let datacenter = cloud.primary_datacenter(vm_type_id);
    let mut assignment = Vec::with_capacity(request.job.task_count());

    let mut map_loads = vec![0.; vm_count];
    for task in largest_first(&request.job.map_tasks) {
        let transfer_time = datacenter.map_or(0., |dc| dc.transfer_time(task.transfer_size()));
        let vm = least_loaded(&map_loads);
        map_loads[vm] += vm_type.execution_time(task.base_length) + transfer_time;
        assignment.push((task.id, vm));
    }
    let map_makespan = map_loads.iter().cloned().fold(0., f64::max);

    let mut reduce_loads = vec![0.; vm_count];
    for task in largest_first(&request.job.reduce_tasks) {
        let vm = least_loaded(&reduce_loads);
        reduce_loads[vm] += vm_type.execution_time(task.base_length);
        assignment.push((task.id, vm));
    }
    let reduce_makespan = reduce_loads.iter().cloned().fold(0., f64::max);

    let cost = map_loads
        .iter()
        .zip(reduce_loads.iter())
        .map(|(map_load, reduce_load)| vm_cost(map_load + reduce_load, vm_type.cost))
        .sum();

    Estimate {
        vm_type_id,
        vm_count,
        assignment,
        makespan: map_makespan + reduce_makespan,
        cost,
    }
}

impl Policy for LffPolicy {
    fn run_algorithm(&mut self, cloud: &Cloud, request: &mut Request) -> bool {
        request.clear_plan();
        if request.job.task_count() == 0 {
            return true;
        }
        let task_limit = request.job.map_tasks.len().max(request.job.reduce_tasks.len());

        let mut best: Option<Estimate> = None;
        for candidate in self.candidates(cloud) {
            for vm_count in 1..=task_limit.min(candidate.max_count) {
                let estimate = estimate(cloud, request, candidate.vm_type_id, vm_count);
                if estimate.makespan > request.deadline || estimate.cost > request.budget {
                    continue;
                }
                if best.as_ref().map_or(true, |best| self.is_better(&estimate, best)) {
                    best = Some(estimate);
                }
            }
        }

        let Some(best) = best else {
            return false;
        };
        for vm in 0..best.vm_count {
            request
                .map_and_reduce_vm_provision_list
                .push(VmInstance::new(vm as u32, best.vm_type_id));
        }
        for (task_id, vm) in best.assignment {
            request.scheduling_plan.insert(task_id, vm as u32);
        }
        true
    }
}
