//! MapReduce provisioning and scheduling engine.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::Serialize;

use simcore::{cast, log_debug, log_error, log_info, log_warn};
use simcore::{Event, EventHandler, Id, SimulationContext};

use crate::cloud::{Cloud, DatacenterCharacteristics};
use crate::config::SimulationConfig;
use crate::error::RequestError;
use crate::events::discovery::{ResourceCharacteristics, ResourceCharacteristicsRequest};
use crate::events::request::{BeginRequest, EndOfSimulation};
use crate::events::task::{TaskReturn, TaskSubmit};
use crate::events::vm::{VmCreateAck, VmCreateRequest, VmDestroyRequest};
use crate::policy::registry::PolicyRegistry;
use crate::provisioning::{ProvisioningWave, RequestPhase, Stage, WaveOutcome};
use crate::report::RunReport;
use crate::request::Requests;
use crate::task::{Task, TaskKind, TaskStatus};

/// Task submission to a VM.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DispatchRecord {
    pub time: f64,
    pub request_id: u32,
    pub task_id: u64,
    pub kind: TaskKind,
    pub vm_id: u32,
    pub datacenter_id: Id,
}

/// Mutable bookkeeping of a single run owned by the engine.
#[derive(Default)]
struct RunContext {
    next_vm_id: u32,
    phases: BTreeMap<u32, RequestPhase>,
    /// Active provisioning wave of each request.
    waves: BTreeMap<u32, ProvisioningWave>,
    /// Request owning each planned VM.
    vm_owner: BTreeMap<u32, u32>,
    /// Datacenter hosting each created VM.
    vm_locations: BTreeMap<u32, Id>,
    /// Created VMs of each request in the order of creation.
    created_vms: BTreeMap<u32, Vec<u32>>,
    /// Tasks not yet submitted, in the order of ids.
    pending_tasks: BTreeSet<u64>,
    in_flight: usize,
    errors: Vec<RequestError>,
    dispatch_log: Vec<DispatchRecord>,
    aborted: bool,
    finalized: bool,
    ended: bool,
}

/// Engine component driving requests through policy search, VM provisioning, map and reduce execution
/// and cost accounting.
pub struct MapReduceEngine {
    pub id: Id,
    requests: Requests,
    registry: PolicyRegistry,
    datacenters: Vec<Id>,
    discovered: Vec<DatacenterCharacteristics>,
    cloud: Cloud,
    run: RunContext,
    report: Option<RunReport>,

    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl MapReduceEngine {
    pub fn new(
        requests: Requests,
        registry: PolicyRegistry,
        datacenters: Vec<Id>,
        ctx: SimulationContext,
        sim_config: Rc<SimulationConfig>,
    ) -> Self {
        let mut run = RunContext::default();
        for request in requests.iter() {
            run.phases.insert(request.id, RequestPhase::Pending);
            run.pending_tasks.extend(request.job.tasks().map(|t| t.id));
        }
        Self {
            id: ctx.id(),
            requests,
            registry,
            datacenters,
            discovered: Vec::new(),
            cloud: Cloud::default(),
            run,
            report: None,
            ctx,
            sim_config,
        }
    }

    /// Starts resource discovery.
    pub fn start(&mut self) {
        log_info!(
            self.ctx,
            "starting discovery of {} datacenters for {} requests",
            self.datacenters.len(),
            self.requests.len()
        );
        if self.datacenters.is_empty() {
            self.on_discovery_completed();
            return;
        }
        for dc in self.datacenters.clone() {
            self.ctx
                .emit(ResourceCharacteristicsRequest {}, dc, self.sim_config.message_delay);
        }
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    pub fn requests(&self) -> &Requests {
        &self.requests
    }

    pub fn request_phase(&self, request_id: u32) -> Option<RequestPhase> {
        self.run.phases.get(&request_id).copied()
    }

    /// Errors recorded so far in the order of occurrence.
    pub fn errors(&self) -> &[RequestError] {
        &self.run.errors
    }

    /// Task submissions in the order of occurrence.
    pub fn dispatch_log(&self) -> &[DispatchRecord] {
        &self.run.dispatch_log
    }

    /// Returns the datacenter hosting the VM if it was created.
    pub fn vm_location(&self, vm_id: u32) -> Option<Id> {
        self.run.vm_locations.get(&vm_id).copied()
    }

    /// Ids of all created VMs.
    pub fn created_vms(&self) -> Vec<u32> {
        self.run.vm_locations.keys().copied().collect()
    }

    /// Created VMs of the request in the order of creation.
    pub fn created_request_vms(&self, request_id: u32) -> &[u32] {
        self.run.created_vms.get(&request_id).map_or(&[], |vms| vms.as_slice())
    }

    pub fn pending_task_count(&self) -> usize {
        self.run.pending_tasks.len()
    }

    pub fn in_flight_task_count(&self) -> usize {
        self.run.in_flight
    }

    pub fn is_finalized(&self) -> bool {
        self.run.finalized
    }

    pub fn is_aborted(&self) -> bool {
        self.run.aborted
    }

    /// Report produced at finalization.
    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Collects report from the current state.
    pub fn build_report(&self) -> RunReport {
        RunReport::build(
            &self.requests,
            &self.run.phases,
            &self.cloud,
            &self.run.errors,
            self.run.aborted,
            self.ctx.time(),
        )
    }

    // Resource discovery ----------------------------------------------------------------------------------------

    fn on_resource_characteristics(&mut self, characteristics: DatacenterCharacteristics) {
        log_debug!(
            self.ctx,
            "datacenter {} ({}) offers {} vm types",
            characteristics.name,
            characteristics.kind,
            characteristics.vm_types.len()
        );
        if self.discovered.iter().any(|dc| dc.id == characteristics.id) {
            return;
        }
        self.discovered.push(characteristics);
        if self.discovered.len() == self.datacenters.len() {
            self.on_discovery_completed();
        }
    }

    fn on_discovery_completed(&mut self) {
        self.cloud = Cloud::new(self.sim_config.vm_types.clone(), std::mem::take(&mut self.discovered));
        log_info!(self.ctx, "discovered {} datacenters", self.cloud.datacenters().len());
        let submissions: Vec<(u32, f64)> = self.requests.iter().map(|r| (r.id, r.submission_time)).collect();
        for (request_id, submission_time) in submissions {
            self.ctx.emit_self(BeginRequest { request_id }, submission_time);
        }
        self.check_finalize();
    }

    // Planning --------------------------------------------------------------------------------------------------

    fn on_begin_request(&mut self, request_id: u32) {
        if self.request_phase(request_id) != Some(RequestPhase::Pending) {
            log_warn!(self.ctx, "request {} is already started", request_id);
            return;
        }
        self.run.phases.insert(request_id, RequestPhase::Searching);
        let Some(request) = self.requests.get_mut(request_id) else {
            return;
        };
        log_info!(self.ctx, "request {}: running policy {}", request_id, request.policy);

        let mut policy = match self.registry.resolve(&request.policy) {
            Ok(policy) => policy,
            Err(source) => {
                return self.fail_request(RequestError::PolicyResolution { request_id, source });
            }
        };
        let planned = policy.run_algorithm(&self.cloud, request);
        let validation = if planned {
            request.validate_plan()
        } else {
            Err("no feasible plan found".to_string())
        };
        if let Err(reason) = validation {
            request.clear_plan();
            let policy = request.policy.clone();
            return self.fail_request(RequestError::Planning {
                request_id,
                policy,
                reason,
            });
        }

        self.run.next_vm_id = request.renumber_vms(self.run.next_vm_id);
        for vm in request.vms() {
            self.run.vm_owner.insert(vm.id, request_id);
        }
        for (task_id, vm_id) in request.scheduling_plan.clone() {
            let Some(vm_type_id) = request.vm(vm_id).map(|vm| vm.vm_type_id) else {
                continue;
            };
            if let Some(task) = request.job.task_mut(task_id) {
                task.vm_id = Some(vm_id);
                update_task_length(&self.cloud, task, vm_type_id);
            }
        }
        log_info!(
            self.ctx,
            "request {}: planned {} map-and-reduce vms, {} reduce-only vms, {} bound tasks",
            request_id,
            request.map_and_reduce_vm_provision_list.len(),
            request.reduce_only_vm_provision_list.len(),
            request.scheduling_plan.len()
        );
        self.start_provisioning(request_id, Stage::Map);
    }

    // Provisioning ----------------------------------------------------------------------------------------------

    fn start_provisioning(&mut self, request_id: u32, stage: Stage) {
        let Some(request) = self.requests.get(request_id) else {
            return;
        };
        let vms = match stage {
            Stage::Map => &request.map_and_reduce_vm_provision_list,
            Stage::Reduce => &request.reduce_only_vm_provision_list,
        };
        let mut wave = ProvisioningWave::new(request_id, stage, vms.iter());
        let attempts = wave.next_attempts(&self.cloud);
        log_debug!(
            self.ctx,
            "request {}: provisioning {} {} vms",
            request_id,
            vms.len(),
            stage
        );
        self.run.phases.insert(request_id, RequestPhase::Provisioning(stage));
        self.run.waves.insert(request_id, wave);
        self.send_create_requests(request_id, attempts);
        self.check_wave(request_id);
    }

    fn send_create_requests(&mut self, request_id: u32, attempts: Vec<(u32, Id)>) {
        for (vm_id, dc_id) in attempts {
            let Some(vm) = self.requests.get(request_id).and_then(|r| r.vm(vm_id)).cloned() else {
                continue;
            };
            log_debug!(
                self.ctx,
                "request {}: requesting vm {} in {}",
                request_id,
                vm_id,
                self.cloud.datacenter(dc_id).name
            );
            self.ctx
                .emit(VmCreateRequest { vm, request_id }, dc_id, self.sim_config.message_delay);
        }
    }

    fn on_vm_create_ack(&mut self, datacenter_id: Id, vm_id: u32, success: bool) {
        let Some(request_id) = self.run.vm_owner.get(&vm_id).copied() else {
            log_warn!(self.ctx, "ack for unknown vm {}", vm_id);
            return;
        };
        let Some(wave) = self.run.waves.get_mut(&request_id).filter(|w| w.contains(vm_id)) else {
            log_debug!(self.ctx, "stale ack for vm {} of request {}", vm_id, request_id);
            return;
        };
        wave.on_ack(vm_id, success);
        let dc_name = self.cloud.datacenter(datacenter_id).name.clone();
        if success {
            log_info!(self.ctx, "request {}: created vm {} in {}", request_id, vm_id, dc_name);
            self.run.vm_locations.insert(vm_id, datacenter_id);
            self.run.created_vms.entry(request_id).or_default().push(vm_id);
        } else {
            self.record_error(RequestError::VmCreation {
                request_id,
                vm_id,
                datacenter: dc_name,
            });
        }
        self.check_wave(request_id);
    }

    fn check_wave(&mut self, request_id: u32) {
        let Some(wave) = self.run.waves.get_mut(&request_id) else {
            return;
        };
        let stage = wave.stage;
        let outcome = wave.advance(&self.cloud);
        let missing = wave.missing();
        match outcome {
            WaveOutcome::Waiting => {}
            WaveOutcome::Retry(attempts) => {
                log_info!(
                    self.ctx,
                    "request {}: retrying {} {} vms in other datacenters",
                    request_id,
                    attempts.len(),
                    stage
                );
                self.send_create_requests(request_id, attempts);
            }
            WaveOutcome::Complete => {
                self.run.waves.remove(&request_id);
                self.on_wave_resolved(request_id, stage);
            }
            WaveOutcome::Partial { missing } => {
                self.run.waves.remove(&request_id);
                log_warn!(
                    self.ctx,
                    "request {}: proceeding without {} {} vms {:?}",
                    request_id,
                    missing.len(),
                    stage,
                    missing
                );
                self.unbind_tasks(request_id, &missing);
                self.on_wave_resolved(request_id, stage);
            }
            WaveOutcome::Failed if !self.created_request_vms(request_id).is_empty() => {
                // VMs of the earlier stage are still there
                self.run.waves.remove(&request_id);
                log_warn!(
                    self.ctx,
                    "request {}: no {} vms created, proceeding on {} created vms",
                    request_id,
                    stage,
                    self.created_request_vms(request_id).len()
                );
                self.unbind_tasks(request_id, &missing);
                self.on_wave_resolved(request_id, stage);
            }
            WaveOutcome::Failed => {
                self.run.waves.remove(&request_id);
                self.on_total_provisioning_failure(request_id, stage);
            }
        }
    }

    /// Releases tasks bound to VMs which could not be created, they are placed round-robin at dispatch.
    fn unbind_tasks(&mut self, request_id: u32, missing: &[u32]) {
        let Some(request) = self.requests.get_mut(request_id) else {
            return;
        };
        let mut unbound = 0;
        for task in request.job.tasks_mut() {
            if !task.finished && task.vm_id.map_or(false, |vm_id| missing.contains(&vm_id)) {
                task.vm_id = None;
                task.length = task.base_length;
                request.scheduling_plan.remove(&task.id);
                unbound += 1;
            }
        }
        if unbound > 0 {
            log_warn!(self.ctx, "request {}: {} tasks lost their vms", request_id, unbound);
        }
    }

    fn on_total_provisioning_failure(&mut self, request_id: u32, stage: Stage) {
        self.record_error(RequestError::TotalProvisioning { request_id, stage });
        if self.sim_config.abort_on_total_provisioning_failure {
            log_error!(self.ctx, "aborting the run");
            self.run.aborted = true;
            self.run.phases.insert(request_id, RequestPhase::Abandoned);
            self.finalize();
        } else {
            self.abandon_request(request_id);
        }
    }

    fn on_wave_resolved(&mut self, request_id: u32, stage: Stage) {
        self.run.phases.insert(request_id, RequestPhase::Running(stage));
        let all_maps_finished = self
            .requests
            .get(request_id)
            .map_or(false, |r| r.job.all_map_tasks_finished());
        if stage == Stage::Map && all_maps_finished {
            // no map tasks at all
            self.start_reduce_phase(request_id);
        } else {
            self.dispatch_ready_tasks();
        }
        self.check_request_completed(request_id);
        self.check_finalize();
    }

    fn start_reduce_phase(&mut self, request_id: u32) {
        let Some(request) = self.requests.get(request_id) else {
            return;
        };
        log_info!(self.ctx, "request {}: all map tasks are finished, starting reduce phase", request_id);
        if request.reduce_only_vm_provision_list.is_empty() {
            self.run.phases.insert(request_id, RequestPhase::Running(Stage::Reduce));
            self.dispatch_ready_tasks();
        } else {
            self.start_provisioning(request_id, Stage::Reduce);
        }
    }

    // Dispatching -----------------------------------------------------------------------------------------------

    /// Submits every pending task whose request is running and whose VM is created.
    ///
    /// Reduce tasks wait until all map tasks of their request are finished. Unbound tasks are placed round-robin
    /// over the created VMs of their request, starting from the first VM in each pass.
    fn dispatch_ready_tasks(&mut self) {
        let mut next_vm: BTreeMap<u32, usize> = BTreeMap::new();
        let mut ready = Vec::new();
        for task_id in self.run.pending_tasks.iter() {
            let Some(request) = self.requests.by_task(*task_id) else {
                continue;
            };
            if !matches!(self.run.phases.get(&request.id), Some(RequestPhase::Running(_))) {
                continue;
            }
            let Some(task) = request.job.task(*task_id) else {
                continue;
            };
            if !task.is_map() && !request.job.all_map_tasks_finished() {
                continue;
            }
            let vm_id = match request.scheduling_plan.get(task_id) {
                Some(vm_id) => {
                    if !self.run.vm_locations.contains_key(vm_id) {
                        continue;
                    }
                    *vm_id
                }
                None => {
                    let Some(created) = self.run.created_vms.get(&request.id).filter(|vms| !vms.is_empty()) else {
                        continue;
                    };
                    let idx = next_vm.entry(request.id).or_insert(0);
                    let vm_id = created[*idx % created.len()];
                    *idx += 1;
                    vm_id
                }
            };
            ready.push((*task_id, vm_id));
        }
        for (task_id, vm_id) in ready {
            self.submit_task(task_id, vm_id);
        }
    }

    fn submit_task(&mut self, task_id: u64, vm_id: u32) {
        let Some(dc_id) = self.vm_location(vm_id) else {
            return;
        };
        let Some(request) = self.requests.by_task_mut(task_id) else {
            return;
        };
        let request_id = request.id;
        let Some(vm_type_id) = request.vm(vm_id).map(|vm| vm.vm_type_id) else {
            return;
        };
        let Some(task) = request.job.task_mut(task_id) else {
            return;
        };
        if task.vm_id != Some(vm_id) {
            task.vm_id = Some(vm_id);
            update_task_length(&self.cloud, task, vm_type_id);
        }
        task.submission_time = Some(self.ctx.time());
        let task = task.clone();

        self.run.pending_tasks.remove(&task_id);
        self.run.in_flight += 1;
        self.run.dispatch_log.push(DispatchRecord {
            time: self.ctx.time(),
            request_id,
            task_id,
            kind: task.kind,
            vm_id,
            datacenter_id: dc_id,
        });
        log_debug!(
            self.ctx,
            "request {}: submitting {} task {} to vm {}",
            request_id,
            task.kind,
            task_id,
            vm_id
        );
        self.ctx.emit(TaskSubmit { task }, dc_id, self.sim_config.message_delay);
    }

    // Completion ------------------------------------------------------------------------------------------------

    fn on_task_return(&mut self, task: Task) {
        let task_id = task.id;
        let Some(request) = self.requests.by_task_mut(task_id) else {
            log_warn!(self.ctx, "returned task {} is unknown", task_id);
            return;
        };
        let request_id = request.id;
        request.record_task_completion(&task);
        let status = task.status;
        let is_map = task.is_map();
        let finish_time = task.finish_time;
        if let Some(stored) = request.job.task_mut(task_id) {
            *stored = task;
        }
        let all_maps_finished = request.job.all_map_tasks_finished();
        self.run.in_flight = self.run.in_flight.saturating_sub(1);

        if status == TaskStatus::Success {
            log_debug!(
                self.ctx,
                "request {}: task {} finished at {:.3}",
                request_id,
                task_id,
                finish_time.unwrap_or(self.ctx.time())
            );
        } else {
            self.record_error(RequestError::TaskFailed {
                request_id,
                task_id,
                status,
            });
        }

        if is_map && all_maps_finished && self.request_phase(request_id) == Some(RequestPhase::Running(Stage::Map)) {
            self.start_reduce_phase(request_id);
        }
        self.check_request_completed(request_id);
        self.check_finalize();
    }

    fn check_request_completed(&mut self, request_id: u32) {
        if !matches!(self.request_phase(request_id), Some(RequestPhase::Running(_))) {
            return;
        }
        let Some(request) = self.requests.get(request_id) else {
            return;
        };
        if request.job.all_tasks_finished() {
            log_info!(self.ctx, "request {}: completed", request_id);
            self.run.phases.insert(request_id, RequestPhase::Completed);
        }
    }

    fn record_error(&mut self, error: RequestError) {
        if error.is_fatal() {
            log_error!(self.ctx, "{}", error);
        } else {
            log_warn!(self.ctx, "{}", error);
        }
        self.run.errors.push(error);
    }

    fn fail_request(&mut self, error: RequestError) {
        let request_id = error.request_id();
        self.record_error(error);
        if let Some(request) = self.requests.get_mut(request_id) {
            request.clear_plan();
        }
        self.abandon_request(request_id);
    }

    /// Gives up the request, its tasks are never dispatched.
    fn abandon_request(&mut self, request_id: u32) {
        self.run.phases.insert(request_id, RequestPhase::Abandoned);
        if let Some(request) = self.requests.get(request_id) {
            for task in request.job.tasks() {
                self.run.pending_tasks.remove(&task.id);
            }
        }
        self.run.waves.remove(&request_id);
        self.check_finalize();
    }

    fn check_finalize(&mut self) {
        if self.run.finalized || self.run.in_flight > 0 {
            return;
        }
        let done = self
            .run
            .phases
            .values()
            .all(|phase| matches!(phase, RequestPhase::Completed | RequestPhase::Abandoned));
        if done {
            self.finalize();
        }
    }

    /// Accounts request costs, releases VMs and builds the report.
    fn finalize(&mut self) {
        if self.run.finalized {
            return;
        }
        self.run.finalized = true;
        for request in self.requests.iter_mut() {
            request.update_total_cost(&self.cloud);
        }
        let report = self.build_report();
        for summary in report.requests.iter() {
            log_info!(
                self.ctx,
                "request {}: {}, execution time {:.3}, cost {:.4}{}{}",
                summary.request_id,
                summary.state,
                summary.execution_time,
                summary.total_cost,
                if summary.deadline_violated { ", deadline violated" } else { "" },
                if summary.budget_violated { ", budget violated" } else { "" }
            );
        }
        for (vm_id, dc_id) in self.run.vm_locations.clone() {
            self.ctx
                .emit(VmDestroyRequest { vm_id }, dc_id, self.sim_config.message_delay);
        }
        log_info!(
            self.ctx,
            "run finalized: {} requests, {} errors, total cost {:.4}",
            report.requests.len(),
            report.errors.len(),
            report.total_cost()
        );
        self.report = Some(report);
    }

    fn on_end_of_simulation(&mut self) {
        if !self.run.finalized {
            let unfinished = self
                .run
                .phases
                .values()
                .filter(|phase| !matches!(phase, RequestPhase::Completed | RequestPhase::Abandoned))
                .count();
            log_warn!(self.ctx, "simulation ended with {} unfinished requests", unfinished);
            self.finalize();
        }
        self.run.ended = true;
    }
}

/// Converts the data transfer time of the task into work for a VM of the given type.
fn update_task_length(cloud: &Cloud, task: &mut Task, vm_type_id: u32) {
    let vm_type = cloud.vm_type(vm_type_id);
    let transfer_time = cloud
        .primary_datacenter(vm_type_id)
        .map_or(0., |dc| dc.transfer_time(task.transfer_size()));
    task.update_length(transfer_time, vm_type.mips);
}

impl EventHandler for MapReduceEngine {
    fn on(&mut self, event: Event) {
        if self.run.ended || (self.run.finalized && !event.data.is::<EndOfSimulation>()) {
            log_debug!(self.ctx, "ignoring event {} after the end of the run", event.id);
            return;
        }
        cast!(match event.data {
            ResourceCharacteristics { characteristics } => {
                self.on_resource_characteristics(characteristics);
            }
            BeginRequest { request_id } => {
                self.on_begin_request(request_id);
            }
            VmCreateAck {
                datacenter_id,
                vm_id,
                success,
            } => {
                self.on_vm_create_ack(datacenter_id, vm_id, success);
            }
            TaskReturn { task } => {
                self.on_task_return(task);
            }
            EndOfSimulation {} => {
                self.on_end_of_simulation();
            }
        })
    }
}
