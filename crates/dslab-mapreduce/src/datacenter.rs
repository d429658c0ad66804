//! Simulated datacenter hosting VMs and executing tasks.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use simcore::{cast, log_debug, log_trace, log_warn};
use simcore::{Event, EventHandler, EventId, Id, SimulationContext};

use crate::cloud::DatacenterCharacteristics;
use crate::config::{DatacenterConfig, SimulationConfig};
use crate::events::discovery::{ResourceCharacteristics, ResourceCharacteristicsRequest};
use crate::events::task::{TaskCompleted, TaskReturn, TaskSubmit};
use crate::events::vm::{VmCreateAck, VmCreateRequest, VmDestroyRequest};
use crate::task::{Task, TaskStatus};

struct RunningTask {
    task: Task,
    owner: Id,
    completion_event: EventId,
}

struct HostedVm {
    mips: f64,
    queue: VecDeque<(Task, Id)>,
    running: Option<RunningTask>,
}

/// Datacenter component.
///
/// Creates VMs of the offered types while capacity remains and runs the tasks submitted to each VM one at a time
/// in the order of submission.
pub struct Datacenter {
    pub id: Id,
    characteristics: DatacenterCharacteristics,
    vm_failure_probability: f64,
    task_failure_probability: f64,
    vms: BTreeMap<u32, HostedVm>,

    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl Datacenter {
    pub fn new(config: &DatacenterConfig, ctx: SimulationContext, sim_config: Rc<SimulationConfig>) -> Self {
        Self {
            id: ctx.id(),
            characteristics: config.characteristics(ctx.id()),
            vm_failure_probability: config.vm_failure_probability,
            task_failure_probability: config.task_failure_probability,
            vms: BTreeMap::new(),
            ctx,
            sim_config,
        }
    }

    pub fn characteristics(&self) -> &DatacenterCharacteristics {
        &self.characteristics
    }

    /// Returns the number of currently hosted VMs.
    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    fn has_capacity(&self) -> bool {
        self.characteristics
            .max_vms
            .map_or(true, |max_vms| self.vms.len() < max_vms as usize)
    }

    fn fails(&mut self, probability: f64) -> bool {
        self.ctx.gen_bool(probability)
    }

    fn on_characteristics_request(&mut self, src: Id) {
        log_trace!(self.ctx, "reporting characteristics to {}", self.ctx.lookup_name(src));
        self.ctx.emit(
            ResourceCharacteristics {
                characteristics: self.characteristics.clone(),
            },
            src,
            self.sim_config.message_delay,
        );
    }

    fn on_vm_create_request(&mut self, vm_id: u32, vm_type_id: u32, request_id: u32, src: Id) {
        let success = if self.vms.contains_key(&vm_id) {
            log_warn!(self.ctx, "vm {} already exists", vm_id);
            false
        } else if !self.characteristics.offers(vm_type_id) {
            log_debug!(self.ctx, "vm type {} of vm {} is not offered", vm_type_id, vm_id);
            false
        } else if !self.has_capacity() {
            log_debug!(self.ctx, "no capacity left for vm {} of request {}", vm_id, request_id);
            false
        } else if self.fails(self.vm_failure_probability) {
            log_debug!(self.ctx, "creation of vm {} of request {} failed", vm_id, request_id);
            false
        } else {
            true
        };

        let mut delay = self.sim_config.message_delay;
        if success {
            let mips = match self.sim_config.vm_type(vm_type_id) {
                Some(vm_type) => vm_type.mips,
                None => {
                    log_warn!(self.ctx, "vm type {} is unknown", vm_type_id);
                    return self.send_ack(vm_id, false, src, delay);
                }
            };
            self.vms.insert(
                vm_id,
                HostedVm {
                    mips,
                    queue: VecDeque::new(),
                    running: None,
                },
            );
            log_debug!(self.ctx, "created vm {} of request {}", vm_id, request_id);
            delay += self.sim_config.vm_startup_delay;
        }
        self.send_ack(vm_id, success, src, delay);
    }

    fn send_ack(&mut self, vm_id: u32, success: bool, dst: Id, delay: f64) {
        self.ctx.emit(
            VmCreateAck {
                datacenter_id: self.id,
                vm_id,
                success,
            },
            dst,
            delay,
        );
    }

    fn on_task_submit(&mut self, mut task: Task, src: Id) {
        let Some(vm_id) = task.vm_id else {
            log_warn!(self.ctx, "task {} is not bound to a vm", task.id);
            return self.return_failed(task, src);
        };
        let Some(vm) = self.vms.get_mut(&vm_id) else {
            log_warn!(self.ctx, "task {} is submitted to missing vm {}", task.id, vm_id);
            return self.return_failed(task, src);
        };
        task.status = TaskStatus::Pending;
        vm.queue.push_back((task, src));
        self.start_next_task(vm_id);
    }

    fn return_failed(&mut self, mut task: Task, dst: Id) {
        task.status = TaskStatus::Failed;
        task.finished = true;
        task.start_time = Some(self.ctx.time());
        task.finish_time = Some(self.ctx.time());
        self.ctx.emit(TaskReturn { task }, dst, self.sim_config.message_delay);
    }

    fn start_next_task(&mut self, vm_id: u32) {
        let Some(vm) = self.vms.get_mut(&vm_id) else {
            return;
        };
        if vm.running.is_some() {
            return;
        }
        let Some((mut task, owner)) = vm.queue.pop_front() else {
            return;
        };
        let duration = task.length / vm.mips;
        task.start_time = Some(self.ctx.time());
        log_debug!(self.ctx, "vm {} started task {} for {:.3}s", vm_id, task.id, duration);
        let completion_event = self.ctx.emit_self(TaskCompleted { vm_id }, duration);
        vm.running = Some(RunningTask {
            task,
            owner,
            completion_event,
        });
    }

    fn on_task_completed(&mut self, vm_id: u32) {
        let Some(running) = self.vms.get_mut(&vm_id).and_then(|vm| vm.running.take()) else {
            return;
        };
        let mut task = running.task;
        task.finish_time = Some(self.ctx.time());
        task.finished = true;
        task.status = if self.fails(self.task_failure_probability) {
            TaskStatus::Failed
        } else {
            TaskStatus::Success
        };
        log_debug!(self.ctx, "vm {} finished task {} with status {}", vm_id, task.id, task.status);
        self.ctx
            .emit(TaskReturn { task }, running.owner, self.sim_config.message_delay);
        self.start_next_task(vm_id);
    }

    fn on_vm_destroy_request(&mut self, vm_id: u32) {
        let Some(vm) = self.vms.remove(&vm_id) else {
            log_trace!(self.ctx, "vm {} is not hosted here", vm_id);
            return;
        };
        log_debug!(self.ctx, "destroyed vm {}", vm_id);
        let mut cancelled: Vec<(Task, Id)> = vm.queue.into_iter().collect();
        if let Some(running) = vm.running {
            self.ctx.cancel_event(running.completion_event);
            cancelled.insert(0, (running.task, running.owner));
        }
        for (mut task, owner) in cancelled {
            task.status = TaskStatus::Cancelled;
            task.finished = true;
            task.finish_time = Some(self.ctx.time());
            self.ctx.emit(TaskReturn { task }, owner, self.sim_config.message_delay);
        }
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        let src = event.src;
        cast!(match event.data {
            ResourceCharacteristicsRequest {} => {
                self.on_characteristics_request(src);
            }
            VmCreateRequest { vm, request_id } => {
                self.on_vm_create_request(vm.id, vm.vm_type_id, request_id, src);
            }
            TaskSubmit { task } => {
                self.on_task_submit(task, src);
            }
            TaskCompleted { vm_id } => {
                self.on_task_completed(vm_id);
            }
            VmDestroyRequest { vm_id } => {
                self.on_vm_destroy_request(vm_id);
            }
        })
    }
}
