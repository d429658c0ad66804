//! Request phases and VM provisioning waves.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::Serialize;

use simcore::Id;

use crate::cloud::Cloud;
use crate::vm::VmInstance;

/// Job stage served by a provisioning wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    /// VMs from the map-and-reduce provisioning list.
    Map,
    /// VMs from the reduce-only provisioning list.
    Reduce,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Stage::Map => write!(f, "map"),
            Stage::Reduce => write!(f, "reduce"),
        }
    }
}

/// Execution phase of a request.
///
/// Dispatching happens within the transition from `Provisioning` to `Running`,
/// so it has no phase of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RequestPhase {
    /// Waiting for its submission time.
    Pending,
    /// The provisioning policy is running.
    Searching,
    /// Waiting for VM creation acks.
    Provisioning(Stage),
    /// Tasks of the stage are dispatched.
    Running(Stage),
    /// All tasks are finished.
    Completed,
    /// Gave up because of a policy or provisioning error.
    Abandoned,
}

/// Outcome of a provisioning wave once no more acks are expected.
#[derive(Clone, Debug, PartialEq)]
pub enum WaveOutcome {
    /// Nothing to do until more acks arrive.
    Waiting,
    /// Some VMs failed, retry them in the given datacenters.
    Retry(Vec<(u32, Id)>),
    /// All VMs are created.
    Complete,
    /// Datacenters are exhausted, only a part of VMs is created.
    Partial { missing: Vec<u32> },
    /// Datacenters are exhausted and no VM is created.
    Failed,
}

/// A batch of VM creation requests issued together for one request and stage.
///
/// Every VM has at most one creation attempt in flight. When all acks of the issued attempts are received
/// and some VMs are still missing, each of them is tried in the next datacenter offering its type which
/// was not tried for it before.
#[derive(Clone, Debug)]
pub struct ProvisioningWave {
    pub request_id: u32,
    pub stage: Stage,
    vm_types: BTreeMap<u32, u32>,
    tried: BTreeMap<u32, BTreeSet<Id>>,
    created: Vec<u32>,
    requested: usize,
    acks: usize,
}

impl ProvisioningWave {
    pub fn new<'a>(request_id: u32, stage: Stage, vms: impl Iterator<Item = &'a VmInstance>) -> Self {
        Self {
            request_id,
            stage,
            vm_types: vms.map(|vm| (vm.id, vm.vm_type_id)).collect(),
            tried: BTreeMap::new(),
            created: Vec::new(),
            requested: 0,
            acks: 0,
        }
    }

    pub fn contains(&self, vm_id: u32) -> bool {
        self.vm_types.contains_key(&vm_id)
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn acks(&self) -> usize {
        self.acks
    }

    /// Ids of created VMs in the order of creation.
    pub fn created(&self) -> &[u32] {
        &self.created
    }

    pub fn missing(&self) -> Vec<u32> {
        self.vm_types
            .keys()
            .filter(|vm_id| !self.created.contains(vm_id))
            .copied()
            .collect()
    }

    /// Selects the next datacenter for every missing VM and counts the attempts as requested.
    ///
    /// VMs whose type is not offered by any untried datacenter get no attempt.
    pub fn next_attempts(&mut self, cloud: &Cloud) -> Vec<(u32, Id)> {
        let mut attempts = Vec::new();
        for vm_id in self.missing() {
            let vm_type_id = self.vm_types[&vm_id];
            let tried = self.tried.entry(vm_id).or_default();
            if let Some(dc_id) = cloud.datacenters_offering(vm_type_id).find(|dc| !tried.contains(dc)) {
                tried.insert(dc_id);
                attempts.push((vm_id, dc_id));
            }
        }
        self.requested += attempts.len();
        attempts
    }

    /// Registers creation ack of a VM from this wave.
    pub fn on_ack(&mut self, vm_id: u32, success: bool) {
        self.acks += 1;
        if success && !self.created.contains(&vm_id) {
            self.created.push(vm_id);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.created.len() == self.vm_types.len()
    }

    pub fn all_acks_received(&self) -> bool {
        self.acks == self.requested
    }

    /// Decides what to do next, issuing retries when all pending acks are in.
    pub fn advance(&mut self, cloud: &Cloud) -> WaveOutcome {
        if self.is_complete() {
            return WaveOutcome::Complete;
        }
        if !self.all_acks_received() {
            return WaveOutcome::Waiting;
        }
        let attempts = self.next_attempts(cloud);
        if !attempts.is_empty() {
            return WaveOutcome::Retry(attempts);
        }
        if self.created.is_empty() {
            WaveOutcome::Failed
        } else {
            WaveOutcome::Partial {
                missing: self.missing(),
            }
        }
    }
}
