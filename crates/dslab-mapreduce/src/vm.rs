//! VM types and provisioned VM instances.

use serde::{Deserialize, Serialize};

/// Catalog entry describing a kind of virtual machine and its price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmType {
    pub id: u32,
    pub name: String,
    /// Price of one started hour of VM usage.
    pub cost: f64,
    /// Processing speed of the VM in MIPS.
    pub mips: f64,
    pub cores: u32,
}

impl VmType {
    pub fn new(id: u32, name: &str, cost: f64, mips: f64, cores: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            cost,
            mips,
            cores,
        }
    }

    /// Returns the time needed to process the given amount of work on this VM type.
    pub fn execution_time(&self, length: f64) -> f64 {
        length / self.mips
    }
}

/// A concrete VM selected by a provisioning policy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VmInstance {
    pub id: u32,
    pub vm_type_id: u32,
    /// Seconds of work of successfully completed tasks executed on this VM.
    pub execution_time: f64,
}

impl VmInstance {
    pub fn new(id: u32, vm_type_id: u32) -> Self {
        Self {
            id,
            vm_type_id,
            execution_time: 0.,
        }
    }
}

/// Cost of a VM billed by started hours: `ceil(execution_time / 3600) * hourly_cost`.
pub fn vm_cost(execution_time: f64, hourly_cost: f64) -> f64 {
    (execution_time / 3600.).ceil() * hourly_cost
}
