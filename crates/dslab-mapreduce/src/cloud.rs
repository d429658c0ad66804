//! Catalog of VM types and datacenters captured at resource discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use simcore::Id;

use crate::vm::VmType;

/// Deployment model of a datacenter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatacenterKind {
    Public,
    Private,
}

impl Display for DatacenterKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            DatacenterKind::Public => write!(f, "public"),
            DatacenterKind::Private => write!(f, "private"),
        }
    }
}

/// Static description of a datacenter reported in response to resource discovery.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatacenterCharacteristics {
    pub id: Id,
    pub name: String,
    pub kind: DatacenterKind,
    pub vm_types: BTreeSet<u32>,
    /// Maximum number of simultaneously running VMs, unlimited if not set.
    pub max_vms: Option<u32>,
    /// Bandwidth between the data source and this datacenter in MB/s, unlimited if not set.
    pub bandwidth: Option<f64>,
}

impl DatacenterCharacteristics {
    pub fn offers(&self, vm_type_id: u32) -> bool {
        self.vm_types.contains(&vm_type_id)
    }

    /// Returns the time needed to bring `size` MB of data to this datacenter.
    pub fn transfer_time(&self, size: f64) -> f64 {
        match self.bandwidth {
            Some(bandwidth) if bandwidth > 0. && size > 0. => size / bandwidth,
            _ => 0.,
        }
    }
}

/// Read-only view of all VM types and discovered datacenters.
///
/// Lookups of unknown ids panic: callers may only query ids taken from this catalog.
#[derive(Clone, Debug, Default)]
pub struct Cloud {
    vm_types: BTreeMap<u32, VmType>,
    datacenters: Vec<DatacenterCharacteristics>,
}

impl Cloud {
    /// Creates catalog from VM types and datacenter characteristics.
    ///
    /// Datacenters are kept in the order of their ids.
    pub fn new(vm_types: Vec<VmType>, mut datacenters: Vec<DatacenterCharacteristics>) -> Self {
        datacenters.sort_by_key(|dc| dc.id);
        Self {
            vm_types: vm_types.into_iter().map(|t| (t.id, t)).collect(),
            datacenters,
        }
    }

    pub fn vm_type(&self, id: u32) -> &VmType {
        self.vm_types
            .get(&id)
            .unwrap_or_else(|| panic!("unknown vm type {}", id))
    }

    pub fn vm_type_by_name(&self, name: &str) -> Option<&VmType> {
        self.vm_types.values().find(|t| t.name == name)
    }

    pub fn vm_types(&self) -> impl Iterator<Item = &VmType> {
        self.vm_types.values()
    }

    pub fn datacenter(&self, id: Id) -> &DatacenterCharacteristics {
        self.datacenters
            .iter()
            .find(|dc| dc.id == id)
            .unwrap_or_else(|| panic!("unknown datacenter {}", id))
    }

    pub fn datacenters(&self) -> &[DatacenterCharacteristics] {
        &self.datacenters
    }

    pub fn datacenter_offers(&self, datacenter_id: Id, vm_type_id: u32) -> bool {
        self.datacenter(datacenter_id).offers(vm_type_id)
    }

    /// Returns the ids of datacenters offering the VM type, in the order they are tried for provisioning.
    pub fn datacenters_offering(&self, vm_type_id: u32) -> impl Iterator<Item = Id> + '_ {
        self.datacenters
            .iter()
            .filter(move |dc| dc.offers(vm_type_id))
            .map(|dc| dc.id)
    }

    /// Returns the first datacenter offering the VM type, the one where its VMs are requested first.
    pub fn primary_datacenter(&self, vm_type_id: u32) -> Option<&DatacenterCharacteristics> {
        self.datacenters.iter().find(|dc| dc.offers(vm_type_id))
    }

    /// Returns true if some datacenter of the given kind offers the VM type.
    pub fn is_offered_by(&self, vm_type_id: u32, kind: DatacenterKind) -> bool {
        self.datacenters.iter().any(|dc| dc.kind == kind && dc.offers(vm_type_id))
    }
}
