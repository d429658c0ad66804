//! Fixed-size provisioning of a single VM type.

use crate::cloud::Cloud;
use crate::policy::params::PolicyParams;
use crate::policy::Policy;
use crate::request::Request;
use crate::vm::{VmInstance, VmType};

/// Provisions a fixed number of VMs of one type.
///
/// Map tasks are left unbound and spread by the engine. If `reduce_vms` is positive, that many reduce-only VMs
/// are provisioned when the map phase ends and reduce tasks are pinned to them round-robin, otherwise reduce
/// tasks are spread over the map VMs.
pub struct SimplePolicy {
    vm_type: Option<String>,
    map_vms: u32,
    reduce_vms: u32,
}

impl SimplePolicy {
    pub fn new(vm_type: Option<&str>, map_vms: u32, reduce_vms: u32) -> Self {
        Self {
            vm_type: vm_type.map(|s| s.to_string()),
            map_vms,
            reduce_vms,
        }
    }

    pub fn from_params(params: &PolicyParams) -> Result<Self, String> {
        if let Some(key) = params.unknown_keys(&["vm_type", "map_vms", "reduce_vms"]).next() {
            return Err(format!("unknown parameter `{}`", key));
        }
        let map_vms = params.try_get("map_vms")?.unwrap_or(1);
        if map_vms == 0 {
            return Err("map_vms must be positive".to_string());
        }
        Ok(Self {
            vm_type: params.try_get("vm_type")?,
            map_vms,
            reduce_vms: params.try_get("reduce_vms")?.unwrap_or(0),
        })
    }

    fn select_vm_type<'a>(&self, cloud: &'a Cloud) -> Option<&'a VmType> {
        let offered = |vm_type: &&VmType| cloud.datacenters_offering(vm_type.id).next().is_some();
        match &self.vm_type {
            Some(name) => cloud.vm_type_by_name(name).filter(offered),
            None => cloud
                .vm_types()
                .filter(offered)
                .min_by(|a, b| a.cost.total_cmp(&b.cost).then(a.id.cmp(&b.id))),
        }
    }
}

impl Policy for SimplePolicy {
    fn run_algorithm(&mut self, cloud: &Cloud, request: &mut Request) -> bool {
        request.clear_plan();
        let Some(vm_type) = self.select_vm_type(cloud) else {
            return false;
        };
        for id in 0..self.map_vms {
            request
                .map_and_reduce_vm_provision_list
                .push(VmInstance::new(id, vm_type.id));
        }
        for id in 0..self.reduce_vms {
            request
                .reduce_only_vm_provision_list
                .push(VmInstance::new(self.map_vms + id, vm_type.id));
        }
        if self.reduce_vms > 0 {
            for (i, task) in request.job.reduce_tasks.iter().enumerate() {
                let vm_id = self.map_vms + i as u32 % self.reduce_vms;
                request.scheduling_plan.insert(task.id, vm_id);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{DatacenterCharacteristics, DatacenterKind};
    use crate::job::Job;
    use crate::task::Task;

    fn cloud() -> Cloud {
        Cloud::new(
            vec![
                VmType::new(0, "large", 0.4, 400., 4),
                VmType::new(1, "small", 0.1, 100., 1),
                VmType::new(2, "unused", 0.01, 10., 1),
            ],
            vec![DatacenterCharacteristics {
                id: 0,
                name: "dc".to_string(),
                kind: DatacenterKind::Public,
                vm_types: [0, 1].into_iter().collect(),
                max_vms: None,
                bandwidth: None,
            }],
        )
    }

    fn request() -> Request {
        let job = Job::new(
            vec![Task::map(0, 0, 100., 0., 0.), Task::map(1, 0, 100., 0., 0.)],
            vec![Task::reduce(2, 0, 10.), Task::reduce(3, 0, 10.), Task::reduce(4, 0, 10.)],
        );
        Request::new(0, 0., 1., 100., "Simple", job)
    }

    #[test]
    fn cheapest_offered_type_by_default() {
        let mut request = request();
        let mut policy = SimplePolicy::new(None, 2, 0);
        assert!(policy.run_algorithm(&cloud(), &mut request));
        assert_eq!(
            request.map_and_reduce_vm_provision_list,
            vec![VmInstance::new(0, 1), VmInstance::new(1, 1)]
        );
        assert!(request.reduce_only_vm_provision_list.is_empty());
        assert!(request.scheduling_plan.is_empty());
        assert_eq!(request.validate_plan(), Ok(()));
    }

    #[test]
    fn reduce_only_vms() {
        let mut request = request();
        let mut policy = SimplePolicy::new(Some("large"), 1, 2);
        assert!(policy.run_algorithm(&cloud(), &mut request));
        assert_eq!(request.map_and_reduce_vm_provision_list, vec![VmInstance::new(0, 0)]);
        assert_eq!(
            request.reduce_only_vm_provision_list,
            vec![VmInstance::new(1, 0), VmInstance::new(2, 0)]
        );
        assert_eq!(request.scheduling_plan.iter().map(|(t, v)| (*t, *v)).collect::<Vec<_>>(), vec![(2, 1), (3, 2), (4, 1)]);
        assert_eq!(request.validate_plan(), Ok(()));
    }

    #[test]
    fn type_not_offered() {
        let mut request = request();
        let mut policy = SimplePolicy::new(Some("unused"), 1, 0);
        assert!(!policy.run_algorithm(&cloud(), &mut request));
        let mut policy = SimplePolicy::new(Some("huge"), 1, 0);
        assert!(!policy.run_algorithm(&cloud(), &mut request));
    }

    #[test]
    fn params() {
        let params = "Simple[map_vms=0]".parse().unwrap();
        assert!(SimplePolicy::from_params(&params).is_err());
        let params = "Simple[cores=2]".parse().unwrap();
        assert_eq!(
            SimplePolicy::from_params(&params).err(),
            Some("unknown parameter `cores`".to_string())
        );
        let params = "Simple[vm_type=small,reduce_vms=1]".parse().unwrap();
        let policy = SimplePolicy::from_params(&params).unwrap();
        assert_eq!(policy.vm_type.as_deref(), Some("small"));
        assert_eq!(policy.map_vms, 1);
        assert_eq!(policy.reduce_vms, 1);
    }
}
