//! Provisioning policies.
//!
//! A policy decides which VMs to provision for a request and how to bind its tasks to them.
//! Policies are resolved by identifier through the [`registry::PolicyRegistry`].

pub mod lff;
pub mod params;
pub mod registry;
pub mod simple;

use crate::cloud::Cloud;
use crate::request::Request;

/// Contract of a provisioning policy.
pub trait Policy {
    /// Builds a provisioning plan for the request.
    ///
    /// On success fills `map_and_reduce_vm_provision_list`, `reduce_only_vm_provision_list` and
    /// `scheduling_plan` of the request and returns true. VM ids are local to the request.
    /// Tasks left out of the plan are placed round-robin by the engine.
    /// Returns false if no feasible plan exists, the request lists are then ignored.
    fn run_algorithm(&mut self, cloud: &Cloud, request: &mut Request) -> bool;
}
