//! Simulation of MapReduce requests executed on virtual machines provisioned in public and private clouds.
//!
//! Each request carries a job (map and reduce tasks), a budget, a deadline and the name of the provisioning
//! policy to use. The [`engine::MapReduceEngine`] discovers the datacenters, runs the policy of every request at
//! its submission time, provisions the selected VMs, dispatches map tasks, then reduce tasks once all map tasks
//! of the request are finished, and finally accounts execution cost and deadline/budget violations.

pub mod cloud;
pub mod config;
pub mod datacenter;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod policy;
pub mod provisioning;
pub mod report;
pub mod request;
pub mod simulation;
pub mod task;
pub mod vm;
