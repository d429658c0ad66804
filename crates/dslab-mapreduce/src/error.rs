//! Error types.

use thiserror::Error;

use crate::provisioning::Stage;
use crate::task::TaskStatus;

/// Failure to turn a policy identifier into a policy instance.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PolicyResolutionError {
    #[error("invalid policy identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("unknown policy `{0}`")]
    UnknownPolicy(String),
    #[error("failed to instantiate policy `{policy}`: {reason}")]
    Instantiation { policy: String, reason: String },
}

/// Errors recorded by the engine while processing requests.
///
/// The affected request (or VM, or task) is given up while other requests proceed. The only exception is
/// `TotalProvisioning` with `abort_on_total_provisioning_failure` set, which finalizes the whole run.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("request {request_id}: {source}")]
    PolicyResolution {
        request_id: u32,
        source: PolicyResolutionError,
    },
    #[error("request {request_id}: policy `{policy}` failed to build a plan: {reason}")]
    Planning {
        request_id: u32,
        policy: String,
        reason: String,
    },
    #[error("request {request_id}: creation of vm {vm_id} failed in datacenter {datacenter}")]
    VmCreation {
        request_id: u32,
        vm_id: u32,
        datacenter: String,
    },
    #[error("request {request_id}: none of the {stage} vms could be created in any datacenter")]
    TotalProvisioning { request_id: u32, stage: Stage },
    #[error("request {request_id}: task {task_id} finished with status {status}")]
    TaskFailed {
        request_id: u32,
        task_id: u64,
        status: TaskStatus,
    },
}

impl RequestError {
    pub fn request_id(&self) -> u32 {
        match self {
            RequestError::PolicyResolution { request_id, .. }
            | RequestError::Planning { request_id, .. }
            | RequestError::VmCreation { request_id, .. }
            | RequestError::TotalProvisioning { request_id, .. }
            | RequestError::TaskFailed { request_id, .. } => *request_id,
        }
    }

    /// Returns true if the error prevents the request from running at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RequestError::PolicyResolution { .. }
                | RequestError::Planning { .. }
                | RequestError::TotalProvisioning { .. }
        )
    }
}

/// Errors of loading simulation config and jobs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("can't parse YAML from {path}: {source}")]
    Yaml { path: String, source: serde_yaml::Error },
    #[error("unknown vm type `{vm_type}` referenced by datacenter `{datacenter}`")]
    UnknownVmType { datacenter: String, vm_type: String },
    #[error("duplicate {what} name `{name}`")]
    DuplicateName { what: &'static str, name: String },
    #[error("duplicate task id {0}")]
    DuplicateTaskId(u64),
    #[error("invalid value of `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
}
