//! Simulation configuration.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use simcore::Id;

use crate::cloud::{DatacenterCharacteristics, DatacenterKind};
use crate::error::ConfigError;
use crate::job::Job;
use crate::request::{Request, Requests};
use crate::task::Task;
use crate::vm::VmType;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub message_delay: Option<f64>,
    pub vm_startup_delay: Option<f64>,
    pub simulation_length: Option<f64>,
    pub abort_on_total_provisioning_failure: Option<bool>,
    pub vm_types: Option<Vec<VmTypeConfig>>,
    pub datacenters: Option<Vec<RawDatacenterConfig>>,
    pub requests: Option<Vec<RawRequestConfig>>,
}

/// Holds configuration of a VM type.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct VmTypeConfig {
    /// VM type name, referenced by datacenters and policies.
    pub name: String,
    /// Price of one started hour.
    pub cost: f64,
    /// Processing speed in MIPS.
    pub mips: f64,
    /// Number of cores, 1 if not set.
    pub cores: Option<u32>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawDatacenterConfig {
    pub name: String,
    pub kind: Option<DatacenterKind>,
    pub vm_types: Vec<String>,
    pub max_vms: Option<u32>,
    pub bandwidth: Option<f64>,
    pub vm_failure_probability: Option<f64>,
    pub task_failure_probability: Option<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawRequestConfig {
    pub submission_time: Option<f64>,
    pub budget: f64,
    pub deadline: f64,
    pub job_file: Option<String>,
    pub user_class: Option<String>,
    pub policy: String,
    pub job: Option<JobConfig>,
}

/// Holds configuration of a map task.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct MapTaskConfig {
    /// Amount of computation in MI.
    pub length: f64,
    /// Input size in MB.
    #[serde(default)]
    pub data_size: f64,
    /// Intermediate output size in MB.
    #[serde(default)]
    pub intermediate_size: f64,
}

/// Holds configuration of a reduce task.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ReduceTaskConfig {
    /// Amount of computation in MI.
    pub length: f64,
}

/// Holds job description, either inline in the simulation config or in a separate job file.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
pub struct JobConfig {
    #[serde(default)]
    pub map_tasks: Vec<MapTaskConfig>,
    #[serde(default)]
    pub reduce_tasks: Vec<ReduceTaskConfig>,
}

impl JobConfig {
    /// Reads job description from YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let data = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Yaml { path: path_str, source })
    }

    /// Creates job tasks numbered from `next_task_id`, which is advanced past the created tasks.
    pub fn build(&self, request_id: u32, next_task_id: &mut u64) -> Job {
        let mut next_id = || {
            let id = *next_task_id;
            *next_task_id += 1;
            id
        };
        let map_tasks = self
            .map_tasks
            .iter()
            .map(|t| Task::map(next_id(), request_id, t.length, t.data_size, t.intermediate_size))
            .collect();
        let reduce_tasks = self
            .reduce_tasks
            .iter()
            .map(|t| Task::reduce(next_id(), request_id, t.length))
            .collect();
        Job::new(map_tasks, reduce_tasks)
    }

    fn validate(&self, request: usize) -> Result<(), ConfigError> {
        let lengths = self
            .map_tasks
            .iter()
            .map(|t| t.length)
            .chain(self.reduce_tasks.iter().map(|t| t.length));
        for length in lengths {
            check_non_negative(&format!("requests[{}].job.length", request), length)?;
        }
        for task in self.map_tasks.iter() {
            check_non_negative(&format!("requests[{}].job.data_size", request), task.data_size)?;
            check_non_negative(&format!("requests[{}].job.intermediate_size", request), task.intermediate_size)?;
        }
        Ok(())
    }
}

/// Holds resolved configuration of a datacenter.
#[derive(Debug, PartialEq, Clone)]
pub struct DatacenterConfig {
    pub name: String,
    /// Deployment model, public if not set.
    pub kind: DatacenterKind,
    /// Ids of offered VM types.
    pub vm_types: BTreeSet<u32>,
    /// Maximum number of running VMs, unlimited if not set.
    pub max_vms: Option<u32>,
    /// Bandwidth from the data source in MB/s, unlimited if not set.
    pub bandwidth: Option<f64>,
    /// Probability that a VM creation fails.
    pub vm_failure_probability: f64,
    /// Probability that a task execution fails.
    pub task_failure_probability: f64,
}

impl DatacenterConfig {
    /// Returns characteristics reported by the datacenter component with the given id.
    pub fn characteristics(&self, id: Id) -> DatacenterCharacteristics {
        DatacenterCharacteristics {
            id,
            name: self.name.clone(),
            kind: self.kind,
            vm_types: self.vm_types.clone(),
            max_vms: self.max_vms,
            bandwidth: self.bandwidth,
        }
    }
}

/// Holds resolved configuration of a request.
#[derive(Debug, PartialEq, Clone)]
pub struct RequestConfig {
    /// Delay from the end of resource discovery to the start of provisioning.
    pub submission_time: f64,
    pub budget: f64,
    /// Maximum execution time in seconds.
    pub deadline: f64,
    pub job_file: String,
    pub user_class: String,
    /// Policy identifier.
    pub policy: String,
    pub job: JobConfig,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Clone)]
pub struct SimulationConfig {
    /// Message delay in seconds for communications between the engine and datacenters.
    pub message_delay: f64,
    /// Time in seconds between VM creation and its readiness to run tasks.
    pub vm_startup_delay: f64,
    /// Simulation is stopped at this time if set.
    pub simulation_length: Option<f64>,
    /// Whether the whole run is aborted when no VM of some request can be created.
    pub abort_on_total_provisioning_failure: bool,
    /// VM types numbered in the order of declaration.
    pub vm_types: Vec<VmType>,
    pub datacenters: Vec<DatacenterConfig>,
    pub requests: Vec<RequestConfig>,
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    ///
    /// Job files are resolved relative to the directory of the config file.
    pub fn from_file<P: AsRef<Path>>(file_name: P) -> Result<Self, ConfigError> {
        let path = file_name.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        Self::parse(&data, &path.display().to_string(), &base_dir)
    }

    /// Creates simulation config from YAML string, job files are resolved relative to `base_dir`.
    pub fn from_yaml<P: AsRef<Path>>(data: &str, base_dir: P) -> Result<Self, ConfigError> {
        Self::parse(data, "<string>", base_dir.as_ref())
    }

    fn parse(data: &str, source_name: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(data).map_err(|source| ConfigError::Yaml {
            path: source_name.to_string(),
            source,
        })?;

        let message_delay = raw.message_delay.unwrap_or(0.);
        check_non_negative("message_delay", message_delay)?;
        let vm_startup_delay = raw.vm_startup_delay.unwrap_or(0.);
        check_non_negative("vm_startup_delay", vm_startup_delay)?;
        if let Some(length) = raw.simulation_length {
            check_non_negative("simulation_length", length)?;
        }

        let vm_types = resolve_vm_types(raw.vm_types.unwrap_or_default())?;
        let datacenters = resolve_datacenters(raw.datacenters.unwrap_or_default(), &vm_types)?;
        let requests = raw
            .requests
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| resolve_request(idx, raw, base_dir))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            message_delay,
            vm_startup_delay,
            simulation_length: raw.simulation_length,
            abort_on_total_provisioning_failure: raw.abort_on_total_provisioning_failure.unwrap_or(false),
            vm_types,
            datacenters,
            requests,
        })
    }

    pub fn vm_type(&self, id: u32) -> Option<&VmType> {
        self.vm_types.iter().find(|t| t.id == id)
    }

    /// Creates requests numbered in the order of declaration, with task ids unique across the run.
    pub fn build_requests(&self) -> Result<Requests, ConfigError> {
        let mut next_task_id = 0;
        let requests = self
            .requests
            .iter()
            .enumerate()
            .map(|(idx, config)| {
                let id = idx as u32;
                let job = config.job.build(id, &mut next_task_id);
                let mut request = Request::new(
                    id,
                    config.submission_time,
                    config.budget,
                    config.deadline,
                    &config.policy,
                    job,
                );
                request.job_file = config.job_file.clone();
                request.user_class = config.user_class.clone();
                request
            })
            .collect();
        Requests::new(requests)
    }
}

impl FromStr for SimulationConfig {
    type Err = ConfigError;

    /// Parses config with job files resolved relative to the working directory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml(s, PathBuf::new())
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0. {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("{} is not a non-negative number", value),
        })
    }
}

fn check_probability(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0. ..=1.).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("{} is not in [0, 1]", value),
        })
    }
}

fn resolve_vm_types(configs: Vec<VmTypeConfig>) -> Result<Vec<VmType>, ConfigError> {
    let mut names = HashSet::new();
    let mut vm_types = Vec::with_capacity(configs.len());
    for (id, config) in configs.into_iter().enumerate() {
        if !names.insert(config.name.clone()) {
            return Err(ConfigError::DuplicateName {
                what: "vm type",
                name: config.name,
            });
        }
        check_non_negative(&format!("vm_types.{}.cost", config.name), config.cost)?;
        if !(config.mips.is_finite() && config.mips > 0.) {
            return Err(ConfigError::InvalidValue {
                field: format!("vm_types.{}.mips", config.name),
                reason: format!("{} is not a positive number", config.mips),
            });
        }
        vm_types.push(VmType::new(
            id as u32,
            &config.name,
            config.cost,
            config.mips,
            config.cores.unwrap_or(1),
        ));
    }
    Ok(vm_types)
}

fn resolve_datacenters(
    configs: Vec<RawDatacenterConfig>,
    vm_types: &[VmType],
) -> Result<Vec<DatacenterConfig>, ConfigError> {
    let mut names = HashSet::new();
    let mut datacenters = Vec::with_capacity(configs.len());
    for raw in configs {
        if !names.insert(raw.name.clone()) {
            return Err(ConfigError::DuplicateName {
                what: "datacenter",
                name: raw.name,
            });
        }
        let mut offered = BTreeSet::new();
        for type_name in raw.vm_types.iter() {
            let vm_type = vm_types
                .iter()
                .find(|t| &t.name == type_name)
                .ok_or_else(|| ConfigError::UnknownVmType {
                    datacenter: raw.name.clone(),
                    vm_type: type_name.clone(),
                })?;
            offered.insert(vm_type.id);
        }
        if let Some(bandwidth) = raw.bandwidth {
            check_non_negative(&format!("datacenters.{}.bandwidth", raw.name), bandwidth)?;
        }
        let vm_failure_probability = raw.vm_failure_probability.unwrap_or(0.);
        check_probability(
            &format!("datacenters.{}.vm_failure_probability", raw.name),
            vm_failure_probability,
        )?;
        let task_failure_probability = raw.task_failure_probability.unwrap_or(0.);
        check_probability(
            &format!("datacenters.{}.task_failure_probability", raw.name),
            task_failure_probability,
        )?;
        datacenters.push(DatacenterConfig {
            name: raw.name,
            kind: raw.kind.unwrap_or(DatacenterKind::Public),
            vm_types: offered,
            max_vms: raw.max_vms,
            bandwidth: raw.bandwidth,
            vm_failure_probability,
            task_failure_probability,
        });
    }
    Ok(datacenters)
}

fn resolve_request(idx: usize, raw: RawRequestConfig, base_dir: &Path) -> Result<RequestConfig, ConfigError> {
    let submission_time = raw.submission_time.unwrap_or(0.);
    check_non_negative(&format!("requests[{}].submission_time", idx), submission_time)?;
    check_non_negative(&format!("requests[{}].budget", idx), raw.budget)?;
    check_non_negative(&format!("requests[{}].deadline", idx), raw.deadline)?;
    let job = match (raw.job, raw.job_file.as_ref()) {
        (Some(job), _) => job,
        (None, Some(job_file)) => JobConfig::from_file(base_dir.join(job_file))?,
        (None, None) => {
            return Err(ConfigError::InvalidValue {
                field: format!("requests[{}]", idx),
                reason: "either job or job_file must be set".to_string(),
            })
        }
    };
    job.validate(idx)?;
    Ok(RequestConfig {
        submission_time,
        budget: raw.budget,
        deadline: raw.deadline,
        job_file: raw.job_file.unwrap_or_default(),
        user_class: raw.user_class.unwrap_or_default(),
        policy: raw.policy,
        job,
    })
}
