use std::io::Write;

use env_logger::Builder;

use dslab_mapreduce::cloud::Cloud;
use dslab_mapreduce::config::SimulationConfig;
use dslab_mapreduce::error::{PolicyResolutionError, RequestError};
use dslab_mapreduce::policy::registry::PolicyRegistry;
use dslab_mapreduce::policy::Policy;
use dslab_mapreduce::provisioning::{RequestPhase, Stage};
use dslab_mapreduce::report::RunReport;
use dslab_mapreduce::request::Request;
use dslab_mapreduce::simulation::MapReduceSimulation;
use dslab_mapreduce::task::{TaskKind, TaskStatus};
use dslab_mapreduce::vm::VmInstance;

const VM_TYPES: &str = r#"
vm_types:
  - name: small
    cost: 0.1
    mips: 100
  - name: large
    cost: 0.4
    mips: 400
"#;

fn init_logger() {
    let _ = Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .is_test(true)
        .try_init();
}

fn config(body: &str) -> SimulationConfig {
    init_logger();
    format!("{}{}", VM_TYPES, body).parse().unwrap()
}

fn run(body: &str) -> (MapReduceSimulation, RunReport) {
    let mut sim = MapReduceSimulation::new(123, config(body)).unwrap();
    let report = sim.run();
    (sim, report)
}

fn dispatched_vms(sim: &MapReduceSimulation) -> Vec<u32> {
    sim.engine().borrow().dispatch_log().iter().map(|d| d.vm_id).collect()
}

/// Provisions `vms` VMs of the first VM type and binds task i of the request to VM i % vms.
struct PinnedPolicy {
    vms: u32,
}

impl Policy for PinnedPolicy {
    fn run_algorithm(&mut self, _cloud: &Cloud, request: &mut Request) -> bool {
        for id in 0..self.vms {
            request.map_and_reduce_vm_provision_list.push(VmInstance::new(id, 0));
        }
        let task_ids: Vec<u64> = request.job.tasks().map(|t| t.id).collect();
        for (i, task_id) in task_ids.into_iter().enumerate() {
            request.scheduling_plan.insert(task_id, i as u32 % self.vms);
        }
        true
    }
}

fn pinned_registry() -> PolicyRegistry {
    let mut registry = PolicyRegistry::with_default_policies();
    registry.register("Pinned", |params| {
        let vms: u32 = params.try_get("vms")?.unwrap_or(1);
        Ok(Box::new(PinnedPolicy { vms }) as Box<dyn Policy>)
    });
    registry
}

#[test]
fn single_vm_map_then_reduce() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple
    job:
      map_tasks:
        - length: 1000
      reduce_tasks:
        - length: 500
"#);

    let engine = sim.engine();
    let engine = engine.borrow();
    let log = engine.dispatch_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].kind, TaskKind::Map);
    assert_eq!(log[0].time, 0.);
    assert_eq!(log[1].kind, TaskKind::Reduce);
    assert_eq!(log[1].time, 10.);
    assert_eq!(dispatched_vms(&sim), vec![0, 0]);
    assert!(engine.errors().is_empty());
    assert_eq!(engine.request_phase(0), Some(RequestPhase::Completed));

    let summary = report.request(0).unwrap();
    assert_eq!(summary.state, "Completed");
    assert_eq!(summary.execution_time, 15.);
    assert_eq!(summary.vms.len(), 1);
    assert_eq!(summary.vms[0].processing_time, 15.);
    assert_eq!(summary.total_cost, 0.1);
    assert!(!summary.deadline_violated);
    assert!(!summary.budget_violated);
    assert_eq!(report.task(0).unwrap().status, TaskStatus::Success);
    assert_eq!(report.task(1).unwrap().execution_time, Some(5.));
    assert!(engine.is_finalized());
    assert!(!report.aborted);
}

#[test]
fn pinned_tasks_share_one_vm() {
    let config = config(
        r#"
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Pinned[vms=1]
    job:
      map_tasks:
        - length: 1000
      reduce_tasks:
        - length: 500
"#,
    );
    let mut sim = MapReduceSimulation::with_registry(123, config, pinned_registry()).unwrap();
    let report = sim.run();
    assert_eq!(dispatched_vms(&sim), vec![0, 0]);
    assert_eq!(report.request(0).unwrap().total_cost, 0.1);
    assert_eq!(report.task(1).unwrap().vm_type.as_deref(), Some("small"));
}

#[test]
fn delays_are_accounted() {
    let (sim, report) = run(r#"
message_delay: 1
vm_startup_delay: 2
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 10
    policy: Simple
    job:
      map_tasks:
        - length: 1000
      reduce_tasks:
        - length: 500
"#);
    let times: Vec<f64> = sim.engine().borrow().dispatch_log().iter().map(|d| d.time).collect();
    // discovery 0..2, creation request 2..3, ack 3..6
    assert_eq!(times, vec![6., 18.]);
    let map = report.task(0).unwrap();
    assert_eq!(map.start_time, Some(7.));
    assert_eq!(map.finish_time, Some(17.));
    let summary = report.request(0).unwrap();
    assert_eq!(summary.execution_time, 18.);
    assert!(summary.deadline_violated);
    assert!(!summary.budget_violated);
    assert_eq!(report.finish_time, 25.);
}

#[test]
fn reduce_tasks_wait_for_all_maps() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[map_vms=2]
    job:
      map_tasks:
        - length: 1000
        - length: 3000
        - length: 2000
      reduce_tasks:
        - length: 500
        - length: 500
"#);
    let last_map_finish = report
        .tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Map)
        .filter_map(|t| t.finish_time)
        .fold(0., f64::max);
    assert_eq!(last_map_finish, 30.);

    let engine = sim.engine();
    let engine = engine.borrow();
    let reduces: Vec<_> = engine
        .dispatch_log()
        .iter()
        .filter(|d| d.kind == TaskKind::Reduce)
        .collect();
    assert_eq!(reduces.len(), 2);
    for dispatch in reduces.iter() {
        assert!(dispatch.time >= last_map_finish);
    }
    assert_eq!(reduces.iter().map(|d| d.vm_id).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(report.request(0).unwrap().state, "Completed");
}

#[test]
fn unbound_tasks_are_placed_round_robin() {
    let (sim, _) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[map_vms=2]
    job:
      map_tasks:
        - length: 1000
        - length: 1000
        - length: 1000
"#);
    assert_eq!(sim.engine().borrow().created_request_vms(0), &[0, 1]);
    assert_eq!(dispatched_vms(&sim), vec![0, 1, 0]);
}

#[test]
fn vm_ids_are_unique_across_requests() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[map_vms=2]
    job:
      map_tasks:
        - length: 1000
  - submission_time: 5
    budget: 1
    deadline: 100
    policy: Simple
    job:
      map_tasks:
        - length: 1000
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.created_request_vms(0), &[0, 1]);
    assert_eq!(engine.created_request_vms(1), &[2]);
    assert_eq!(engine.created_vms(), vec![0, 1, 2]);
    assert_eq!(report.task(1).unwrap().vm_id, Some(2));
    assert_eq!(report.task(1).unwrap().submission_time, Some(5.));
}

#[test]
fn retry_in_datacenter_offering_the_type() {
    let (sim, report) = run(r#"
datacenters:
  - name: a
    vm_types: [small]
  - name: b
    vm_types: [large]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[vm_type=large]
    job:
      map_tasks:
        - length: 4000
"#);
    let b = sim.sim.lookup_id("b");
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.vm_location(0), Some(b));
    assert!(engine.errors().is_empty());
    assert_eq!(engine.dispatch_log()[0].datacenter_id, b);
    assert_eq!(report.task(0).unwrap().execution_time, Some(10.));
    assert_eq!(sim.datacenter("a").unwrap().borrow().vm_count(), 0);
}

#[test]
fn retry_after_capacity_failure() {
    let (sim, report) = run(r#"
datacenters:
  - name: a
    vm_types: [small]
    max_vms: 1
  - name: b
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[map_vms=2]
    job:
      map_tasks:
        - length: 1000
        - length: 1000
"#);
    let a = sim.sim.lookup_id("a");
    let b = sim.sim.lookup_id("b");
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.vm_location(0), Some(a));
    assert_eq!(engine.vm_location(1), Some(b));
    assert_eq!(
        engine.errors(),
        &[RequestError::VmCreation {
            request_id: 0,
            vm_id: 1,
            datacenter: "a".to_string(),
        }]
    );
    assert_eq!(dispatched_vms(&sim), vec![0, 1]);
    assert_eq!(report.request(0).unwrap().state, "Completed");
}

#[test]
fn tasks_of_missing_vms_are_rebound() {
    let config = config(
        r#"
datacenters:
  - name: dc
    vm_types: [small]
    max_vms: 1
requests:
  - budget: 1
    deadline: 100
    policy: Pinned[vms=2]
    job:
      map_tasks:
        - length: 1000
        - length: 1000
"#,
    );
    let mut sim = MapReduceSimulation::with_registry(123, config, pinned_registry()).unwrap();
    let report = sim.run();
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.created_vms(), vec![0]);
    assert_eq!(engine.errors().len(), 1);
    assert_eq!(dispatched_vms(&sim), vec![0, 0]);
    assert_eq!(report.task(1).unwrap().finish_time, Some(20.));
    assert_eq!(report.request(0).unwrap().state, "Completed");
}

#[test]
fn total_provisioning_failure_abandons_request() {
    let (sim, report) = run(r#"
datacenters:
  - name: bad
    vm_types: [small]
    vm_failure_probability: 1.0
  - name: good
    vm_types: [large]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[vm_type=small,map_vms=2]
    job:
      map_tasks:
        - length: 1000
  - submission_time: 100
    budget: 1
    deadline: 100
    policy: Simple[vm_type=large]
    job:
      map_tasks:
        - length: 4000
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert!(engine.created_request_vms(0).is_empty());
    assert!(engine.dispatch_log().iter().all(|d| d.request_id == 1));
    assert_eq!(engine.request_phase(0), Some(RequestPhase::Abandoned));
    assert_eq!(engine.request_phase(1), Some(RequestPhase::Completed));
    let total_failures: Vec<_> = engine
        .errors()
        .iter()
        .filter(|e| matches!(e, RequestError::TotalProvisioning { .. }))
        .collect();
    assert_eq!(
        total_failures,
        vec![&RequestError::TotalProvisioning {
            request_id: 0,
            stage: Stage::Map
        }]
    );

    let task = report.task(0).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.submission_time, None);
    assert_eq!(report.request(0).unwrap().total_cost, 0.);
    assert!(!report.aborted);
    assert_eq!(report.finish_time, 110.);
}

#[test]
fn total_provisioning_failure_aborts_run() {
    let (sim, report) = run(r#"
abort_on_total_provisioning_failure: true
datacenters:
  - name: bad
    vm_types: [small]
    vm_failure_probability: 1.0
  - name: good
    vm_types: [large]
requests:
  - budget: 1
    deadline: 100
    policy: Simple[vm_type=small]
    job:
      map_tasks:
        - length: 1000
  - submission_time: 100
    budget: 1
    deadline: 100
    policy: Simple[vm_type=large]
    job:
      map_tasks:
        - length: 4000
"#);
    assert!(report.aborted);
    assert_eq!(report.finish_time, 0.);
    assert_eq!(report.request(0).unwrap().state, "Abandoned");
    assert_eq!(report.request(1).unwrap().state, "Pending");
    let engine = sim.engine();
    let engine = engine.borrow();
    assert!(engine.is_aborted());
    assert!(engine.dispatch_log().is_empty());
    assert_eq!(engine.request_phase(1), Some(RequestPhase::Pending));
}

#[test]
fn reduce_tasks_fall_back_to_map_vms() {
    let (sim, report) = run(r#"
abort_on_total_provisioning_failure: true
datacenters:
  - name: dc
    vm_types: [small]
    max_vms: 1
requests:
  - budget: 1
    deadline: 100
    policy: Simple[map_vms=1,reduce_vms=1]
    job:
      map_tasks:
        - length: 1000
      reduce_tasks:
        - length: 500
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.created_request_vms(0), &[0]);
    assert_eq!(
        engine.errors(),
        &[RequestError::VmCreation {
            request_id: 0,
            vm_id: 1,
            datacenter: "dc".to_string(),
        }]
    );
    let vms: Vec<(TaskKind, u32)> = engine.dispatch_log().iter().map(|d| (d.kind, d.vm_id)).collect();
    assert_eq!(vms, vec![(TaskKind::Map, 0), (TaskKind::Reduce, 0)]);
    assert_eq!(engine.dispatch_log()[1].time, 10.);
    assert_eq!(engine.request_phase(0), Some(RequestPhase::Completed));

    assert!(!report.aborted);
    let summary = report.request(0).unwrap();
    assert_eq!(summary.state, "Completed");
    assert_eq!(summary.vms[0].processing_time, 15.);
    assert_eq!(summary.vms[1].processing_time, 0.);
    assert_eq!(report.task(1).unwrap().status, TaskStatus::Success);
}

#[test]
fn partially_created_reduce_vms() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
    max_vms: 2
requests:
  - budget: 1
    deadline: 100
    policy: Simple[map_vms=1,reduce_vms=2]
    job:
      map_tasks:
        - length: 1000
      reduce_tasks:
        - length: 500
        - length: 500
        - length: 500
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.created_request_vms(0), &[0, 1]);
    assert_eq!(engine.errors().len(), 1);
    assert!(matches!(engine.errors()[0], RequestError::VmCreation { vm_id: 2, .. }));
    // reduce task 2 was pinned to the missing vm 2 and goes round-robin instead
    let reduces: Vec<(u64, u32)> = engine
        .dispatch_log()
        .iter()
        .filter(|d| d.kind == TaskKind::Reduce)
        .map(|d| (d.task_id, d.vm_id))
        .collect();
    assert_eq!(reduces, vec![(1, 1), (2, 0), (3, 1)]);
    assert_eq!(report.request(0).unwrap().state, "Completed");
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Success));
}

#[test]
fn planning_errors_do_not_block_other_requests() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small, large]
requests:
  - budget: 1
    deadline: 100
    policy: Heft
    job:
      map_tasks:
        - length: 1000
  - budget: 1
    deadline: 1
    policy: LffCost
    job:
      map_tasks:
        - length: 4000
  - budget: 1
    deadline: 100
    policy: Simple[map_vms
    job:
      map_tasks:
        - length: 1000
  - budget: 1
    deadline: 100
    policy: Simple
    job:
      map_tasks:
        - length: 1000
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    let errors = engine.errors();
    assert_eq!(errors.len(), 3);
    assert_eq!(
        errors[0],
        RequestError::PolicyResolution {
            request_id: 0,
            source: PolicyResolutionError::UnknownPolicy("Heft".to_string()),
        }
    );
    assert!(matches!(&errors[1], RequestError::Planning { request_id: 1, policy, .. } if policy == "LffCost"));
    assert!(matches!(
        &errors[2],
        RequestError::PolicyResolution {
            request_id: 2,
            source: PolicyResolutionError::InvalidIdentifier(_),
        }
    ));
    assert!(errors.iter().all(|e| e.is_fatal()));

    for request_id in 0..3 {
        assert_eq!(engine.request_phase(request_id), Some(RequestPhase::Abandoned));
        assert!(engine.requests().get(request_id).unwrap().vms().next().is_none());
    }
    assert_eq!(engine.request_phase(3), Some(RequestPhase::Completed));
    assert_eq!(engine.dispatch_log().len(), 1);
    assert_eq!(report.errors.len(), 3);
}

#[test]
fn reduce_only_vms_are_provisioned_after_map_phase() {
    let (sim, report) = run(r#"
message_delay: 1
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 1000
    policy: Simple[map_vms=1,reduce_vms=2]
    job:
      map_tasks:
        - length: 1000
        - length: 1000
      reduce_tasks:
        - length: 500
        - length: 500
        - length: 500
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.created_request_vms(0), &[0, 1, 2]);
    let log = engine.dispatch_log();
    let vms: Vec<(TaskKind, u32)> = log.iter().map(|d| (d.kind, d.vm_id)).collect();
    assert_eq!(
        vms,
        vec![
            (TaskKind::Map, 0),
            (TaskKind::Map, 0),
            (TaskKind::Reduce, 1),
            (TaskKind::Reduce, 2),
            (TaskKind::Reduce, 1)
        ]
    );
    // maps run 5..15 and 15..25, the last one returns at 26 and reduce vms are acknowledged at 28
    assert_eq!(log[2].time, 28.);
    let summary = report.request(0).unwrap();
    assert_eq!(summary.state, "Completed");
    assert_eq!(summary.vms.len(), 3);
    assert_eq!(summary.vms[1].processing_time, 10.);
    assert_eq!(summary.vms[2].processing_time, 5.);
}

#[test]
fn requests_without_map_tasks() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple
    job:
      reduce_tasks:
        - length: 500
  - budget: 1
    deadline: 100
    policy: Simple
    job: {}
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(engine.dispatch_log().len(), 1);
    assert_eq!(engine.dispatch_log()[0].kind, TaskKind::Reduce);
    assert_eq!(engine.request_phase(0), Some(RequestPhase::Completed));
    assert_eq!(engine.request_phase(1), Some(RequestPhase::Completed));
    assert_eq!(report.request(0).unwrap().execution_time, 5.);
    assert_eq!(report.request(1).unwrap().execution_time, 0.);
    assert_eq!(report.request(1).unwrap().total_cost, 0.);
}

#[test]
fn transfer_time_extends_map_tasks() {
    let (_, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
    bandwidth: 10
requests:
  - budget: 1
    deadline: 100
    policy: Simple
    job:
      map_tasks:
        - length: 1000
          data_size: 30
          intermediate_size: 20
      reduce_tasks:
        - length: 500
"#);
    assert_eq!(report.task(0).unwrap().execution_time, Some(15.));
    assert_eq!(report.task(1).unwrap().execution_time, Some(5.));
    assert_eq!(report.request(0).unwrap().execution_time, 20.);
}

#[test]
fn failed_tasks_are_reported() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
    task_failure_probability: 1.0
requests:
  - budget: 1
    deadline: 100
    policy: Simple
    job:
      map_tasks:
        - length: 1000
      reduce_tasks:
        - length: 500
"#);
    let engine = sim.engine();
    let engine = engine.borrow();
    assert_eq!(
        engine.errors(),
        &[
            RequestError::TaskFailed {
                request_id: 0,
                task_id: 0,
                status: TaskStatus::Failed,
            },
            RequestError::TaskFailed {
                request_id: 0,
                task_id: 1,
                status: TaskStatus::Failed,
            }
        ]
    );
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Failed));
    let summary = report.request(0).unwrap();
    assert_eq!(summary.state, "Completed");
    assert_eq!(summary.total_cost, 0.);
    assert_eq!(summary.execution_time, 0.);
}

#[test]
fn simulation_length_stops_the_run() {
    let (sim, report) = run(r#"
simulation_length: 100
datacenters:
  - name: dc
    vm_types: [small]
requests:
  - budget: 1
    deadline: 100
    policy: Simple
    job:
      map_tasks:
        - length: 100000
"#);
    assert_eq!(report.finish_time, 100.);
    assert_eq!(report.request(0).unwrap().state, "Running(Map)");
    assert!(report.errors.is_empty());
    let engine = sim.engine();
    let engine = engine.borrow();
    assert!(engine.is_finalized());
    assert_eq!(engine.in_flight_task_count(), 1);
    assert_eq!(sim.datacenter("dc").unwrap().borrow().vm_count(), 0);
}

#[test]
fn reserved_component_names_are_rejected() {
    let config = config(
        r#"
datacenters:
  - name: engine
    vm_types: [small]
"#,
    );
    assert!(MapReduceSimulation::new(123, config).is_err());
}

#[test]
fn run_without_requests() {
    let (sim, report) = run(r#"
datacenters:
  - name: dc
    vm_types: [small]
"#);
    assert!(sim.engine().borrow().is_finalized());
    assert!(report.requests.is_empty());
    assert_eq!(report.finish_time, 0.);
}

#[test]
fn hybrid_cloud_config() {
    let config = SimulationConfig::from_file("test-configs/hybrid-cloud.yaml").unwrap();
    assert_eq!(config.requests[0].job.map_tasks.len(), 4);
    assert_eq!(config.requests[0].job_file, "jobs/wordcount.yaml");
    let mut sim = MapReduceSimulation::new(123, config).unwrap();
    let report = sim.run();
    assert_eq!(report.requests.len(), 3);
    for summary in report.requests.iter() {
        assert_eq!(summary.state, "Completed");
    }
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Success));
    // the cost-driven request fits into the free private datacenter
    assert_eq!(report.request(0).unwrap().total_cost, 0.);
    assert!(report.request(1).unwrap().total_cost > 0.);
}
