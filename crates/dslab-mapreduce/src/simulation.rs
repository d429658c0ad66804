//! Simulation configuration and execution.

use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use simcore::{Id, Simulation, SimulationContext};

use crate::config::SimulationConfig;
use crate::datacenter::Datacenter;
use crate::engine::MapReduceEngine;
use crate::error::ConfigError;
use crate::events::request::EndOfSimulation;
use crate::policy::registry::PolicyRegistry;
use crate::report::RunReport;

const ENGINE_NAME: &str = "engine";
const CLIENT_NAME: &str = "client";

/// Provides a convenient API for configuring and running simulations of MapReduce requests.
pub struct MapReduceSimulation {
    pub sim: Simulation,
    engine: Rc<RefCell<MapReduceEngine>>,
    engine_id: Id,
    datacenters: Vec<Rc<RefCell<Datacenter>>>,
    client: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl MapReduceSimulation {
    /// Creates simulation with provided random seed and config using the default policies.
    pub fn new(seed: u64, config: SimulationConfig) -> Result<Self, ConfigError> {
        Self::with_registry(seed, config, PolicyRegistry::with_default_policies())
    }

    /// Creates simulation with provided random seed, config and policy registry.
    ///
    /// Registers datacenter components and the engine, and starts resource discovery.
    pub fn with_registry(seed: u64, config: SimulationConfig, registry: PolicyRegistry) -> Result<Self, ConfigError> {
        for dc in config.datacenters.iter() {
            if dc.name == ENGINE_NAME || dc.name == CLIENT_NAME {
                return Err(ConfigError::DuplicateName {
                    what: "component",
                    name: dc.name.clone(),
                });
            }
        }
        let requests = config.build_requests()?;
        let sim_config = Rc::new(config);
        let mut sim = Simulation::new(seed);

        let mut datacenters = Vec::new();
        let mut datacenter_ids = Vec::new();
        for dc_config in sim_config.datacenters.iter() {
            let datacenter = rc!(refcell!(Datacenter::new(
                dc_config,
                sim.create_context(&dc_config.name),
                sim_config.clone(),
            )));
            datacenter_ids.push(sim.add_handler(&dc_config.name, datacenter.clone()));
            datacenters.push(datacenter);
        }

        let engine = rc!(refcell!(MapReduceEngine::new(
            requests,
            registry,
            datacenter_ids,
            sim.create_context(ENGINE_NAME),
            sim_config.clone(),
        )));
        let engine_id = sim.add_handler(ENGINE_NAME, engine.clone());
        let client = sim.create_context(CLIENT_NAME);
        engine.borrow_mut().start();

        Ok(Self {
            sim,
            engine,
            engine_id,
            datacenters,
            client,
            sim_config,
        })
    }

    /// Runs the simulation until all requests are finished (or until the configured simulation length),
    /// then delivers the end-of-simulation event and returns the report.
    pub fn run(&mut self) -> RunReport {
        match self.sim_config.simulation_length {
            Some(length) => {
                self.sim.step_until_time(length);
            }
            None => self.sim.step_until_no_events(),
        }
        self.end();
        self.sim.step_until_no_events();
        self.report()
    }

    /// Sends the end-of-simulation event to the engine, which finalizes the run if it is not finished yet.
    pub fn end(&mut self) {
        self.client.emit_now(EndOfSimulation {}, self.engine_id);
    }

    /// Returns the report produced at finalization, or the report of the current state if the run
    /// is not finalized yet.
    pub fn report(&self) -> RunReport {
        let engine = self.engine.borrow();
        match engine.report() {
            Some(report) => report.clone(),
            None => engine.build_report(),
        }
    }

    pub fn engine(&self) -> Rc<RefCell<MapReduceEngine>> {
        self.engine.clone()
    }

    pub fn datacenter(&self, name: &str) -> Option<Rc<RefCell<Datacenter>>> {
        self.datacenters
            .iter()
            .find(|dc| dc.borrow().characteristics().name == name)
            .cloned()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.sim_config
    }

    /// Performs a single step through the simulation.
    ///
    /// See [Simulation::step()](simcore::Simulation::step).
    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    /// Performs the specified number of steps through the simulation.
    ///
    /// See [Simulation::steps()](simcore::Simulation::steps).
    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    /// Steps through the simulation with duration limit.
    ///
    /// See [Simulation::step_for_duration()](simcore::Simulation::step_for_duration).
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.sim.step_for_duration(duration)
    }

    /// Steps through the simulation until there are no pending events left.
    ///
    /// See [Simulation::step_until_no_events()](simcore::Simulation::step_until_no_events).
    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events();
    }

    /// Returns the total number of created events.
    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim.time()
    }
}
