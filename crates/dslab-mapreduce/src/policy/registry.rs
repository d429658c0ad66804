use std::collections::BTreeMap;

use crate::error::PolicyResolutionError;
use crate::policy::lff::{LffObjective, LffPolicy};
use crate::policy::params::PolicyParams;
use crate::policy::simple::SimplePolicy;
use crate::policy::Policy;

/// Creates a policy instance from identifier parameters.
pub type PolicyFactory = Box<dyn Fn(&PolicyParams) -> Result<Box<dyn Policy>, String>>;

/// Mapping from policy names to factories.
pub struct PolicyRegistry {
    factories: BTreeMap<String, PolicyFactory>,
}

impl PolicyRegistry {
    /// Creates empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Creates registry with `Simple`, `LffCost` and `LffPerformance` policies.
    pub fn with_default_policies() -> Self {
        let mut registry = Self::new();
        registry.register("Simple", |params| Ok(Box::new(SimplePolicy::from_params(params)?)));
        registry.register("LffCost", |params| {
            Ok(Box::new(LffPolicy::from_params(LffObjective::Cost, params)?))
        });
        registry.register("LffPerformance", |params| {
            Ok(Box::new(LffPolicy::from_params(LffObjective::Performance, params)?))
        });
        registry
    }

    /// Registers policy factory under the given name, replacing the previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PolicyParams) -> Result<Box<dyn Policy>, String> + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|name| name.as_str())
    }

    /// Parses policy identifier and creates the policy instance.
    pub fn resolve(&self, identifier: &str) -> Result<Box<dyn Policy>, PolicyResolutionError> {
        let params: PolicyParams = identifier.parse()?;
        let factory = self
            .factories
            .get(params.name())
            .ok_or_else(|| PolicyResolutionError::UnknownPolicy(params.name().to_string()))?;
        factory(&params).map_err(|reason| PolicyResolutionError::Instantiation {
            policy: params.to_string(),
            reason,
        })
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_default_policies()
    }
}
