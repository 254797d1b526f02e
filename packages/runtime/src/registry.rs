//! Agent registry.
//!
//! Rather than a process-wide mutable map populated by side-effecting
//! registration calls, the registry is built by an explicit constructor
//! function and handed to whatever needs to look agents up (the scheduler,
//! the facade's `run-now` handler). Registry lookup happens at fire time,
//! never at schedule-configuration time.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::Agent;

/// A constructed, immutable map from short agent name to agent instance.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent under its own `name()`. Panics in debug builds
    /// if the name is already registered — a configuration bug, not a
    /// runtime condition.
    #[must_use]
    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        let name = agent.name().to_string();
        debug_assert!(
            !self.agents.contains_key(&name),
            "duplicate agent registration for {name:?}"
        );
        self.agents.insert(name, agent);
        self
    }

    /// Looks up an agent by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// Lists the names of every registered agent.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentError, MetricMap};
    use async_trait::async_trait;

    struct Stub(&'static str);

    #[async_trait]
    impl Agent for Stub {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self) -> Result<MetricMap, AgentError> {
            Ok(MetricMap::new())
        }
    }

    #[test]
    fn looks_up_registered_agents_by_name() {
        let registry = AgentRegistry::new()
            .with(Arc::new(Stub("a")))
            .with(Arc::new(Stub("b")));

        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
