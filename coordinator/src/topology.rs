// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Which agents are expected to report on each migration phase

use crate::names::AgentTag;
use crate::phase::MigrationPhase;
use migration_common::api::external::Error;
use migration_common::typed_uuid::ModelUuid;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Source of the set of agents expected to acknowledge a migration phase
///
/// The coordinator does not store this: it is derived from the model's
/// current machines and units each time reports are tallied.
pub trait MinionTopology: Send + Sync {
    fn expected_agents(
        &self,
        model_id: ModelUuid,
        phase: MigrationPhase,
    ) -> Result<BTreeSet<AgentTag>, Error>;
}

/// A topology maintained by hand, with the same agents expected to report on
/// every phase
#[derive(Debug, Default)]
pub struct StaticTopology {
    agents: Mutex<BTreeMap<ModelUuid, BTreeSet<AgentTag>>>,
}

impl StaticTopology {
    pub fn new() -> StaticTopology {
        StaticTopology::default()
    }

    pub fn add_agent(&self, model_id: ModelUuid, agent: AgentTag) {
        self.agents.lock().unwrap().entry(model_id).or_default().insert(agent);
    }

    pub fn remove_agent(&self, model_id: ModelUuid, agent: &AgentTag) {
        let mut agents = self.agents.lock().unwrap();
        if let Some(model_agents) = agents.get_mut(&model_id) {
            model_agents.remove(agent);
            if model_agents.is_empty() {
                agents.remove(&model_id);
            }
        }
    }
}

impl MinionTopology for StaticTopology {
    fn expected_agents(
        &self,
        model_id: ModelUuid,
        _phase: MigrationPhase,
    ) -> Result<BTreeSet<AgentTag>, Error> {
        Ok(self
            .agents
            .lock()
            .unwrap()
            .get(&model_id)
            .cloned()
            .unwrap_or_default())
    }
}
