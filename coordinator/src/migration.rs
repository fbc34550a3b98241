// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handles on individual migrations

use crate::db::model::{MigrationRecord, MigrationStatusRecord};
use crate::db::DataStore;
use crate::names::{AgentTag, MigrationId, UserTag};
use crate::phase::MigrationPhase;
use crate::spec::TargetInfo;
use crate::topology::MinionTopology;
use crate::watcher::NotifyWatcher;
use chrono::{DateTime, Utc};
use migration_common::api::external::Error;
use migration_common::api::external::LookupResult;
use migration_common::api::external::UpdateResult;
use migration_common::typed_uuid::ModelUuid;
use serde::{Deserialize, Serialize};
use slog::{o, Logger};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A caller's view of one migration
///
/// The view is a snapshot: it is updated by the handle's own writes and by
/// [`Migration::refresh`], but not by other writers.  Writes that depend on
/// the snapshot (phase changes) fail if it is stale.
pub struct Migration {
    log: Logger,
    datastore: Arc<DataStore>,
    topology: Arc<dyn MinionTopology>,
    record: MigrationRecord,
    status: MigrationStatusRecord,
}

impl Migration {
    pub(crate) fn new(
        log: &Logger,
        datastore: Arc<DataStore>,
        topology: Arc<dyn MinionTopology>,
        record: MigrationRecord,
        status: MigrationStatusRecord,
    ) -> Migration {
        let log = log.new(o!(
            "migration_id" => record.id.to_string(),
            "model_uuid" => record.model_id.to_string(),
        ));
        Migration { log, datastore, topology, record, status }
    }

    pub fn id(&self) -> MigrationId {
        self.record.id
    }

    pub fn model_id(&self) -> ModelUuid {
        self.record.model_id
    }

    pub fn attempt(&self) -> u32 {
        self.record.attempt
    }

    pub fn initiated_by(&self) -> &UserTag {
        &self.record.initiated_by
    }

    pub fn phase(&self) -> MigrationPhase {
        self.status.phase
    }

    pub fn phase_changed_time(&self) -> DateTime<Utc> {
        self.status.phase_changed_time
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.status.start_time
    }

    /// When the migration first reached the success phase, if it has
    pub fn success_time(&self) -> Option<DateTime<Utc>> {
        self.status.success_time
    }

    /// When the migration reached a terminal phase, if it has
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.status.end_time
    }

    pub fn status_message(&self) -> &str {
        &self.status.status_message
    }

    /// Moves the migration to `phase`
    ///
    /// Fails with [`Error::IllegalPhaseTransition`] if `phase` cannot follow
    /// the current phase, and with [`Error::PhaseAlreadyChanged`] if another
    /// writer changed the phase since this handle last read it.  Neither is
    /// retried; after the latter, [`Migration::refresh`] and decide again.
    pub async fn set_phase(&mut self, phase: MigrationPhase) -> UpdateResult<()> {
        self.status =
            self.datastore.migration_set_phase(&self.status, phase).await?;
        Ok(())
    }

    pub async fn set_status_message(&mut self, message: &str) -> UpdateResult<()> {
        self.datastore
            .migration_set_status_message(self.record.id, message)
            .await?;
        self.status.status_message = message.to_string();
        Ok(())
    }

    /// Re-reads the migration's mutable fields
    pub async fn refresh(&mut self) -> LookupResult<()> {
        self.status = self.datastore.migration_refresh(self.record.id).await?;
        Ok(())
    }

    pub async fn target_info(&self) -> LookupResult<TargetInfo> {
        self.datastore.migration_target_info(self.record.id).await
    }

    /// Records `agent`'s outcome for `phase`
    pub async fn minion_report(
        &self,
        agent: &AgentTag,
        phase: MigrationPhase,
        success: bool,
    ) -> UpdateResult<()> {
        self.datastore
            .migration_minion_report(self.record.id, phase, agent, success)
            .await
    }

    /// Tallies the reports for the handle's current phase
    pub async fn minion_reports(&self) -> LookupResult<MinionReports> {
        self.minion_reports_for_phase(self.status.phase).await
    }

    /// Tallies the reports for `phase` against the agents the topology
    /// expects to report
    pub async fn minion_reports_for_phase(
        &self,
        phase: MigrationPhase,
    ) -> LookupResult<MinionReports> {
        let expected =
            self.topology.expected_agents(self.record.model_id, phase)?;
        let reports = self
            .datastore
            .migration_minion_reports(self.record.id, phase)
            .await?;
        let mut tally = MinionReports {
            migration_id: self.record.id,
            phase,
            succeeded: BTreeSet::new(),
            failed: BTreeSet::new(),
            unknown: BTreeSet::new(),
        };
        for report in reports {
            if report.success {
                tally.succeeded.insert(report.agent);
            } else {
                tally.failed.insert(report.agent);
            }
        }
        tally.unknown = expected
            .into_iter()
            .filter(|agent| {
                !tally.succeeded.contains(agent) && !tally.failed.contains(agent)
            })
            .collect();
        slog::debug!(
            self.log,
            "tallied minion reports";
            "phase" => %phase,
            "succeeded" => tally.succeeded.len(),
            "failed" => tally.failed.len(),
            "unknown" => tally.unknown.len(),
        );
        Ok(tally)
    }

    /// Watches for reports on the handle's current phase
    ///
    /// The watcher keeps tracking that phase after the migration moves on;
    /// create a new one for each phase.
    pub fn watch_minion_reports(&self) -> Result<NotifyWatcher, Error> {
        self.datastore.watch_minion_reports(self.record.id, self.status.phase)
    }

    /// Returns the view of this migration needed to drive it
    pub async fn status(&self) -> LookupResult<MigrationStatus> {
        Ok(MigrationStatus {
            migration_id: self.record.id,
            model_id: self.record.model_id,
            attempt: self.record.attempt,
            phase: self.status.phase,
            phase_changed_time: self.status.phase_changed_time,
            target_info: self.target_info().await?,
        })
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("record", &self.record)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Which agents have acknowledged a phase
///
/// Agents that reported are listed whether or not the topology still
/// expects them.  `unknown` holds the expected agents that have not reported.
/// The three sets are disjoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MinionReports {
    pub migration_id: MigrationId,
    pub phase: MigrationPhase,
    pub succeeded: BTreeSet<AgentTag>,
    pub failed: BTreeSet<AgentTag>,
    pub unknown: BTreeSet<AgentTag>,
}

/// Snapshot of a migration for the worker driving it
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub migration_id: MigrationId,
    pub model_id: ModelUuid,
    pub attempt: u32,
    pub phase: MigrationPhase,
    pub phase_changed_time: DateTime<Utc>,
    pub target_info: TargetInfo,
}
