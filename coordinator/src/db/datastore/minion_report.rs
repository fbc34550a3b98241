// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on minion reports

use super::DataStore;
use crate::db::model::{Collection, MinionReportRecord};
use crate::db::txn::{to_doc, Assert, TxnError, TxnOp};
use crate::names::{AgentTag, MigrationId};
use crate::phase::MigrationPhase;
use migration_common::api::external::Error;
use migration_common::api::external::ListResultVec;
use migration_common::api::external::ResourceType;
use migration_common::api::external::UpdateResult;
use slog::{debug, warn};

impl DataStore {
    /// Records that `agent` has finished `phase` of a migration
    ///
    /// Fails with [`Error::InvalidValue`] if `agent` is not a valid tag.
    /// Reporting the same outcome again is a no-op.  Reporting a different
    /// outcome for the same agent and phase fails with
    /// [`Error::ConflictingReport`].  Reports are accepted regardless of the
    /// migration's current phase.
    pub async fn migration_minion_report(
        &self,
        migration_id: MigrationId,
        phase: MigrationPhase,
        agent: &AgentTag,
        success: bool,
    ) -> UpdateResult<()> {
        if !agent.is_valid() {
            return Err(Error::invalid_value(
                "agent",
                &format!("{:?} is not a valid agent tag", agent),
            ));
        }
        let report = MinionReportRecord {
            migration_id,
            phase,
            agent: agent.clone(),
            success,
        };
        let doc_id = report.doc_id();

        if self.check_existing_report(&doc_id, &report)? {
            return Ok(());
        }

        let ops = vec![
            TxnOp::new(Collection::Migrations, migration_id.to_string())
                .assert(Assert::DocExists),
            TxnOp::new(Collection::MinionReports, doc_id.clone())
                .insert(to_doc(&report)?),
        ];
        match self.run_transaction(ops).await {
            Ok(()) => {
                debug!(
                    self.log,
                    "recorded minion report";
                    "migration_id" => %migration_id,
                    "phase" => %phase,
                    "agent" => %agent,
                    "success" => success,
                );
                Ok(())
            }
            Err(TxnError::Internal(error)) => Err(error),
            // Either the migration does not exist or the same agent reported
            // concurrently.
            Err(TxnError::Aborted { .. }) => {
                if self.check_existing_report(&doc_id, &report)? {
                    return Ok(());
                }
                Err(Error::not_found_by_composite_id(
                    ResourceType::Migration,
                    &migration_id.to_string(),
                ))
            }
        }
    }

    /// Returns every report recorded for `phase` of a migration
    pub async fn migration_minion_reports(
        &self,
        migration_id: MigrationId,
        phase: MigrationPhase,
    ) -> ListResultVec<MinionReportRecord> {
        let migration_id = to_doc(&migration_id)?;
        let phase = to_doc(&phase)?;
        self.scan(Collection::MinionReports, |doc| {
            doc.get(MinionReportRecord::FIELD_MIGRATION_ID) == Some(&migration_id)
                && doc.get(MinionReportRecord::FIELD_PHASE) == Some(&phase)
        })
    }

    /// Returns true if `report` is already recorded, or an error if a
    /// different outcome is recorded for the same agent and phase
    fn check_existing_report(
        &self,
        doc_id: &str,
        report: &MinionReportRecord,
    ) -> Result<bool, Error> {
        let Some(existing) = self
            .doc::<MinionReportRecord>(Collection::MinionReports, doc_id)?
        else {
            return Ok(false);
        };
        if existing.success != report.success {
            warn!(
                self.log,
                "conflicting minion report";
                "migration_id" => %report.migration_id,
                "phase" => %report.phase,
                "agent" => %report.agent,
                "recorded_success" => existing.success,
            );
            return Err(Error::ConflictingReport {
                migration_id: report.migration_id.to_string(),
                phase: report.phase.to_string(),
                agent: report.agent.to_string(),
            });
        }
        Ok(true)
    }
}
