// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods that watch migrations for changes

use super::DataStore;
use super::DocChange;
use crate::db::model::{
    Collection, MigrationStatusRecord, MinionReportRecord, ModelRecord,
};
use crate::db::txn::to_doc;
use crate::names::MigrationId;
use crate::phase::MigrationPhase;
use crate::watcher::NotifyWatcher;
use migration_common::api::external::Error;
use migration_common::typed_uuid::ModelUuid;
use serde_json::Value;
use slog::o;

impl DataStore {
    /// Watches for migrations of `model_id` starting or finishing
    ///
    /// Notifies when the model's active migration marker changes: when a
    /// migration is created and when it reaches a terminal phase.  Other
    /// phase changes do not notify.
    pub fn watch_model_migration(&self, model_id: ModelUuid) -> NotifyWatcher {
        let changes = self.subscribe_changes();
        let model_doc = model_id.to_string();
        let mut marker = self.model_active_migration(model_id);
        NotifyWatcher::spawn(
            self.log.new(o!(
                "watcher" => "model_migration",
                "model_uuid" => model_doc.clone(),
            )),
            changes,
            move |change: &DocChange| {
                if change.collection != Collection::Models
                    || change.id != model_doc
                {
                    return false;
                }
                let current = change
                    .doc
                    .as_ref()
                    .and_then(|doc| {
                        doc.get(ModelRecord::FIELD_ACTIVE_MIGRATION).cloned()
                    })
                    .unwrap_or(Value::Null);
                if current == marker {
                    return false;
                }
                marker = current;
                true
            },
        )
    }

    /// Watches every change to the status of any migration of `model_id`
    pub fn watch_migration_status(&self, model_id: ModelUuid) -> NotifyWatcher {
        let changes = self.subscribe_changes();
        let model_value = Value::String(model_id.to_string());
        NotifyWatcher::spawn(
            self.log.new(o!(
                "watcher" => "migration_status",
                "model_uuid" => model_id.to_string(),
            )),
            changes,
            move |change: &DocChange| {
                let model_id = change.doc.as_ref().and_then(|doc| {
                    doc.get(MigrationStatusRecord::FIELD_MODEL_ID)
                });
                change.collection == Collection::MigrationStatus
                    && model_id == Some(&model_value)
            },
        )
    }

    /// Watches for minion reports on `phase` of a migration
    pub fn watch_minion_reports(
        &self,
        migration_id: MigrationId,
        phase: MigrationPhase,
    ) -> Result<NotifyWatcher, Error> {
        let changes = self.subscribe_changes();
        let id_value = to_doc(&migration_id)?;
        let phase_value = to_doc(&phase)?;
        Ok(NotifyWatcher::spawn(
            self.log.new(o!(
                "watcher" => "minion_reports",
                "migration_id" => migration_id.to_string(),
                "phase" => phase.label(),
            )),
            changes,
            move |change: &DocChange| {
                let Some(doc) = change.doc.as_ref() else {
                    return false;
                };
                change.collection == Collection::MinionReports
                    && doc.get(MinionReportRecord::FIELD_MIGRATION_ID)
                        == Some(&id_value)
                    && doc.get(MinionReportRecord::FIELD_PHASE)
                        == Some(&phase_value)
            },
        ))
    }
}

