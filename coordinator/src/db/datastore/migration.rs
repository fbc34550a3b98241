// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on migrations

use super::DataStore;
use crate::db::model::{
    Collection, Life, MigrationMode, MigrationRecord, MigrationStatusRecord,
    MigrationTargetRecord, ModelRecord,
};
use crate::db::txn::{to_doc, Assert, TxnError, TxnOp};
use crate::names::MigrationId;
use crate::phase::MigrationPhase;
use crate::spec::MigrationSpec;
use crate::spec::TargetInfo;
use chrono::Utc;
use migration_common::api::external::CreateResult;
use migration_common::api::external::Error;
use migration_common::api::external::LookupResult;
use migration_common::api::external::LookupType;
use migration_common::api::external::ResourceType;
use migration_common::api::external::UpdateResult;
use migration_common::bail_unless;
use migration_common::typed_uuid::ModelUuid;
use slog::{info, warn};
use slog_error_chain::InlineErrorChain;

const STATUS_STARTING: &str = "starting";
const CREATE_FAILED: &str = "failed to create migration";

impl DataStore {
    /// Starts a migration of `model_id`
    ///
    /// Validation and the checks on the model all happen before the attempt
    /// number is drawn, and the draw is committed in the same transaction as
    /// the new records, so a failed creation never consumes an attempt.
    pub async fn migration_create(
        &self,
        model_id: ModelUuid,
        spec: &MigrationSpec,
    ) -> CreateResult<(MigrationRecord, MigrationStatusRecord)> {
        spec.validate()?;

        let exporting = to_doc(&MigrationMode::Exporting)?;
        let alive = to_doc(&Life::Alive)?;
        let result = self
            .transaction_with_retry("migration_create", |_| {
                let model = self.model_fetch_sync(model_id)?;
                if model.is_controller_model {
                    return Err(Error::conflict("controllers can't be migrated"));
                }
                if model.life != Life::Alive {
                    return Err(Error::conflict("model is not alive")
                        .internal_context(CREATE_FAILED));
                }
                if model.controller_id == spec.target_info.controller {
                    return Err(Error::conflict(
                        "model already attached to target controller",
                    ));
                }
                if model.active_migration.is_some() {
                    return Err(Error::conflict("already in progress")
                        .internal_context(CREATE_FAILED));
                }

                let (attempt, sequence_op) = self.sequence_next_op(model_id)?;
                let id = MigrationId::new(model_id, attempt);
                let now = Utc::now();
                let record = MigrationRecord {
                    id,
                    model_id,
                    attempt,
                    initiated_by: spec.initiated_by.clone(),
                    prior_mode: model.migration_mode,
                };
                let status = MigrationStatusRecord {
                    id,
                    model_id,
                    phase: MigrationPhase::Quiesce,
                    phase_changed_time: now,
                    start_time: now,
                    success_time: None,
                    end_time: None,
                    status_message: String::from(STATUS_STARTING),
                };
                let target = MigrationTargetRecord {
                    id,
                    model_id,
                    target: spec.target_info.clone(),
                };

                let ops = vec![
                    sequence_op,
                    TxnOp::new(Collection::Models, model_id.to_string())
                        .assert(Assert::FieldEq(
                            ModelRecord::FIELD_LIFE,
                            alive.clone(),
                        ))
                        .assert(Assert::FieldUnset(
                            ModelRecord::FIELD_ACTIVE_MIGRATION,
                        ))
                        .assert(Assert::FieldEq(
                            ModelRecord::FIELD_MIGRATION_MODE,
                            to_doc(&model.migration_mode)?,
                        ))
                        .set(ModelRecord::FIELD_ACTIVE_MIGRATION, to_doc(&id)?)
                        .set(
                            ModelRecord::FIELD_MIGRATION_MODE,
                            exporting.clone(),
                        ),
                    TxnOp::new(Collection::Migrations, id.to_string())
                        .insert(to_doc(&record)?),
                    TxnOp::new(Collection::MigrationStatus, id.to_string())
                        .insert(to_doc(&status)?),
                    TxnOp::new(Collection::MigrationTarget, id.to_string())
                        .insert(to_doc(&target)?),
                ];
                Ok((ops, (record, status)))
            })
            .await;

        match result {
            Ok((record, status)) => {
                info!(
                    self.log,
                    "created migration";
                    "migration_id" => %record.id,
                    "model_uuid" => %model_id,
                    "initiated_by" => %record.initiated_by,
                    "phase" => %status.phase,
                );
                Ok((record, status))
            }
            Err(error) => {
                warn!(
                    self.log,
                    "failed to create migration";
                    "model_uuid" => %model_id,
                    InlineErrorChain::new(&error),
                );
                // Refusals already carry the message the caller sees.
                match error {
                    Error::Conflict { .. } => Err(error),
                    error => Err(error.internal_context(CREATE_FAILED)),
                }
            }
        }
    }

    /// Fetches a migration by its id
    ///
    /// An id that cannot be parsed is reported as not found.
    pub async fn migration_fetch(
        &self,
        id: &str,
    ) -> LookupResult<(MigrationRecord, MigrationStatusRecord)> {
        let not_found = || {
            Error::not_found_by_composite_id(ResourceType::Migration, id)
        };
        let id: MigrationId = id.parse().map_err(|_| not_found())?;
        let record = self
            .doc::<MigrationRecord>(Collection::Migrations, &id.to_string())?
            .ok_or_else(not_found)?;
        let status = self.migration_status_sync(id)?;
        Ok((record, status))
    }

    /// Fetches the most recently created migration of `model_id`
    pub async fn migration_latest(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<(MigrationRecord, MigrationStatusRecord)> {
        let not_found = || {
            LookupType::LatestFor(model_id.into_untyped_uuid())
                .into_not_found(ResourceType::Migration)
        };
        let next = self.sequence_peek(model_id).await?;
        let attempt = next.checked_sub(1).ok_or_else(not_found)?;
        let id = MigrationId::new(model_id, attempt);
        let record = self
            .doc::<MigrationRecord>(Collection::Migrations, &id.to_string())?
            .ok_or_else(not_found)?;
        bail_unless!(
            record.attempt == attempt,
            "migration {} records attempt {}",
            id,
            record.attempt
        );
        let status = self.migration_status_sync(id)?;
        Ok((record, status))
    }

    /// Returns true if `model_id` has a migration in a non-terminal phase
    pub async fn migration_is_active(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<bool> {
        Ok(!self.model_active_migration(model_id).is_null())
    }

    /// Re-reads the mutable part of a migration
    pub async fn migration_refresh(
        &self,
        id: MigrationId,
    ) -> LookupResult<MigrationStatusRecord> {
        self.migration_status_sync(id)
    }

    pub async fn migration_target_info(
        &self,
        id: MigrationId,
    ) -> LookupResult<TargetInfo> {
        let record = self
            .doc::<MigrationTargetRecord>(
                Collection::MigrationTarget,
                &id.to_string(),
            )?
            .ok_or_else(|| {
                Error::not_found_by_composite_id(
                    ResourceType::MigrationTarget,
                    &id.to_string(),
                )
            })?;
        Ok(record.target)
    }

    /// Moves a migration from phase `status.phase` to `next`
    ///
    /// `status` is the caller's view of the migration.  If another writer has
    /// changed the phase since it was read, this fails with
    /// [`Error::PhaseAlreadyChanged`] and writes nothing; the caller must
    /// refresh before trying again.
    ///
    /// Entering a terminal phase also releases the model: its active
    /// migration marker is cleared and its mode is set to the configured
    /// success mode, or restored to its pre-migration mode if the migration
    /// aborted.
    pub async fn migration_set_phase(
        &self,
        status: &MigrationStatusRecord,
        next: MigrationPhase,
    ) -> UpdateResult<MigrationStatusRecord> {
        let id = status.id;
        let current = status.phase;
        if !current.can_transition_to(next) {
            return Err(Error::IllegalPhaseTransition {
                from: current.label().to_string(),
                to: next.label().to_string(),
            });
        }

        let now = Utc::now();
        let mut updated = status.clone();
        updated.phase = next;
        updated.phase_changed_time = now;
        // Only the first arrival at success and at a terminal phase count.
        if current.is_running()
            && next.has_succeeded()
            && updated.success_time.is_none()
        {
            updated.success_time = Some(now);
        }
        if next.is_terminal() && updated.end_time.is_none() {
            updated.end_time = Some(now);
        }

        let mut status_op =
            TxnOp::new(Collection::MigrationStatus, id.to_string())
                .assert(Assert::FieldEq(
                    MigrationStatusRecord::FIELD_PHASE,
                    to_doc(&current)?,
                ))
                .set(MigrationStatusRecord::FIELD_PHASE, to_doc(&next)?)
                .set(
                    MigrationStatusRecord::FIELD_PHASE_CHANGED_TIME,
                    to_doc(&now)?,
                );
        if updated.success_time != status.success_time {
            status_op = status_op.set(
                MigrationStatusRecord::FIELD_SUCCESS_TIME,
                to_doc(&updated.success_time)?,
            );
        }
        if updated.end_time != status.end_time {
            status_op = status_op.set(
                MigrationStatusRecord::FIELD_END_TIME,
                to_doc(&updated.end_time)?,
            );
        }
        let mut ops = vec![status_op];

        let model_id = status.model_id;
        let marker = Assert::FieldEq(
            ModelRecord::FIELD_ACTIVE_MIGRATION,
            to_doc(&id)?,
        );
        if next.is_terminal() {
            let record = self
                .doc::<MigrationRecord>(Collection::Migrations, &id.to_string())?
                .ok_or_else(|| {
                    Error::not_found_by_composite_id(
                        ResourceType::Migration,
                        &id.to_string(),
                    )
                })?;
            let mode = if next.has_succeeded() {
                self.policy.success_mode
            } else {
                record.prior_mode
            };
            ops.push(
                TxnOp::new(Collection::Models, model_id.to_string())
                    .assert(marker)
                    .set(
                        ModelRecord::FIELD_ACTIVE_MIGRATION,
                        serde_json::Value::Null,
                    )
                    .set(ModelRecord::FIELD_MIGRATION_MODE, to_doc(&mode)?),
            );
        } else {
            let model = self.model_fetch_sync(model_id)?;
            if model.migration_mode != MigrationMode::Exporting {
                ops.push(
                    TxnOp::new(Collection::Models, model_id.to_string())
                        .assert(marker)
                        .set(
                            ModelRecord::FIELD_MIGRATION_MODE,
                            to_doc(&MigrationMode::Exporting)?,
                        ),
                );
            }
        }

        match self.run_transaction(ops).await {
            Ok(()) => {
                info!(
                    self.log,
                    "migration phase changed";
                    "migration_id" => %id,
                    "model_uuid" => %model_id,
                    "phase" => %next,
                    "previous_phase" => %current,
                );
                Ok(updated)
            }
            Err(TxnError::Internal(error)) => Err(error),
            Err(aborted @ TxnError::Aborted { .. }) => {
                let stored = self.migration_status_sync(id)?;
                if stored.phase != current {
                    warn!(
                        self.log,
                        "migration phase already changed";
                        "migration_id" => %id,
                        "model_uuid" => %model_id,
                        "phase" => %stored.phase,
                        "requested_phase" => %next,
                    );
                    return Err(Error::PhaseAlreadyChanged {
                        migration_id: id.to_string(),
                    });
                }
                Err(Error::internal_error(&format!(
                    "failed to set phase of migration {}: {}",
                    id,
                    InlineErrorChain::new(&aborted),
                )))
            }
        }
    }

    pub async fn migration_set_status_message(
        &self,
        id: MigrationId,
        message: &str,
    ) -> UpdateResult<()> {
        let op = TxnOp::new(Collection::MigrationStatus, id.to_string())
            .assert(Assert::DocExists)
            .set(
                MigrationStatusRecord::FIELD_STATUS_MESSAGE,
                to_doc(&message)?,
            );
        match self.run_transaction(vec![op]).await {
            Ok(()) => Ok(()),
            Err(TxnError::Aborted { .. }) => Err(
                Error::not_found_by_composite_id(
                    ResourceType::Migration,
                    &id.to_string(),
                ),
            ),
            Err(TxnError::Internal(error)) => Err(error),
        }
    }

    pub(crate) fn migration_status_sync(
        &self,
        id: MigrationId,
    ) -> LookupResult<MigrationStatusRecord> {
        self.doc::<MigrationStatusRecord>(
            Collection::MigrationStatus,
            &id.to_string(),
        )?
        .ok_or_else(|| {
            Error::not_found_by_composite_id(
                ResourceType::Migration,
                &id.to_string(),
            )
        })
    }
}
