// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on models

use super::DataStore;
use crate::db::model::{Collection, Life, MigrationMode, ModelRecord};
use crate::db::txn::{to_doc, Assert, TxnOp};
use migration_common::api::external::CreateResult;
use migration_common::api::external::Error;
use migration_common::api::external::LookupResult;
use migration_common::api::external::ResourceType;
use migration_common::api::external::UpdateResult;
use migration_common::typed_uuid::ControllerUuid;
use migration_common::typed_uuid::ModelUuid;
use serde_json::Value;
use slog::{debug, info};

/// Parameters for registering a model
#[derive(Clone, Debug)]
pub struct ModelCreate {
    pub name: String,
    pub controller_id: ControllerUuid,
    /// Whether this is the model that hosts the controller itself
    pub is_controller_model: bool,
}

impl DataStore {
    pub async fn model_create(
        &self,
        params: ModelCreate,
    ) -> CreateResult<ModelRecord> {
        let record = ModelRecord {
            id: ModelUuid::new_v4(),
            name: params.name,
            controller_id: params.controller_id,
            is_controller_model: params.is_controller_model,
            life: Life::Alive,
            migration_mode: MigrationMode::Active,
            active_migration: None,
        };
        let op = TxnOp::new(Collection::Models, record.id.to_string())
            .insert(to_doc(&record)?);
        self.run_transaction(vec![op]).await?;
        info!(
            self.log,
            "created model";
            "model_uuid" => %record.id,
            "name" => &record.name,
        );
        Ok(record)
    }

    pub async fn model_fetch(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<ModelRecord> {
        self.model_fetch_sync(model_id)
    }

    pub(crate) fn model_fetch_sync(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<ModelRecord> {
        self.doc::<ModelRecord>(Collection::Models, &model_id.to_string())?
            .ok_or_else(|| {
                Error::not_found_by_id(
                    ResourceType::Model,
                    model_id.as_untyped_uuid(),
                )
            })
    }

    pub async fn model_is_alive(&self, model_id: ModelUuid) -> LookupResult<bool> {
        Ok(self.model_fetch_sync(model_id)?.life == Life::Alive)
    }

    pub async fn model_controller(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<ControllerUuid> {
        Ok(self.model_fetch_sync(model_id)?.controller_id)
    }

    pub async fn model_migration_mode(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<MigrationMode> {
        Ok(self.model_fetch_sync(model_id)?.migration_mode)
    }

    pub async fn model_set_migration_mode(
        &self,
        model_id: ModelUuid,
        mode: MigrationMode,
    ) -> UpdateResult<()> {
        let mode_value = to_doc(&mode)?;
        self.transaction_with_retry("model_set_migration_mode", |_| {
            // Make sure the model exists so the caller sees a not-found error
            // instead of an aborted transaction.
            self.model_fetch_sync(model_id)?;
            let op = TxnOp::new(Collection::Models, model_id.to_string())
                .set(ModelRecord::FIELD_MIGRATION_MODE, mode_value.clone());
            Ok((vec![op], ()))
        })
        .await?;
        debug!(
            self.log,
            "set model migration mode";
            "model_uuid" => %model_id,
            "mode" => %mode,
        );
        Ok(())
    }

    /// Starts tearing down a model
    ///
    /// Fails while the model is being migrated.  Destroying a model that is
    /// already dying or dead does nothing.
    pub async fn model_destroy(&self, model_id: ModelUuid) -> UpdateResult<()> {
        let alive = to_doc(&Life::Alive)?;
        let dying = to_doc(&Life::Dying)?;
        self.transaction_with_retry("model_destroy", |_| {
            let model = self.model_fetch_sync(model_id)?;
            if model.life != Life::Alive {
                return Ok((vec![], ()));
            }
            if let Some(id) = model.active_migration {
                return Err(Error::conflict(&format!(
                    "model is being migrated (migration {})",
                    id
                )));
            }
            let op = TxnOp::new(Collection::Models, model_id.to_string())
                .assert(Assert::FieldEq(ModelRecord::FIELD_LIFE, alive.clone()))
                .assert(Assert::FieldUnset(ModelRecord::FIELD_ACTIVE_MIGRATION))
                .set(ModelRecord::FIELD_LIFE, dying.clone());
            Ok((vec![op], ()))
        })
        .await?;
        info!(self.log, "destroying model"; "model_uuid" => %model_id);
        Ok(())
    }

    /// Returns the active migration marker of a model
    ///
    /// A model that does not exist has no active migration.
    pub(crate) fn model_active_migration(
        &self,
        model_id: ModelUuid,
    ) -> Value {
        self.doc_raw(Collection::Models, &model_id.to_string())
            .and_then(|(_, doc)| {
                doc.get(ModelRecord::FIELD_ACTIVE_MIGRATION).cloned()
            })
            .unwrap_or(Value::Null)
    }
}
