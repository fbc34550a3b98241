// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entry points for starting, finding and watching migrations

use crate::config::Config;
use crate::config::MigrationPolicy;
use crate::db::DataStore;
use crate::migration::Migration;
use crate::spec::MigrationSpec;
use crate::topology::MinionTopology;
use crate::watcher::NotifyWatcher;
use migration_common::api::external::CreateResult;
use migration_common::api::external::LookupResult;
use migration_common::typed_uuid::ModelUuid;
use slog::{o, Logger};
use std::sync::Arc;

/// Coordinates migrations of the models hosted by one controller
pub struct Coordinator {
    log: Logger,
    datastore: Arc<DataStore>,
    topology: Arc<dyn MinionTopology>,
}

impl Coordinator {
    pub fn new(
        log: &Logger,
        policy: MigrationPolicy,
        topology: Arc<dyn MinionTopology>,
    ) -> Coordinator {
        let log = log.new(o!("component" => "migration-coordinator"));
        let datastore = Arc::new(DataStore::new(&log, policy));
        Coordinator { log, datastore, topology }
    }

    /// Builds a coordinator that logs through the logger described by
    /// `config`
    pub fn from_config(
        config: &Config,
        topology: Arc<dyn MinionTopology>,
    ) -> Result<Coordinator, String> {
        let log = config
            .log
            .to_logger("model-migration")
            .map_err(|message| format!("initializing logger: {}", message))?;
        let coordinator =
            Coordinator::new(&log, config.migration.clone(), topology);
        slog::info!(
            coordinator.log,
            "starting migration coordinator";
            "success_mode" => %config.migration.success_mode,
        );
        Ok(coordinator)
    }

    /// Builds a coordinator over an existing store
    pub fn with_datastore(
        log: &Logger,
        datastore: Arc<DataStore>,
        topology: Arc<dyn MinionTopology>,
    ) -> Coordinator {
        let log = log.new(o!("component" => "migration-coordinator"));
        Coordinator { log, datastore, topology }
    }

    pub fn datastore(&self) -> &Arc<DataStore> {
        &self.datastore
    }

    fn handle(
        &self,
        (record, status): (
            crate::db::model::MigrationRecord,
            crate::db::model::MigrationStatusRecord,
        ),
    ) -> Migration {
        Migration::new(
            &self.log,
            Arc::clone(&self.datastore),
            Arc::clone(&self.topology),
            record,
            status,
        )
    }

    /// Starts migrating `model_id` as described by `spec`
    pub async fn create_migration(
        &self,
        model_id: ModelUuid,
        spec: &MigrationSpec,
    ) -> CreateResult<Migration> {
        let created = self.datastore.migration_create(model_id, spec).await?;
        Ok(self.handle(created))
    }

    /// Looks up a migration by id (`MODEL_UUID:ATTEMPT`)
    pub async fn migration(&self, id: &str) -> LookupResult<Migration> {
        let found = self.datastore.migration_fetch(id).await?;
        Ok(self.handle(found))
    }

    /// Looks up the most recently created migration of `model_id`
    pub async fn latest_migration(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<Migration> {
        let found = self.datastore.migration_latest(model_id).await?;
        Ok(self.handle(found))
    }

    /// Returns true if `model_id` is being migrated
    pub async fn is_migration_active(
        &self,
        model_id: ModelUuid,
    ) -> LookupResult<bool> {
        self.datastore.migration_is_active(model_id).await
    }

    /// Notifies when a migration of `model_id` starts or finishes
    pub fn watch_for_model_migration(&self, model_id: ModelUuid) -> NotifyWatcher {
        self.datastore.watch_model_migration(model_id)
    }

    /// Notifies on every change to the status of `model_id`'s migrations
    pub fn watch_migration_status(&self, model_id: ModelUuid) -> NotifyWatcher {
        self.datastore.watch_migration_status(model_id)
    }
}
