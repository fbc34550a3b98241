// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared setup for the integration tests

use migration_common::typed_uuid::ControllerUuid;
use migration_test_utils::dev::{
    component_log, test_setup_log, LogContext, LONG_WAIT, SHORT_WAIT,
};
use model_migration::config::MigrationPolicy;
use model_migration::db::model::ModelRecord;
use model_migration::db::ModelCreate;
use model_migration::names::UserTag;
use model_migration::spec::{Credential, MigrationSpec, TargetInfo};
use model_migration::topology::{MinionTopology, StaticTopology};
use model_migration::watcher::{NotifyWatcher, WatcherError};
use model_migration::Coordinator;
use std::sync::Arc;
use tokio::time::timeout;

pub struct ControllerTestContext {
    pub logctx: LogContext,
    pub coordinator: Coordinator,
    pub topology: Arc<StaticTopology>,
    pub controller_id: ControllerUuid,
    /// A hosted (non-controller) model, ready to be migrated
    pub model: ModelRecord,
}

impl ControllerTestContext {
    pub async fn new(test_name: &str) -> ControllerTestContext {
        ControllerTestContext::with_policy(test_name, MigrationPolicy::default())
            .await
    }

    pub async fn with_policy(
        test_name: &str,
        policy: MigrationPolicy,
    ) -> ControllerTestContext {
        let logctx = test_setup_log(test_name);
        let topology = Arc::new(StaticTopology::new());
        let coordinator = Coordinator::new(
            &logctx.log,
            policy,
            Arc::clone(&topology) as Arc<dyn MinionTopology>,
        );
        let controller_id = ControllerUuid::new_v4();
        let model =
            create_model(&coordinator, controller_id, "test-model", false)
                .await;
        ControllerTestContext {
            logctx,
            coordinator,
            topology,
            controller_id,
            model,
        }
    }

    pub async fn create_model(
        &self,
        name: &str,
        is_controller_model: bool,
    ) -> ModelRecord {
        create_model(
            &self.coordinator,
            self.controller_id,
            name,
            is_controller_model,
        )
        .await
    }

    /// Returns another coordinator over the same store, as a second
    /// controller process would have
    pub fn peer(&self) -> Coordinator {
        Coordinator::with_datastore(
            &component_log(&self.logctx, "peer"),
            Arc::clone(self.coordinator.datastore()),
            Arc::clone(&self.topology) as Arc<dyn MinionTopology>,
        )
    }

    pub fn teardown(self) {
        self.logctx.cleanup_successful();
    }
}

async fn create_model(
    coordinator: &Coordinator,
    controller_id: ControllerUuid,
    name: &str,
    is_controller_model: bool,
) -> ModelRecord {
    coordinator
        .datastore()
        .model_create(ModelCreate {
            name: name.to_string(),
            controller_id,
            is_controller_model,
        })
        .await
        .expect("model must be created")
}

/// A valid request to migrate to a new controller
pub fn target_spec() -> MigrationSpec {
    MigrationSpec {
        initiated_by: UserTag::new("admin"),
        target_info: TargetInfo {
            controller: ControllerUuid::new_v4(),
            addrs: vec![String::from("1.2.3.4:5555")],
            ca_cert: String::from("cert"),
            auth_tag: UserTag::new("user"),
            credential: Credential::Password(String::from("password")),
        },
    }
}

/// Asserts that the watcher delivers exactly one notification
pub async fn assert_one_change(watcher: &mut NotifyWatcher) {
    timeout(LONG_WAIT, watcher.changed())
        .await
        .expect("timed out waiting for watcher notification")
        .expect("watcher failed");
    assert_no_change(watcher).await;
}

/// Asserts that the watcher delivers nothing for a short while
pub async fn assert_no_change(watcher: &mut NotifyWatcher) {
    if let Ok(result) = timeout(SHORT_WAIT, watcher.changed()).await {
        panic!("unexpected watcher notification: {:?}", result);
    }
}

pub async fn assert_stopped(watcher: &mut NotifyWatcher) {
    assert_eq!(watcher.changed().await, Err(WatcherError::Stopped));
}
