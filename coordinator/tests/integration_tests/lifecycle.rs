// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creating migrations and walking them through their phases

use crate::common::{target_spec, ControllerTestContext};
use assert_matches::assert_matches;
use camino_tempfile::Utf8TempDir;
use chrono::Utc;
use migration_common::api::external::Error;
use migration_common::api::external::LookupType;
use migration_common::typed_uuid::ModelUuid;
use model_migration::config::{Config, MigrationPolicy};
use model_migration::db::model::MigrationMode;
use model_migration::names::UserTag;
use model_migration::phase::MigrationPhase;
use model_migration::spec::Credential;
use model_migration::topology::StaticTopology;
use model_migration::Coordinator;
use std::sync::Arc;

#[tokio::test]
async fn test_create_migration() {
    let cptestctx = ControllerTestContext::new("test_create_migration").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;
    let spec = target_spec();

    let before = Utc::now();
    let migration = coordinator
        .create_migration(model_id, &spec)
        .await
        .expect("migration must be created");
    let after = Utc::now();

    assert_eq!(migration.model_id(), model_id);
    assert_eq!(migration.attempt(), 0);
    assert_eq!(migration.id().to_string(), format!("{}:0", model_id));
    assert_eq!(migration.phase(), MigrationPhase::Quiesce);
    assert_eq!(migration.status_message(), "starting");
    assert_eq!(migration.initiated_by(), &UserTag::new("admin"));
    assert!(migration.start_time() >= before && migration.start_time() <= after);
    assert_eq!(migration.phase_changed_time(), migration.start_time());
    assert_eq!(migration.success_time(), None);
    assert_eq!(migration.end_time(), None);
    assert_eq!(migration.target_info().await.unwrap(), spec.target_info);

    let datastore = coordinator.datastore();
    assert_eq!(
        datastore.model_migration_mode(model_id).await.unwrap(),
        MigrationMode::Exporting
    );
    assert!(coordinator.is_migration_active(model_id).await.unwrap());

    cptestctx.teardown();
}

#[tokio::test]
async fn test_create_migration_invalid_spec() {
    let cptestctx =
        ControllerTestContext::new("test_create_migration_invalid_spec").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut spec = target_spec();
    spec.initiated_by = UserTag::default();
    let error =
        coordinator.create_migration(model_id, &spec).await.unwrap_err();
    assert_matches!(error, Error::InvalidValue { ref label, .. } if label == "InitiatedBy");
    assert!(error.to_string().contains("InitiatedBy not valid"));

    let mut spec = target_spec();
    spec.target_info.credential = Credential::Password(String::new());
    let error =
        coordinator.create_migration(model_id, &spec).await.unwrap_err();
    assert!(error.to_string().contains("empty Password not valid"));

    // Failed attempts don't consume attempt numbers.
    assert!(!coordinator.is_migration_active(model_id).await.unwrap());
    let migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    assert_eq!(migration.attempt(), 0);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_create_migration_refusals() {
    let cptestctx =
        ControllerTestContext::new("test_create_migration_refusals").await;
    let coordinator = &cptestctx.coordinator;
    let datastore = coordinator.datastore();

    let controller_model = cptestctx.create_model("controller", true).await;
    let error = coordinator
        .create_migration(controller_model.id, &target_spec())
        .await
        .unwrap_err();
    assert_matches!(error, Error::Conflict { .. });
    assert_eq!(error.to_string(), "controllers can't be migrated");

    let mut spec = target_spec();
    spec.target_info.controller = cptestctx.controller_id;
    let error = coordinator
        .create_migration(cptestctx.model.id, &spec)
        .await
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "model already attached to target controller"
    );

    let dying = cptestctx.create_model("dying", false).await;
    datastore.model_destroy(dying.id).await.unwrap();
    let error = coordinator
        .create_migration(dying.id, &target_spec())
        .await
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "failed to create migration: model is not alive"
    );

    let missing = ModelUuid::new_v4();
    assert_matches!(
        coordinator.create_migration(missing, &target_spec()).await,
        Err(Error::ObjectNotFound { .. })
    );

    // None of the refusals consumed an attempt.
    for model in [&controller_model, &cptestctx.model, &dying] {
        assert_eq!(datastore.sequence_peek(model.id).await.unwrap(), 0);
    }

    cptestctx.teardown();
}

#[tokio::test]
async fn test_create_migration_while_active() {
    let cptestctx =
        ControllerTestContext::new("test_create_migration_while_active").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut first =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    let error = coordinator
        .create_migration(model_id, &target_spec())
        .await
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "failed to create migration: already in progress"
    );
    assert!(!error.retryable());

    first.set_phase(MigrationPhase::Abort).await.unwrap();
    first.set_phase(MigrationPhase::AbortDone).await.unwrap();

    let second =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    assert_eq!(second.attempt(), 1);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_create_migration_race() {
    let cptestctx =
        ControllerTestContext::new("test_create_migration_race").await;
    let coordinator = &cptestctx.coordinator;
    let datastore = coordinator.datastore();
    let model_id = cptestctx.model.id;

    // Another creator commits between our checks and our commit.
    let racer = Arc::clone(datastore);
    let racer_spec = target_spec();
    datastore.set_before_hook(move || async move {
        racer
            .migration_create(model_id, &racer_spec)
            .await
            .expect("racing creation must succeed");
    });

    let error = coordinator
        .create_migration(model_id, &target_spec())
        .await
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "failed to create migration: already in progress"
    );
    assert!(datastore.before_hooks_done());

    // Only the winner consumed an attempt.
    let mut winner = coordinator.latest_migration(model_id).await.unwrap();
    assert_eq!(winner.attempt(), 0);
    winner.set_phase(MigrationPhase::Abort).await.unwrap();
    winner.set_phase(MigrationPhase::AbortDone).await.unwrap();
    let next =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    assert_eq!(next.attempt(), 1);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_coordinators_share_store() {
    let cptestctx =
        ControllerTestContext::new("test_coordinators_share_store").await;
    let coordinator = &cptestctx.coordinator;
    let peer = cptestctx.peer();
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    assert!(peer.is_migration_active(model_id).await.unwrap());
    let error =
        peer.create_migration(model_id, &target_spec()).await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "failed to create migration: already in progress"
    );

    let mut seen_by_peer = peer.latest_migration(model_id).await.unwrap();
    assert_eq!(seen_by_peer.id(), migration.id());
    seen_by_peer.set_phase(MigrationPhase::ReadOnly).await.unwrap();
    assert_matches!(
        migration.set_phase(MigrationPhase::ReadOnly).await,
        Err(Error::PhaseAlreadyChanged { .. })
    );

    cptestctx.teardown();
}

#[tokio::test]
async fn test_models_do_not_contend() {
    // With a single attempt, any abort would fail the create.
    let policy =
        MigrationPolicy { txn_max_attempts: 1, ..MigrationPolicy::default() };
    let cptestctx =
        ControllerTestContext::with_policy("test_models_do_not_contend", policy)
            .await;
    let coordinator = &cptestctx.coordinator;
    let datastore = coordinator.datastore();
    let model_id = cptestctx.model.id;
    let other = cptestctx.create_model("other", false).await;

    // A migration of another model commits between our checks and our
    // commit, and another model's phase changes right after.
    let racer = Arc::clone(datastore);
    let other_id = other.id;
    datastore.set_before_hook(move || async move {
        racer
            .migration_create(other_id, &target_spec())
            .await
            .expect("creating the other migration must succeed");
    });
    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    assert!(datastore.before_hooks_done());

    let racer = Arc::clone(datastore);
    datastore.set_before_hook(move || async move {
        let (_, status) = racer.migration_latest(other_id).await.unwrap();
        racer
            .migration_set_phase(&status, MigrationPhase::ReadOnly)
            .await
            .expect("other model's phase change must succeed");
    });
    migration.set_phase(MigrationPhase::ReadOnly).await.unwrap();
    assert!(datastore.before_hooks_done());

    for id in [model_id, other_id] {
        let latest = coordinator.latest_migration(id).await.unwrap();
        assert_eq!(latest.attempt(), 0);
        assert_eq!(latest.phase(), MigrationPhase::ReadOnly);
    }

    cptestctx.teardown();
}

#[tokio::test]
async fn test_multiple_attempts() {
    let cptestctx = ControllerTestContext::new("test_multiple_attempts").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    for expected_attempt in 0..3 {
        let mut migration = coordinator
            .create_migration(model_id, &target_spec())
            .await
            .unwrap();
        assert_eq!(migration.attempt(), expected_attempt);

        let latest = coordinator.latest_migration(model_id).await.unwrap();
        assert_eq!(latest.id(), migration.id());

        migration.set_phase(MigrationPhase::Abort).await.unwrap();
        migration.set_phase(MigrationPhase::AbortDone).await.unwrap();
    }

    // Earlier attempts remain available.
    let first = coordinator
        .migration(&format!("{}:0", model_id))
        .await
        .unwrap();
    assert_eq!(first.phase(), MigrationPhase::AbortDone);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_lookup_missing_migrations() {
    let cptestctx =
        ControllerTestContext::new("test_lookup_missing_migrations").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let error = coordinator.latest_migration(model_id).await.unwrap_err();
    assert_matches!(
        error,
        Error::ObjectNotFound { lookup_type: LookupType::LatestFor(_), .. }
    );
    assert!(error.to_string().starts_with("migration not found"));

    let error = coordinator.migration("does not exist").await.unwrap_err();
    assert!(error.to_string().starts_with("migration not found"));
    let error = coordinator
        .migration(&format!("{}:0", model_id))
        .await
        .unwrap_err();
    assert!(error.is_not_found());

    assert!(!coordinator.is_migration_active(model_id).await.unwrap());

    cptestctx.teardown();
}

#[tokio::test]
async fn test_refresh() {
    let cptestctx = ControllerTestContext::new("test_refresh").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut writer =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    let mut reader = coordinator.latest_migration(model_id).await.unwrap();

    writer.set_phase(MigrationPhase::ReadOnly).await.unwrap();
    writer.set_status_message("waiting for agents").await.unwrap();
    assert_eq!(reader.phase(), MigrationPhase::Quiesce);
    assert_eq!(reader.status_message(), "starting");

    reader.refresh().await.unwrap();
    assert_eq!(reader.id(), writer.id());
    assert_eq!(reader.phase(), MigrationPhase::ReadOnly);
    assert_eq!(reader.status_message(), "waiting for agents");
    assert_eq!(reader.phase_changed_time(), writer.phase_changed_time());

    cptestctx.teardown();
}

#[tokio::test]
async fn test_successful_phase_transitions() {
    let cptestctx =
        ControllerTestContext::new("test_successful_phase_transitions").await;
    let coordinator = &cptestctx.coordinator;
    let datastore = coordinator.datastore();
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();

    let phases = [
        MigrationPhase::ReadOnly,
        MigrationPhase::Precheck,
        MigrationPhase::Import,
        MigrationPhase::Validation,
        MigrationPhase::Success,
        MigrationPhase::LogTransfer,
        MigrationPhase::Reap,
        MigrationPhase::Done,
    ];
    let mut success_time = None;
    for phase in phases {
        let previous_change = migration.phase_changed_time();
        migration.set_phase(phase).await.unwrap();
        assert_eq!(migration.phase(), phase);
        assert!(migration.phase_changed_time() >= previous_change);

        if phase == MigrationPhase::Success {
            success_time = migration.success_time();
            assert!(success_time.is_some());
            assert_eq!(success_time, Some(migration.phase_changed_time()));
        }
        // SuccessTime is written once and never moves afterwards.
        assert_eq!(migration.success_time(), success_time);

        if phase.is_terminal() {
            assert_eq!(
                migration.end_time(),
                Some(migration.phase_changed_time())
            );
        } else {
            assert_eq!(migration.end_time(), None);
            assert!(coordinator.is_migration_active(model_id).await.unwrap());
            assert_eq!(
                datastore.model_migration_mode(model_id).await.unwrap(),
                MigrationMode::Exporting
            );
        }

        // What the handle saw is what was stored.
        let stored = coordinator
            .migration(&migration.id().to_string())
            .await
            .unwrap();
        assert_eq!(stored.phase(), migration.phase());
        assert_eq!(stored.success_time(), migration.success_time());
        assert_eq!(stored.end_time(), migration.end_time());
    }

    assert!(!coordinator.is_migration_active(model_id).await.unwrap());
    assert_eq!(
        datastore.model_migration_mode(model_id).await.unwrap(),
        MigrationMode::None
    );

    cptestctx.teardown();
}

#[tokio::test]
async fn test_success_mode_is_configurable() {
    let policy = MigrationPolicy {
        success_mode: MigrationMode::Active,
        ..MigrationPolicy::default()
    };
    let cptestctx = ControllerTestContext::with_policy(
        "test_success_mode_is_configurable",
        policy,
    )
    .await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    for phase in [
        MigrationPhase::ReadOnly,
        MigrationPhase::Precheck,
        MigrationPhase::Import,
        MigrationPhase::Validation,
        MigrationPhase::Success,
        MigrationPhase::LogTransfer,
        MigrationPhase::Reap,
        MigrationPhase::Done,
    ] {
        migration.set_phase(phase).await.unwrap();
    }
    assert_eq!(
        coordinator.datastore().model_migration_mode(model_id).await.unwrap(),
        MigrationMode::Active
    );

    cptestctx.teardown();
}

#[tokio::test]
async fn test_abort_restores_prior_mode() {
    let cptestctx =
        ControllerTestContext::new("test_abort_restores_prior_mode").await;
    let coordinator = &cptestctx.coordinator;
    let datastore = coordinator.datastore();
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    migration.set_phase(MigrationPhase::ReadOnly).await.unwrap();
    migration.set_phase(MigrationPhase::Abort).await.unwrap();
    assert!(coordinator.is_migration_active(model_id).await.unwrap());
    assert_eq!(migration.end_time(), None);

    migration.set_phase(MigrationPhase::AbortDone).await.unwrap();
    assert!(!coordinator.is_migration_active(model_id).await.unwrap());
    assert_eq!(migration.success_time(), None);
    assert!(migration.end_time().is_some());
    assert_eq!(
        datastore.model_migration_mode(model_id).await.unwrap(),
        MigrationMode::Active
    );

    // A model that was importing before the migration goes back to
    // importing.
    let importing = cptestctx.create_model("importing", false).await;
    datastore
        .model_set_migration_mode(importing.id, MigrationMode::Importing)
        .await
        .unwrap();
    let mut migration = coordinator
        .create_migration(importing.id, &target_spec())
        .await
        .unwrap();
    migration.set_phase(MigrationPhase::Abort).await.unwrap();
    migration.set_phase(MigrationPhase::AbortDone).await.unwrap();
    assert_eq!(
        datastore.model_migration_mode(importing.id).await.unwrap(),
        MigrationMode::Importing
    );

    cptestctx.teardown();
}

#[tokio::test]
async fn test_reap_failed() {
    let cptestctx = ControllerTestContext::new("test_reap_failed").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    for phase in [
        MigrationPhase::ReadOnly,
        MigrationPhase::Precheck,
        MigrationPhase::Import,
        MigrationPhase::Validation,
        MigrationPhase::Success,
        MigrationPhase::LogTransfer,
        MigrationPhase::Reap,
        MigrationPhase::ReapFailed,
    ] {
        migration.set_phase(phase).await.unwrap();
    }
    assert!(migration.success_time().is_some());
    assert!(migration.end_time().is_some());
    assert!(!coordinator.is_migration_active(model_id).await.unwrap());
    assert_eq!(
        coordinator.datastore().model_migration_mode(model_id).await.unwrap(),
        MigrationMode::None
    );

    cptestctx.teardown();
}

#[tokio::test]
async fn test_illegal_phase_change() {
    let cptestctx =
        ControllerTestContext::new("test_illegal_phase_change").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    let error = migration.set_phase(MigrationPhase::Success).await.unwrap_err();
    assert_eq!(error.to_string(), "illegal phase change: QUIESCE -> SUCCESS");
    assert_matches!(error, Error::IllegalPhaseTransition { .. });
    assert_eq!(migration.phase(), MigrationPhase::Quiesce);

    // Terminal phases are final.
    migration.set_phase(MigrationPhase::Abort).await.unwrap();
    migration.set_phase(MigrationPhase::AbortDone).await.unwrap();
    for phase in MigrationPhase::ALL {
        assert_matches!(
            migration.set_phase(phase).await,
            Err(Error::IllegalPhaseTransition { .. })
        );
    }

    cptestctx.teardown();
}

#[tokio::test]
async fn test_phase_change_race() {
    let cptestctx = ControllerTestContext::new("test_phase_change_race").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;

    let mut first =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    let mut second = coordinator.latest_migration(model_id).await.unwrap();

    first.set_phase(MigrationPhase::ReadOnly).await.unwrap();
    let error = second.set_phase(MigrationPhase::ReadOnly).await.unwrap_err();
    assert!(error.to_string().starts_with("phase already changed"));
    assert!(error.is_race());
    assert!(error.retryable());
    assert_eq!(second.phase(), MigrationPhase::Quiesce);

    // After refreshing, the loser can carry on from the new phase.
    second.refresh().await.unwrap();
    second.set_phase(MigrationPhase::Precheck).await.unwrap();
    first.refresh().await.unwrap();
    assert_eq!(first.phase(), MigrationPhase::Precheck);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_phase_change_race_with_hook() {
    let cptestctx =
        ControllerTestContext::new("test_phase_change_race_with_hook").await;
    let coordinator = &cptestctx.coordinator;
    let datastore = coordinator.datastore();
    let model_id = cptestctx.model.id;

    let mut migration =
        coordinator.create_migration(model_id, &target_spec()).await.unwrap();
    let racer = Arc::clone(datastore);
    let id = migration.id().to_string();
    datastore.set_before_hook(move || async move {
        let (_, status) = racer.migration_fetch(&id).await.unwrap();
        racer.migration_set_phase(&status, MigrationPhase::Abort).await.unwrap();
    });

    assert_matches!(
        migration.set_phase(MigrationPhase::ReadOnly).await,
        Err(Error::PhaseAlreadyChanged { .. })
    );
    migration.refresh().await.unwrap();
    assert_eq!(migration.phase(), MigrationPhase::Abort);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_status_snapshot() {
    let cptestctx = ControllerTestContext::new("test_status_snapshot").await;
    let coordinator = &cptestctx.coordinator;
    let model_id = cptestctx.model.id;
    let spec = target_spec();

    let mut migration =
        coordinator.create_migration(model_id, &spec).await.unwrap();
    migration.set_phase(MigrationPhase::ReadOnly).await.unwrap();
    let status = migration.status().await.unwrap();
    assert_eq!(status.migration_id, migration.id());
    assert_eq!(status.model_id, model_id);
    assert_eq!(status.attempt, 0);
    assert_eq!(status.phase, MigrationPhase::ReadOnly);
    assert_eq!(status.phase_changed_time, migration.phase_changed_time());
    assert_eq!(status.target_info, spec.target_info);

    cptestctx.teardown();
}

#[tokio::test]
async fn test_coordinator_from_config() {
    let dir = Utf8TempDir::new().unwrap();
    let log_path = dir.path().join("coordinator.log");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            [log]
            mode = "file"
            level = "debug"
            path = "{}"
            if_exists = "truncate"

            [migration]
            success_mode = "active"
            "#,
            log_path
        ),
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let coordinator =
        Coordinator::from_config(&config, Arc::new(StaticTopology::new()))
            .unwrap();
    assert_eq!(
        coordinator.datastore().policy().success_mode,
        MigrationMode::Active
    );
    assert!(log_path.exists());
}
