// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Documents stored by the [`super::DataStore`]
//!
//! Each struct here is the serialized form of one document.  The `FIELD_*`
//! constants name the fields that transactions assert on or update, and must
//! match the serde names of the corresponding struct fields.

use crate::names::MigrationId;
use crate::names::UserTag;
use crate::phase::MigrationPhase;
use crate::spec::TargetInfo;
use chrono::DateTime;
use chrono::Utc;
use migration_common::api::external::Error;
use migration_common::typed_uuid::ControllerUuid;
use migration_common::typed_uuid::ModelUuid;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A named set of documents
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Collection {
    Models,
    Sequence,
    Migrations,
    MigrationStatus,
    MigrationTarget,
    MinionReports,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Models => "models",
            Collection::Sequence => "sequence",
            Collection::Migrations => "migrations",
            Collection::MigrationStatus => "migrations.status",
            Collection::MigrationTarget => "migrations.target",
            Collection::MinionReports => "migrations.minionsync",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle of a model
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn label(&self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The externally visible migration state of a model
///
/// Agents consult this to decide whether the model may be changed: an
/// `Exporting` model is being copied to another controller and an
/// `Importing` one is being received.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    #[default]
    Active,
    Exporting,
    Importing,
    /// The model has been handed over and no longer runs here
    None,
}

impl MigrationMode {
    pub fn label(&self) -> &'static str {
        match self {
            MigrationMode::Active => "active",
            MigrationMode::Exporting => "exporting",
            MigrationMode::Importing => "importing",
            MigrationMode::None => "none",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for MigrationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MigrationMode::Active),
            "exporting" => Ok(MigrationMode::Exporting),
            "importing" => Ok(MigrationMode::Importing),
            "none" => Ok(MigrationMode::None),
            _ => Err(Error::invalid_value(
                "migration mode",
                &format!("unknown migration mode {:?}", s),
            )),
        }
    }
}

/// A model hosted by this controller (collection `models`, keyed by uuid)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ModelRecord {
    pub id: ModelUuid,
    pub name: String,
    pub controller_id: ControllerUuid,
    pub is_controller_model: bool,
    pub life: Life,
    pub migration_mode: MigrationMode,
    /// Set while a migration of this model is in a non-terminal phase
    #[serde(default)]
    pub active_migration: Option<MigrationId>,
}

impl ModelRecord {
    pub const FIELD_LIFE: &'static str = "life";
    pub const FIELD_MIGRATION_MODE: &'static str = "migration_mode";
    pub const FIELD_ACTIVE_MIGRATION: &'static str = "active_migration";
}

/// Per-model attempt counter (collection `sequence`)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SequenceRecord {
    /// The next value to hand out
    pub counter: u32,
}

impl SequenceRecord {
    pub const FIELD_COUNTER: &'static str = "counter";

    pub fn doc_id(model_id: ModelUuid) -> String {
        format!("{}:migration", model_id)
    }
}

/// The immutable part of a migration (collection `migrations`)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MigrationRecord {
    pub id: MigrationId,
    pub model_id: ModelUuid,
    pub attempt: u32,
    pub initiated_by: UserTag,
    /// Mode of the model when the migration was created, restored if the
    /// migration aborts
    pub prior_mode: MigrationMode,
}

/// The mutable part of a migration (collection `migrations.status`)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MigrationStatusRecord {
    pub id: MigrationId,
    pub model_id: ModelUuid,
    pub phase: MigrationPhase,
    pub phase_changed_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub success_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status_message: String,
}

impl MigrationStatusRecord {
    pub const FIELD_MODEL_ID: &'static str = "model_id";
    pub const FIELD_PHASE: &'static str = "phase";
    pub const FIELD_PHASE_CHANGED_TIME: &'static str = "phase_changed_time";
    pub const FIELD_SUCCESS_TIME: &'static str = "success_time";
    pub const FIELD_END_TIME: &'static str = "end_time";
    pub const FIELD_STATUS_MESSAGE: &'static str = "status_message";
}

/// Connection details for the target controller (collection
/// `migrations.target`)
///
/// Kept apart from [`MigrationRecord`] because it carries credentials.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MigrationTargetRecord {
    pub id: MigrationId,
    pub model_id: ModelUuid,
    pub target: TargetInfo,
}

/// One agent's acknowledgement of one phase (collection
/// `migrations.minionsync`)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MinionReportRecord {
    pub migration_id: MigrationId,
    pub phase: MigrationPhase,
    pub agent: crate::names::AgentTag,
    pub success: bool,
}

impl MinionReportRecord {
    pub const FIELD_MIGRATION_ID: &'static str = "migration_id";
    pub const FIELD_PHASE: &'static str = "phase";

    pub fn doc_id(&self) -> String {
        format!("{}:{}:{}", self.migration_id, self.phase, self.agent)
    }
}
