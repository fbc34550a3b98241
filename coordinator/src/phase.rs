// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The migration phase state machine

use migration_common::api::external::Error;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A step in the migration of a model from one controller to another
///
/// `Quiesce` is the only initial phase.  `Done`, `AbortDone` and `ReapFailed`
/// are terminal: once a migration reaches one of them it never changes phase
/// again and the model is free to be migrated anew.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum MigrationPhase {
    Quiesce,
    #[serde(rename = "READONLY")]
    ReadOnly,
    Precheck,
    Import,
    Validation,
    Success,
    #[serde(rename = "LOGTRANSFER")]
    LogTransfer,
    Reap,
    #[serde(rename = "REAPFAILED")]
    ReapFailed,
    Done,
    Abort,
    #[serde(rename = "ABORTDONE")]
    AbortDone,
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 12] = [
        MigrationPhase::Quiesce,
        MigrationPhase::ReadOnly,
        MigrationPhase::Precheck,
        MigrationPhase::Import,
        MigrationPhase::Validation,
        MigrationPhase::Success,
        MigrationPhase::LogTransfer,
        MigrationPhase::Reap,
        MigrationPhase::ReapFailed,
        MigrationPhase::Done,
        MigrationPhase::Abort,
        MigrationPhase::AbortDone,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MigrationPhase::Quiesce => "QUIESCE",
            MigrationPhase::ReadOnly => "READONLY",
            MigrationPhase::Precheck => "PRECHECK",
            MigrationPhase::Import => "IMPORT",
            MigrationPhase::Validation => "VALIDATION",
            MigrationPhase::Success => "SUCCESS",
            MigrationPhase::LogTransfer => "LOGTRANSFER",
            MigrationPhase::Reap => "REAP",
            MigrationPhase::ReapFailed => "REAPFAILED",
            MigrationPhase::Done => "DONE",
            MigrationPhase::Abort => "ABORT",
            MigrationPhase::AbortDone => "ABORTDONE",
        }
    }

    /// Returns the phases that may directly follow this one
    pub fn next_phases(&self) -> &'static [MigrationPhase] {
        use MigrationPhase::*;
        match self {
            Quiesce => &[ReadOnly, Abort],
            ReadOnly => &[Precheck, Abort],
            Precheck => &[Import, Abort],
            Import => &[Validation, Abort],
            Validation => &[Success, Abort],
            Success => &[LogTransfer],
            LogTransfer => &[Reap],
            Reap => &[Done, ReapFailed],
            Abort => &[AbortDone],
            Done | AbortDone | ReapFailed => &[],
        }
    }

    pub fn can_transition_to(&self, next: MigrationPhase) -> bool {
        self.next_phases().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Done
                | MigrationPhase::AbortDone
                | MigrationPhase::ReapFailed
        )
    }

    /// Returns true for the phases before the point of no return: the model
    /// is still owned by the source controller and the migration may abort.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Quiesce
                | MigrationPhase::ReadOnly
                | MigrationPhase::Precheck
                | MigrationPhase::Import
                | MigrationPhase::Validation
        )
    }

    /// Returns true once the target controller has taken ownership of the
    /// model, including while the source is still being cleaned up.
    pub fn has_succeeded(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Success
                | MigrationPhase::LogTransfer
                | MigrationPhase::Reap
                | MigrationPhase::ReapFailed
                | MigrationPhase::Done
        )
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for MigrationPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MigrationPhase::ALL
            .iter()
            .find(|phase| phase.label() == s)
            .copied()
            .ok_or_else(|| {
                Error::invalid_value(
                    "phase",
                    &format!("unknown migration phase {:?}", s),
                )
            })
    }
}
