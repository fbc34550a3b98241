// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures and related facilities shared by the coordinator and its
//! consumers.  The contents here are all transport-agnostic.

mod error;
pub use error::*;

use anyhow::anyhow;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

// The type aliases below exist primarily to ensure consistency among return
// types for coordinator and datastore functions.

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a list operation that returns a vector
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;

/// Revision number of a stored document
///
/// Every write to a document advances its generation.  Writers that need to
/// detect concurrent modification record the generation they read and assert
/// it is unchanged when they write.
#[derive(
    Copy,
    Clone,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Generation(u64);

impl Generation {
    pub const fn new() -> Generation {
        Generation(1)
    }

    pub const fn next(&self) -> Generation {
        // It should technically be an operational error if this wraps or even
        // exceeds the value allowed by an i64.  But it seems unlikely enough to
        // happen in practice that we can probably feel safe with this.
        let next_gen = self.0 + 1;
        assert!(next_gen <= i64::MAX as u64, "generation overflow");
        Generation(next_gen)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation::new()
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(&self.0.to_string())
    }
}

impl From<Generation> for i64 {
    fn from(g: Generation) -> Self {
        // We have already validated that the value is within range.
        i64::try_from(g.0).expect("generation is within i64 range")
    }
}

impl TryFrom<i64> for Generation {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 1 {
            return Err(anyhow!("generation numbers start at 1"));
        }
        Ok(Generation(value as u64))
    }
}

/// Identifies a type of resource managed by the coordinator
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ResourceType {
    Model,
    Migration,
    MigrationTarget,
    MinionReport,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(
            f,
            "{}",
            match self {
                ResourceType::Model => "model",
                ResourceType::Migration => "migration",
                ResourceType::MigrationTarget => "migration target",
                ResourceType::MinionReport => "minion report",
            }
        )
    }
}
