// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Names for the entities that take part in a migration
//!
//! Users and agents are identified by string tags (`user-admin`,
//! `machine-42`, `unit-mysql-0`).  Migrations are identified by the owning
//! model and the attempt number, rendered as `MODEL_UUID:ATTEMPT`.

use migration_common::api::external::Error;
use migration_common::typed_uuid::ModelUuid;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const USER_TAG_PREFIX: &str = "user-";
const MACHINE_TAG_PREFIX: &str = "machine-";
const UNIT_TAG_PREFIX: &str = "unit-";

/// Identifies a user, e.g. the one who initiated a migration
///
/// A `UserTag` can hold any name so that input can be carried around before
/// it is validated; [`UserTag::is_valid`] reports whether the name is one
/// the controller would accept.
#[derive(
    Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct UserTag(String);

impl UserTag {
    pub fn new<S: Into<String>>(name: S) -> UserTag {
        UserTag(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// User names start and end with an alphanumeric character and may
    /// contain `.`, `+` and `-` in between.
    pub fn is_valid(&self) -> bool {
        let name = self.0.as_str();
        let Some(first) = name.chars().next() else {
            return false;
        };
        let last = name.chars().last().unwrap_or(first);
        first.is_ascii_alphanumeric()
            && last.is_ascii_alphanumeric()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
    }
}

impl fmt::Display for UserTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", USER_TAG_PREFIX, self.0)
    }
}

impl FromStr for UserTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s
            .strip_prefix(USER_TAG_PREFIX)
            .map(UserTag::new)
            .filter(UserTag::is_valid)
            .ok_or_else(|| {
                Error::invalid_value("user tag", &format!("{:?} is not a valid user tag", s))
            })?;
        Ok(tag)
    }
}

/// Identifies a minion: an agent that acknowledges migration phases
#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum AgentTag {
    /// A machine agent, identified by machine id (e.g. "42")
    Machine(String),
    /// A unit agent, identified by unit name (e.g. "mysql/0")
    Unit(String),
}

impl AgentTag {
    pub fn machine<S: Into<String>>(id: S) -> AgentTag {
        AgentTag::Machine(id.into())
    }

    pub fn unit<S: Into<String>>(name: S) -> AgentTag {
        AgentTag::Unit(name.into())
    }

    /// Returns true if the tag reads back as itself from its string form
    ///
    /// Tags are stored in that form, so only valid tags can be recorded.
    /// Unit names need an application and a number ("mysql/0"), and names
    /// that differ only in where the `/` falls are not distinguishable.
    pub fn is_valid(&self) -> bool {
        self.to_string().parse::<AgentTag>().as_ref() == Ok(self)
    }
}

impl fmt::Display for AgentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentTag::Machine(id) => write!(f, "{}{}", MACHINE_TAG_PREFIX, id),
            AgentTag::Unit(name) => {
                write!(f, "{}{}", UNIT_TAG_PREFIX, name.replace('/', "-"))
            }
        }
    }
}

impl FromStr for AgentTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad_tag = || {
            Error::invalid_value("agent tag", &format!("{:?} is not a valid agent tag", s))
        };
        if let Some(id) = s.strip_prefix(MACHINE_TAG_PREFIX) {
            if id.is_empty() {
                return Err(bad_tag());
            }
            return Ok(AgentTag::Machine(id.to_string()));
        }
        if let Some(rest) = s.strip_prefix(UNIT_TAG_PREFIX) {
            // The unit number follows the last hyphen: "unit-my-app-3" is
            // unit "my-app/3".
            let (app, number) = rest.rsplit_once('-').ok_or_else(bad_tag)?;
            if app.is_empty() || number.parse::<u32>().is_err() {
                return Err(bad_tag());
            }
            return Ok(AgentTag::Unit(format!("{}/{}", app, number)));
        }
        Err(bad_tag())
    }
}

impl From<AgentTag> for String {
    fn from(tag: AgentTag) -> String {
        tag.to_string()
    }
}

impl TryFrom<String> for AgentTag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identifies one migration attempt for one model
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    model_id: ModelUuid,
    attempt: u32,
}

impl MigrationId {
    pub fn new(model_id: ModelUuid, attempt: u32) -> MigrationId {
        MigrationId { model_id, attempt }
    }

    pub fn model_id(&self) -> ModelUuid {
        self.model_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_id, self.attempt)
    }
}

impl FromStr for MigrationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad_id = || {
            Error::invalid_value(
                "migration id",
                &format!("{:?} is not of the form MODEL_UUID:ATTEMPT", s),
            )
        };
        let (model, attempt) = s.split_once(':').ok_or_else(bad_id)?;
        let model_id = model.parse::<ModelUuid>().map_err(|_| bad_id())?;
        let attempt = attempt.parse::<u32>().map_err(|_| bad_id())?;
        Ok(MigrationId { model_id, attempt })
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> String {
        id.to_string()
    }
}

impl TryFrom<String> for MigrationId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
