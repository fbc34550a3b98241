// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests to start a migration

use crate::names::UserTag;
use migration_common::api::external::Error;
use migration_common::typed_uuid::ControllerUuid;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Everything needed to start migrating a model
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MigrationSpec {
    pub initiated_by: UserTag,
    pub target_info: TargetInfo,
}

impl MigrationSpec {
    /// Checks every field, returning an `InvalidValue` error naming the first
    /// one found to be missing or malformed
    pub fn validate(&self) -> Result<(), Error> {
        if !self.initiated_by.is_valid() {
            return Err(Error::invalid_value("InitiatedBy", "InitiatedBy not valid"));
        }
        self.target_info.validate()
    }
}

/// How to reach and authenticate with the controller a model is moving to
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TargetInfo {
    pub controller: ControllerUuid,
    pub addrs: Vec<String>,
    /// PEM-encoded CA certificate of the target controller
    pub ca_cert: String,
    pub auth_tag: UserTag,
    pub credential: Credential,
}

impl TargetInfo {
    pub fn validate(&self) -> Result<(), Error> {
        if self.controller.as_untyped_uuid().is_nil() {
            return Err(Error::invalid_value(
                "ControllerTag",
                "ControllerTag not valid",
            ));
        }
        if self.addrs.is_empty() {
            return Err(Error::invalid_value("Addrs", "empty Addrs not valid"));
        }
        for addr in &self.addrs {
            if !is_host_port(addr) {
                return Err(Error::invalid_value(
                    "Addrs",
                    &format!("{:?} not valid", addr),
                ));
            }
        }
        if self.ca_cert.is_empty() {
            return Err(Error::invalid_value("CACert", "empty CACert not valid"));
        }
        if !self.auth_tag.is_valid() {
            return Err(Error::invalid_value("AuthTag", "AuthTag not valid"));
        }
        self.credential.validate()
    }
}

/// Returns whether `addr` looks like `host:port`
///
/// IPv6 hosts must be bracketed (`[::1]:17070`).
fn is_host_port(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    if port.parse::<u16>().is_err() {
        return false;
    }
    match host.strip_prefix('[') {
        Some(bracketed) => bracketed
            .strip_suffix(']')
            .map(|ip| ip.parse::<std::net::Ipv6Addr>().is_ok())
            .unwrap_or(false),
        None => !host.is_empty() && !host.contains(':'),
    }
}

/// The secret used to log in to the target controller
#[derive(Clone, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Password(String),
    /// A macaroon or similar bearer token
    Token(String),
}

impl Credential {
    fn label(&self) -> &'static str {
        match self {
            Credential::Password(_) => "Password",
            Credential::Token(_) => "Token",
        }
    }

    fn secret(&self) -> &str {
        match self {
            Credential::Password(s) | Credential::Token(s) => s,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.secret().is_empty() {
            let label = self.label();
            return Err(Error::invalid_value(
                label,
                &format!("empty {} not valid", label),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(<redacted>)", self.label())
    }
}
