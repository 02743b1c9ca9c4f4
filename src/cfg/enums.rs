// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// SNMP message processing model for the v1/v2c transport variant.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageModel {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2c", alias = "v2")]
    V2c,
}

impl MessageModel {
    /// The `mpModel` field carried in the SNMP message header.
    pub fn mp_model(self) -> i64 {
        match self {
            MessageModel::V1 => 0,
            MessageModel::V2c => 1,
        }
    }
}

impl fmt::Display for MessageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageModel::V1 => "v1",
            MessageModel::V2c => "v2c",
        })
    }
}

/// SNMPv3 USM security level, gating which auth/priv fields survive masking.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    #[serde(rename = "noAuthNoPriv")]
    NoAuthNoPriv,
    #[serde(rename = "authNoPriv")]
    AuthNoPriv,
    #[serde(rename = "authPriv")]
    AuthPriv,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecurityLevel::NoAuthNoPriv => "noAuthNoPriv",
            SecurityLevel::AuthNoPriv => "authNoPriv",
            SecurityLevel::AuthPriv => "authPriv",
        })
    }
}

/// SNMPv3 USM authentication protocol.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    #[serde(rename = "MD5", alias = "md5")]
    Md5,
    #[serde(rename = "SHA", alias = "sha", alias = "SHA1", alias = "sha1")]
    Sha1,
}

/// SNMPv3 USM privacy protocol.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    #[serde(rename = "DES", alias = "des")]
    Des,
    #[serde(rename = "AES", alias = "aes", alias = "AES128", alias = "aes128")]
    Aes128,
}
