// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SNMP transport: a common `get`/`set` interface reduced from the v1/v2c
//! and v3 variants, which the factory builds once and never re-examines.

pub mod ber;
pub mod usm;
pub mod v1v2c;
pub mod v3;

use std::pin::Pin;

/// Opaque detail carried alongside every outcome for logging. `ok` is true
/// iff both `engine_error` and `pdu_status` are `None` — never infer success
/// from anything else.
#[derive(Debug, Clone, Default)]
pub struct SnmpOutcome {
    pub engine_error: Option<String>,
    pub pdu_status: Option<i64>,
    pub error_index: Option<i64>,
    pub var_binds: Vec<(String, String)>,
}

impl SnmpOutcome {
    pub fn ok(&self) -> bool {
        self.engine_error.is_none() && self.pdu_status.is_none()
    }

    pub fn success(var_binds: Vec<(String, String)>) -> Self {
        SnmpOutcome {
            var_binds,
            ..Default::default()
        }
    }

    pub fn engine_failure(message: impl Into<String>) -> Self {
        SnmpOutcome {
            engine_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn pdu_failure(status: i64, error_index: i64) -> Self {
        SnmpOutcome {
            pdu_status: Some(status),
            error_index: Some(error_index),
            ..Default::default()
        }
    }
}

/// A single logical SNMP engine handle held by a [`crate::device::Device`]
/// for the life of the process. Never retries internally — bounded retry is
/// the Retrying Request's job, one layer up.
///
/// The object-safe `Pin<Box<dyn Future>>` return shape mirrors this
/// codebase's state-machine trait, letting v1/v2c and v3 transports share a
/// single `Box<dyn Transport>` slot on `Device` without an extra crate.
pub trait Transport: Send + Sync {
    fn outlet_state_get<'a>(
        &'a self,
        outlet: &'a str,
    ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>>;

    fn outlet_state_set<'a>(
        &'a self,
        outlet: &'a str,
        value: i64,
    ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>>;
}
