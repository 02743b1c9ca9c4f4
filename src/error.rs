// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed error taxonomy shared across the gateway's components.

use thiserror::Error;

/// One variant per row of the error-handling taxonomy: parse failures never
/// take the process down, serial faults trigger reconnection, config errors
/// are fatal at startup.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("parse error at position {position}: {reason}")]
    Parse { position: usize, reason: String },

    #[error("unknown device {raw_id:?}")]
    UnknownDevice { raw_id: String },

    #[error("device {device:?} has no power state for verb {verb:?}")]
    UnknownPowerState { device: String, verb: String },

    #[error(
        "snmp protocol failure: engine_error={engine_error:?} pdu_status={pdu_status:?} \
         error_index={error_index:?}"
    )]
    SnmpProtocolFailure {
        engine_error: Option<String>,
        pdu_status: Option<i64>,
        error_index: Option<i64>,
    },

    #[error("snmp request timed out")]
    SnmpTimeout,

    #[error("exhausted {attempts} attempt(s) without success")]
    MaxAttemptsExhausted { attempts: u32 },

    #[error("serial I/O error: {0}")]
    SerialIo(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}
