// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Thin binding layer: a device name, its outlets, its power-state map, and
//! the [`Transport`] used to reach it.

use std::collections::HashMap;

use crate::{
    error::GatewayError,
    transport::{SnmpOutcome, Transport},
};

pub struct Device {
    pub name: String,
    /// Ordered outlet names; the first is the healthcheck probe.
    pub outlets: Vec<String>,
    pub power_states: HashMap<String, i64>,
    transport: Box<dyn Transport>,
}

impl Device {
    pub fn new(
        name: String,
        outlets: Vec<String>,
        power_states: HashMap<String, i64>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Device {
            name,
            outlets,
            power_states,
            transport,
        }
    }

    /// The outlet probed by the periodic healthcheck job.
    pub fn healthcheck_outlet(&self) -> Option<&str> {
        self.outlets.first().map(String::as_str)
    }

    pub async fn get(&self, outlet: &str) -> SnmpOutcome {
        self.transport.outlet_state_get(outlet).await
    }

    /// Looks `verb` up in `power_states`; forwards the mapped wire value to
    /// the transport, or fails with `UnknownPowerState` without ever
    /// touching the network. Cycle synthesis (`cy` absent from
    /// `power_states`) is decided upstream, not here.
    pub async fn set(&self, outlet: &str, verb: &str) -> Result<SnmpOutcome, GatewayError> {
        let value = self.power_states.get(verb).copied().ok_or_else(|| {
            GatewayError::UnknownPowerState {
                device: self.name.clone(),
                verb: verb.to_string(),
            }
        })?;
        Ok(self.transport.outlet_state_set(outlet, value).await)
    }
}
