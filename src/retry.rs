// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Retrying Request: wraps a single `Device` get/set invocation with bounded
//! retry, a per-attempt timeout, and an inter-attempt delay. Never retries
//! across a process boundary and never leaks a timed-out attempt into the
//! next one — each attempt gets its own `tokio::time::timeout` future.

use std::time::Duration;

use tracing::{info, warn};

use crate::{device::Device, transport::SnmpOutcome};

/// What a Retrying Request does for one command: probe an outlet (`get`) or
/// drive it to a named power state (`set`).
pub enum RetryKind<'a> {
    Get,
    Set { verb: &'a str },
}

/// Attempt counts and pacing shared by every SNMP request this gateway
/// issues, sourced from `snmp.retry` in the config document.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub inter_attempt_delay: Duration,
}

/// Runs `kind` against `device`/`outlet` under `policy`, logging exactly one
/// record per attempt outcome and one final record on success or exhaustion.
/// Returns `true` iff some attempt produced an `ok` outcome.
pub async fn run(
    device: &Device,
    outlet: &str,
    kind: RetryKind<'_>,
    policy: RetryPolicy,
    command_id: &str,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        let invocation = invoke(device, outlet, &kind);
        let outcome = tokio::time::timeout(policy.per_attempt_timeout, invocation).await;

        match outcome {
            Err(_) => {
                warn!(command_id, device = device.name, outlet, attempt, "snmp request timed out");
            },
            Ok(Ok(outcome)) if outcome.ok() => {
                info!(command_id, device = device.name, outlet, attempt, "snmp request succeeded");
                return true;
            },
            Ok(Ok(outcome)) => {
                warn!(
                    command_id,
                    device = device.name,
                    outlet,
                    attempt,
                    engine_error = outcome.engine_error.as_deref(),
                    pdu_status = outcome.pdu_status,
                    error_index = outcome.error_index,
                    "snmp request failed protocol check"
                );
            },
            Ok(Err(reason)) => {
                warn!(command_id, device = device.name, outlet, attempt, %reason, "snmp request rejected before dispatch");
            },
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.inter_attempt_delay).await;
        }
    }

    warn!(
        command_id,
        device = device.name,
        outlet,
        attempts = policy.max_attempts,
        "snmp request exhausted max attempts"
    );
    false
}

async fn invoke(device: &Device, outlet: &str, kind: &RetryKind<'_>) -> Result<SnmpOutcome, String> {
    match kind {
        RetryKind::Get => Ok(device.get(outlet).await),
        RetryKind::Set { verb } => device.set(outlet, verb).await.map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::transport::Transport;
    use std::pin::Pin;

    struct AlwaysFails;
    impl Transport for AlwaysFails {
        fn outlet_state_get<'a>(
            &'a self,
            _outlet: &'a str,
        ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
            Box::pin(async move { SnmpOutcome::engine_failure("no agent") })
        }

        fn outlet_state_set<'a>(
            &'a self,
            _outlet: &'a str,
            _value: i64,
        ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
            Box::pin(async move { SnmpOutcome::engine_failure("no agent") })
        }
    }

    struct AlwaysSucceeds;
    impl Transport for AlwaysSucceeds {
        fn outlet_state_get<'a>(
            &'a self,
            _outlet: &'a str,
        ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
            Box::pin(async move { SnmpOutcome::success(vec![]) })
        }

        fn outlet_state_set<'a>(
            &'a self,
            _outlet: &'a str,
            _value: i64,
        ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
            Box::pin(async move { SnmpOutcome::success(vec![]) })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_millis(50),
            inter_attempt_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_failure() {
        let device = Device::new(
            "pdu-1".into(),
            vec!["outlet-1".into()],
            HashMap::from([("on".to_string(), 1)]),
            Box::new(AlwaysFails),
        );
        assert!(!run(&device, "outlet-1", RetryKind::Get, policy(), "cmd-1").await);
    }

    #[tokio::test]
    async fn returns_true_on_first_success() {
        let device = Device::new(
            "pdu-1".into(),
            vec!["outlet-1".into()],
            HashMap::from([("on".to_string(), 1)]),
            Box::new(AlwaysSucceeds),
        );
        assert!(run(&device, "outlet-1", RetryKind::Get, policy(), "cmd-1").await);
    }
}
