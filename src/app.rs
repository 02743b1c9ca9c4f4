// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Application Shell: the process entry point's wiring. Loads config, inits
//! logging, builds devices, opens the serial supervisor, starts the
//! scheduler and dispatcher, and runs until an interrupt.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    cfg::config::{GatewayConfig, build_devices},
    device::Device,
    dispatcher::Dispatcher,
    liveness::Liveness,
    retry::{self, RetryKind, RetryPolicy},
    scheduler::Scheduler,
    supervisor::SerialSupervisor,
};

const HEALTHCHECK_JOB: &str = "healthcheck";
const LIVENESS_JOB: &str = "supervisor-notify";

pub struct App {
    config_path: String,
}

impl App {
    pub fn new(config_path: String) -> Self {
        App { config_path }
    }

    pub async fn run(self) -> Result<()> {
        let cfg = GatewayConfig::load_from_file(&self.config_path)
            .with_context(|| format!("failed to load gateway config from {}", self.config_path))?;

        let liveness = Liveness::from_env();
        liveness.status("Initiating application");

        let devices = build_devices(&cfg).context("failed to build devices from config")?;
        info!(count = devices.len(), "devices built from config");

        let dispatcher = Dispatcher::spawn();
        let scheduler = Scheduler::new();

        let retry_policy = RetryPolicy {
            max_attempts: cfg.snmp_retry.max_attempts,
            per_attempt_timeout: cfg.snmp_retry.timeout,
            inter_attempt_delay: cfg.snmp_retry.delay,
        };

        let supervisor = Arc::new(SerialSupervisor::new(
            cfg.serial.device.clone(),
            cfg.serial.timeout,
            devices.clone(),
            dispatcher.clone(),
            retry_policy,
            cfg.power_states.cy_delay,
            liveness.clone(),
            scheduler.clone(),
        ));

        let supervisor_task = tokio::spawn(Arc::clone(&supervisor).run());

        register_healthcheck_job(&scheduler, &dispatcher, &devices, retry_policy, cfg.healthcheck.frequency)
            .await;
        register_liveness_job(&scheduler, &liveness, liveness.watchdog_period()).await;

        liveness.ready();
        info!("gateway running, waiting for interrupt");

        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

        info!("interrupt received, shutting down");
        liveness.status("Shutting down application");
        scheduler.shutdown().await;
        supervisor_task.abort();

        Ok(())
    }
}

async fn register_healthcheck_job(
    scheduler: &Scheduler,
    dispatcher: &Dispatcher,
    devices: &HashMap<String, Arc<Device>>,
    retry_policy: RetryPolicy,
    frequency: std::time::Duration,
) {
    let dispatcher = dispatcher.clone();
    let devices: Vec<Arc<Device>> = devices.values().cloned().collect();

    scheduler
        .register(
            HEALTHCHECK_JOB,
            frequency,
            Box::new(move || {
                let dispatcher = dispatcher.clone();
                let devices = devices.clone();
                Box::pin(async move {
                    for device in devices {
                        let Some(outlet) = device.healthcheck_outlet().map(str::to_string) else {
                            continue;
                        };
                        let policy = retry_policy;
                        dispatcher.submit(true, async move {
                            let command_id = format!("{}/{}/healthcheck", device.name, outlet);
                            retry::run(&device, &outlet, RetryKind::Get, policy, &command_id).await;
                        });
                    }
                })
            }),
        )
        .await;
}

async fn register_liveness_job(scheduler: &Scheduler, liveness: &Liveness, period: std::time::Duration) {
    let liveness = liveness.clone();
    scheduler
        .register(
            LIVENESS_JOB,
            period,
            Box::new(move || {
                let liveness = liveness.clone();
                Box::pin(async move { liveness.watchdog_keepalive() })
            }),
        )
        .await;
}
