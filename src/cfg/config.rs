// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    cfg::enums::{AuthProtocol, MessageModel, PrivProtocol, SecurityLevel},
    device::Device,
    error::GatewayError,
    transport::{Transport, v1v2c::SnmpV1V2cTransport, v3::SnmpV3Transport},
};

/// Top-level gateway configuration document.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GatewayConfig {
    pub serial: SerialConfig,
    #[serde(rename = "snmp.retry")]
    pub snmp_retry: RetryConfig,
    pub healthcheck: HealthcheckConfig,
    pub power_states: PowerStatesConfig,
    pub devices: HashMap<String, DeviceConfig>,
    #[serde(rename = "snmp.devices", default)]
    pub snmp_devices: Option<SnmpDevicesConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SerialConfig {
    pub device: PathBuf,
    #[serde(with = "serde_secs")]
    pub timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "serde_secs")]
    pub delay: Duration,
    #[serde(with = "serde_secs")]
    pub timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HealthcheckConfig {
    #[serde(with = "serde_secs")]
    pub frequency: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PowerStatesConfig {
    #[serde(with = "serde_secs")]
    pub cy_delay: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SnmpDevicesConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub custom: HashMap<String, IndexMap<String, String>>,
}

/// Either an inline `outlet -> OID` map, or the name of a template to
/// resolve via [`SnmpDevicesConfig`]. `Inline` keeps declaration order —
/// the first outlet in the YAML document is the healthcheck probe
/// (`Device::healthcheck_outlet`), so a plain `HashMap` would silently
/// pick an arbitrary one.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum OutletsSpec {
    Inline(IndexMap<String, String>),
    Template(String),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DeviceConfig {
    pub outlets: OutletsSpec,
    /// Wire values are declared as YAML integers but some legacy templates
    /// spell them as quoted numbers, hence the permissive int-or-string
    /// coercion performed in [`GatewayConfig::validate_and_normalize`].
    pub power_states: HashMap<String, PowerStateValue>,
    pub snmp: SnmpDeviceConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum PowerStateValue {
    Int(i64),
    Str(String),
}

impl PowerStateValue {
    fn coerce(&self) -> Result<i64> {
        match self {
            PowerStateValue::Int(v) => Ok(*v),
            PowerStateValue::Str(s) => {
                s.parse::<i64>().with_context(|| format!("power state value {s:?} is not an integer"))
            },
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SnmpDeviceConfig {
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub v1: Option<CommunityConfig>,
    #[serde(default)]
    pub v2: Option<CommunityConfig>,
    #[serde(default)]
    pub v3: Option<UsmConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CommunityConfig {
    pub read_community: String,
    pub write_community: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UsmConfig {
    pub username: String,
    #[serde(default)]
    pub auth_protocol: Option<AuthProtocol>,
    #[serde(default)]
    pub auth_passphrase: Option<String>,
    #[serde(default)]
    pub priv_protocol: Option<PrivProtocol>,
    #[serde(default)]
    pub priv_passphrase: Option<String>,
    pub security_level: SecurityLevel,
}

fn template_name_re() -> Regex {
    // Compiling once per call is cheap relative to process startup and keeps
    // this module free of a lazy-static dependency; it is only ever invoked
    // during config load.
    Regex::new(r"^[A-Za-z0-9]+([-_][A-Za-z0-9]+)*$")
        .expect("template name pattern is a fixed, valid regex")
}

impl GatewayConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: GatewayConfig =
            serde_yaml::from_str(&s).context("failed to parse gateway config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Enforces §4.8's invariants: exactly one SNMP version per device,
    /// well-formed template names, non-empty power-state keys, integer
    /// power-state values.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.snmp_retry.max_attempts >= 1, "snmp.retry.max_attempts must be >= 1");
        let re = template_name_re();

        for (name, dev) in &self.devices {
            if let OutletsSpec::Template(template) = &dev.outlets {
                ensure!(
                    re.is_match(template),
                    "device {name:?} outlets template name {template:?} is not well-formed"
                );
            }

            let versions = [dev.snmp.v1.is_some(), dev.snmp.v2.is_some(), dev.snmp.v3.is_some()];
            let present = versions.iter().filter(|v| **v).count();
            ensure!(
                present == 1,
                "device {name:?} must declare exactly one of v1/v2/v3 (found {present})"
            );

            for (verb, _) in &dev.power_states {
                ensure!(!verb.is_empty(), "device {name:?} has an empty power_states key");
            }
        }

        Ok(())
    }
}

/// Resolves an `outlet -> OID` mapping, either inline or via the device
/// template directory (`custom` entries first, then `<path>/<name>.yaml`).
fn resolve_outlets(
    name: &str,
    spec: &OutletsSpec,
    templates: &Option<SnmpDevicesConfig>,
) -> Result<IndexMap<String, String>> {
    match spec {
        OutletsSpec::Inline(map) => Ok(map.clone()),
        OutletsSpec::Template(template) => {
            let templates = templates
                .as_ref()
                .with_context(|| format!("device {name:?} references template {template:?} but no snmp.devices section is configured"))?;

            if let Some(custom) = templates.custom.get(template) {
                return Ok(custom.clone());
            }

            let dir = templates.path.as_ref().with_context(|| {
                format!("device {name:?} template {template:?} is not in `custom` and no template path is configured")
            })?;
            let file = dir.join(format!("{template}.yaml"));
            let contents = fs::read_to_string(&file).with_context(|| {
                format!("device {name:?} template file {file:?} could not be read")
            })?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("template file {file:?} is not a valid outlet map"))
        },
    }
}

/// Builds every configured [`Device`] and its [`Transport`].
pub fn build_devices(cfg: &GatewayConfig) -> Result<HashMap<String, Arc<Device>>> {
    let mut out = HashMap::with_capacity(cfg.devices.len());

    for (name, dev_cfg) in &cfg.devices {
        let outlet_oids = resolve_outlets(name, &dev_cfg.outlets, &cfg.snmp_devices)?;
        ensure!(!outlet_oids.is_empty(), "device {name:?} has no outlets");

        // Declaration order matters: the first outlet is the healthcheck
        // probe (`Device::healthcheck_outlet`), so this must not be sorted.
        let outlet_names: Vec<String> = outlet_oids.keys().cloned().collect();

        let mut power_states = HashMap::with_capacity(dev_cfg.power_states.len());
        for (verb, value) in &dev_cfg.power_states {
            power_states.insert(verb.clone(), value.coerce()?);
        }

        let transport = build_transport(name, dev_cfg, &outlet_oids)?;

        out.insert(
            name.clone(),
            Arc::new(Device::new(name.clone(), outlet_names, power_states, transport)),
        );
    }

    Ok(out)
}

fn build_transport(
    name: &str,
    dev_cfg: &DeviceConfig,
    outlet_oids: &IndexMap<String, String>,
) -> Result<Box<dyn Transport>> {
    let snmp = &dev_cfg.snmp;
    // Lookup-only inside the transports; declaration order has already been
    // captured in `Device::outlets` by the caller.
    let outlet_oids: HashMap<String, String> = outlet_oids.clone().into_iter().collect();

    if let Some(community) = &snmp.v1 {
        return Ok(Box::new(SnmpV1V2cTransport::new(
            snmp.ip_address.clone(),
            snmp.port,
            outlet_oids.clone(),
            MessageModel::V1,
            community.read_community.clone(),
            community.write_community.clone(),
        )));
    }
    if let Some(community) = &snmp.v2 {
        return Ok(Box::new(SnmpV1V2cTransport::new(
            snmp.ip_address.clone(),
            snmp.port,
            outlet_oids.clone(),
            MessageModel::V2c,
            community.read_community.clone(),
            community.write_community.clone(),
        )));
    }
    if let Some(usm) = &snmp.v3 {
        return Ok(Box::new(SnmpV3Transport::new(
            snmp.ip_address.clone(),
            snmp.port,
            outlet_oids.clone(),
            usm.clone(),
        )?));
    }

    bail!(GatewayError::Config(format!(
        "device {name:?} has no usable SNMP transport configuration"
    )))
}

/// Serde helper for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
