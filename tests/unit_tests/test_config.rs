// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rs232_to_pdu::cfg::config::{GatewayConfig, OutletsSpec};

#[test]
fn loads_and_validates_a_well_formed_document() {
    let cfg = GatewayConfig::load_from_file("tests/fixtures/gateway_ok.yaml")
        .expect("fixture should load and validate");

    assert_eq!(cfg.devices.len(), 2);
    assert_eq!(cfg.snmp_retry.max_attempts, 3);
    assert!(matches!(cfg.devices["002"].outlets, OutletsSpec::Template(ref t) if t == "test-template"));
}

#[test]
fn rejects_a_device_declaring_two_snmp_versions() {
    let err = GatewayConfig::load_from_file("tests/fixtures/gateway_dual_version.yaml")
        .expect_err("dual v1+v2 declaration must be rejected");

    assert!(err.to_string().contains("exactly one of v1/v2/v3"));
}

#[test]
fn build_devices_resolves_inline_and_template_outlets() {
    let cfg = GatewayConfig::load_from_file("tests/fixtures/gateway_ok.yaml").unwrap();
    let devices = rs232_to_pdu::cfg::config::build_devices(&cfg).expect("devices should build");

    let inline = &devices["001"];
    assert_eq!(inline.outlets, vec!["001".to_string(), "002".to_string()]);
    assert_eq!(inline.power_states.get("on"), Some(&1));

    let templated = &devices["002"];
    assert_eq!(templated.outlets, vec!["001".to_string(), "002".to_string()]);
    // power state "of" is declared as a quoted string in the fixture and
    // must still coerce to an integer.
    assert_eq!(templated.power_states.get("of"), Some(&2));
    assert_eq!(templated.healthcheck_outlet(), Some("001"));
}

#[test]
fn inline_outlets_preserve_declaration_order_not_alphabetical_order() {
    let cfg = GatewayConfig::load_from_file("tests/fixtures/gateway_outlet_order.yaml").unwrap();
    let devices = rs232_to_pdu::cfg::config::build_devices(&cfg).expect("devices should build");

    let device = &devices["001"];
    assert_eq!(
        device.outlets,
        vec!["zeta".to_string(), "alpha".to_string(), "middle".to_string()],
        "outlet order must match the YAML document, not alphabetical order"
    );
    assert_eq!(device.healthcheck_outlet(), Some("zeta"), "first declared outlet is the healthcheck probe");
}
