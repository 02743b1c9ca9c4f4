// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SNMP v1/v2c transport: community-authenticated GET/SET.
//!
//! v2c is delegated to the `snmp` crate's synchronous `SyncSession` — its
//! blocking API is bridged into this async `Transport` via
//! `tokio::task::spawn_blocking`, the same idiom already used to bridge the
//! `notify` crate's blocking filesystem watcher in the supervisor. v1 has no
//! session type in that crate (it targets v2c only), so it stays on the
//! shared `ber` TLV composition — which itself now delegates every leaf
//! value's encode/decode to `asn1-rs` rather than hand-rolling BER.

use std::{
    collections::HashMap,
    net::ToSocketAddrs,
    pin::Pin,
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use snmp::{SyncSession, Value};
use tokio::net::UdpSocket;
use tracing::warn;

use crate::{
    cfg::enums::MessageModel,
    transport::{
        Transport,
        ber::{self, TAG_GET_REQUEST, TAG_GET_RESPONSE, TAG_SEQUENCE, TAG_SET_REQUEST},
        SnmpOutcome,
    },
};

pub struct SnmpV1V2cTransport {
    ip_address: String,
    port: u16,
    outlet_oids: HashMap<String, String>,
    message_model: MessageModel,
    read_community: String,
    write_community: String,
    request_id: AtomicI32,
}

impl SnmpV1V2cTransport {
    pub fn new(
        ip_address: String,
        port: u16,
        outlet_oids: HashMap<String, String>,
        message_model: MessageModel,
        read_community: String,
        write_community: String,
    ) -> Self {
        SnmpV1V2cTransport {
            ip_address,
            port,
            outlet_oids,
            message_model,
            read_community,
            write_community,
            request_id: AtomicI32::new(1),
        }
    }

    fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn build_message(&self, community: &str, pdu_tag: u8, request_id: i32, oid: &str, value: Option<i64>) -> anyhow::Result<Vec<u8>> {
        let oid_bytes = ber::encode_oid(oid)?;
        let value_bytes = match value {
            Some(v) => ber::encode_integer(v),
            None => ber::encode_null(),
        };
        let varbind = ber::encode_sequence(TAG_SEQUENCE, &[oid_bytes, value_bytes]);
        let varbind_list = ber::encode_sequence(TAG_SEQUENCE, &[varbind]);

        let pdu = ber::encode_sequence(
            pdu_tag,
            &[
                ber::encode_integer(request_id as i64),
                ber::encode_integer(0),
                ber::encode_integer(0),
                varbind_list,
            ],
        );

        Ok(ber::encode_sequence(
            TAG_SEQUENCE,
            &[
                ber::encode_integer(self.message_model.mp_model()),
                ber::encode_octet_string(community.as_bytes()),
                pdu,
            ],
        ))
    }

    async fn roundtrip(&self, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((self.ip_address.as_str(), self.port)).await?;
        socket.send(message).await?;
        let mut buf = vec![0u8; 4096];
        let n = socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    fn parse_response(&self, bytes: &[u8]) -> anyhow::Result<SnmpOutcome> {
        let (outer, _) = ber::read_tlv(bytes)?;
        let (_version, rest) = ber::read_tlv(outer.content)?;
        let (_community, rest) = ber::read_tlv(rest)?;
        let (pdu, _) = ber::read_tlv(rest)?;
        if pdu.tag != TAG_GET_RESPONSE {
            return Ok(SnmpOutcome::engine_failure(format!(
                "unexpected response PDU tag 0x{:02x}",
                pdu.tag
            )));
        }

        let decoded = ber::decode_response_pdu(pdu.content)?;
        if decoded.error_status != 0 {
            return Ok(SnmpOutcome::pdu_failure(decoded.error_status, decoded.error_index));
        }
        Ok(SnmpOutcome::success(decoded.var_binds))
    }

    fn oid_for<'a>(&'a self, outlet: &str) -> Result<&'a str, SnmpOutcome> {
        self.outlet_oids
            .get(outlet)
            .map(String::as_str)
            .ok_or_else(|| SnmpOutcome::engine_failure(format!("no OID configured for outlet {outlet:?}")))
    }

    async fn perform(&self, community: &str, pdu_tag: u8, outlet: &str, value: Option<i64>) -> SnmpOutcome {
        let oid = match self.oid_for(outlet) {
            Ok(oid) => oid,
            Err(outcome) => return outcome,
        };

        if self.message_model == MessageModel::V2c {
            return self.perform_v2c(community, oid, value).await;
        }

        let request_id = self.next_request_id();
        let message = match self.build_message(community, pdu_tag, request_id, oid, value) {
            Ok(m) => m,
            Err(e) => return SnmpOutcome::engine_failure(e.to_string()),
        };

        match self.roundtrip(&message).await {
            Ok(bytes) => match self.parse_response(&bytes) {
                Ok(outcome) => outcome,
                Err(e) => SnmpOutcome::engine_failure(e.to_string()),
            },
            Err(e) => {
                warn!(error = %e, %outlet, "snmp v1/v2c roundtrip failed");
                SnmpOutcome::engine_failure(e.to_string())
            },
        }
    }

    /// v2c GET/SET via the `snmp` crate's blocking session, bridged onto a
    /// blocking-pool thread so this async method doesn't stall the runtime.
    async fn perform_v2c(&self, community: &str, oid: &str, value: Option<i64>) -> SnmpOutcome {
        let ip = self.ip_address.clone();
        let port = self.port;
        let community = community.as_bytes().to_vec();
        let oid = oid.to_string();

        match tokio::task::spawn_blocking(move || run_snmp2c(&ip, port, &community, &oid, value)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => SnmpOutcome::engine_failure(e.to_string()),
            Err(join_err) => SnmpOutcome::engine_failure(format!("snmp v2c worker task failed: {join_err}")),
        }
    }
}

fn parse_oid_arcs(dotted: &str) -> Result<Vec<u32>> {
    dotted
        .split('.')
        .map(|s| s.parse::<u32>().map_err(|_| anyhow!("invalid OID arc {s:?} in {dotted:?}")))
        .collect()
}

fn run_snmp2c(ip: &str, port: u16, community: &[u8], oid: &str, value: Option<i64>) -> Result<SnmpOutcome> {
    let addr = (ip, port)
        .to_socket_addrs()
        .with_context(|| format!("could not resolve snmp agent address {ip}:{port}"))?
        .next()
        .with_context(|| format!("snmp agent address {ip}:{port} resolved to no addresses"))?;
    let arcs = parse_oid_arcs(oid)?;

    let mut session = SyncSession::new(addr, community, Some(Duration::from_secs(2)), 0)
        .map_err(|e| anyhow!("failed to open snmp v2c session: {e:?}"))?;
    let pdu = match value {
        None => session.get(&arcs).map_err(|e| anyhow!("snmp get failed: {e:?}"))?,
        Some(v) => session
            .set(&[(&arcs[..], Value::Integer(v))])
            .map_err(|e| anyhow!("snmp set failed: {e:?}"))?,
    };

    if pdu.error_status != 0 {
        return Ok(SnmpOutcome::pdu_failure(pdu.error_status as i64, pdu.error_index as i64));
    }

    let var_binds = pdu.varbinds.map(|(oid, val)| (oid.to_string(), format!("{val:?}"))).collect();
    Ok(SnmpOutcome::success(var_binds))
}

impl Transport for SnmpV1V2cTransport {
    fn outlet_state_get<'a>(
        &'a self,
        outlet: &'a str,
    ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.perform(&self.read_community, TAG_GET_REQUEST, outlet, None).await
        })
    }

    fn outlet_state_set<'a>(
        &'a self,
        outlet: &'a str,
        value: i64,
    ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.perform(&self.write_community, TAG_SET_REQUEST, outlet, Some(value))
                .await
        })
    }
}
