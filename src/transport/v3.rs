// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SNMPv3 USM transport: GET/SET authenticated and optionally encrypted
//! under a per-engine localized key, masked per `security_level` exactly as
//! §4.2 specifies (never in the lower-level wire code).

use std::{
    pin::Pin,
    sync::atomic::{AtomicI32, Ordering},
};
use std::collections::HashMap;

use anyhow::{Context, Result, ensure};
use rand::Rng;
use tokio::{net::UdpSocket, sync::Mutex};

use crate::{
    cfg::{
        config::UsmConfig,
        enums::{AuthProtocol, PrivProtocol, SecurityLevel},
    },
    transport::{
        Transport, SnmpOutcome,
        ber::{self, TAG_GET_REQUEST, TAG_GET_RESPONSE, TAG_OCTET_STRING, TAG_SEQUENCE, TAG_SET_REQUEST},
        usm,
    },
};

const USM_SECURITY_MODEL: i64 = 3;

/// Authoritative engine parameters learned via an unauthenticated discovery
/// round-trip (RFC 3414 §4).
#[derive(Debug, Clone, Default)]
struct EngineInfo {
    engine_id: Vec<u8>,
    engine_boots: u32,
    engine_time: u32,
}

/// Per-masking-level fields, already nulled per §4.2 at construction time so
/// the request path never has to re-derive the security level's meaning.
struct Usm {
    username: String,
    security_level: SecurityLevel,
    auth_protocol: Option<AuthProtocol>,
    auth_passphrase: Option<String>,
    priv_protocol: Option<PrivProtocol>,
    priv_passphrase: Option<String>,
}

pub struct SnmpV3Transport {
    ip_address: String,
    port: u16,
    outlet_oids: HashMap<String, String>,
    usm: Usm,
    msg_id: AtomicI32,
    engine: Mutex<Option<EngineInfo>>,
}

impl SnmpV3Transport {
    pub fn new(
        ip_address: String,
        port: u16,
        outlet_oids: HashMap<String, String>,
        cfg: UsmConfig,
    ) -> Result<Self> {
        let (auth_protocol, auth_passphrase, priv_protocol, priv_passphrase) =
            match cfg.security_level {
                SecurityLevel::NoAuthNoPriv => (None, None, None, None),
                SecurityLevel::AuthNoPriv => (cfg.auth_protocol, cfg.auth_passphrase, None, None),
                SecurityLevel::AuthPriv => {
                    (cfg.auth_protocol, cfg.auth_passphrase, cfg.priv_protocol, cfg.priv_passphrase)
                },
            };

        if matches!(cfg.security_level, SecurityLevel::AuthNoPriv | SecurityLevel::AuthPriv) {
            ensure!(auth_protocol.is_some() && auth_passphrase.is_some(), "security_level {:?} requires auth_protocol and auth_passphrase", cfg.security_level);
        }
        if matches!(cfg.security_level, SecurityLevel::AuthPriv) {
            ensure!(priv_protocol.is_some() && priv_passphrase.is_some(), "security_level authPriv requires priv_protocol and priv_passphrase");
        }

        Ok(SnmpV3Transport {
            ip_address,
            port,
            outlet_oids,
            usm: Usm {
                username: cfg.username,
                security_level: cfg.security_level,
                auth_protocol,
                auth_passphrase,
                priv_protocol,
                priv_passphrase,
            },
            msg_id: AtomicI32::new(1),
            engine: Mutex::new(None),
        })
    }

    fn next_msg_id(&self) -> i32 {
        self.msg_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn roundtrip(&self, message: &[u8]) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((self.ip_address.as_str(), self.port)).await?;
        socket.send(message).await?;
        let mut buf = vec![0u8; 4096];
        let n = socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Discovers `engine_id`/`engine_boots`/`engine_time` with an
    /// unauthenticated, unencrypted GetRequest carrying an empty engine ID,
    /// per RFC 3414 §4's discovery procedure. The agent's Report (or plain
    /// response) carries the authoritative values in its security
    /// parameters, which are cached for the life of the transport.
    async fn discover_engine(&self) -> Result<EngineInfo> {
        let scoped_pdu = build_scoped_pdu(&[], TAG_GET_REQUEST, 0, &[]);
        let security_params = build_security_params(&[], 0, 0, "", &[], &[]);
        let header = build_header(self.next_msg_id(), 0);
        let message = ber::encode_sequence(
            TAG_SEQUENCE,
            &[
                ber::encode_integer(USM_SECURITY_MODEL),
                header,
                ber::encode_octet_string(&security_params),
                scoped_pdu,
            ],
        );

        let response = self.roundtrip(&message).await?;
        // Discovery is always unauthenticated/unencrypted per RFC 3414 §4.
        let parsed = parse_message(&response, None)?;
        Ok(EngineInfo {
            engine_id: parsed.engine_id,
            engine_boots: parsed.engine_boots,
            engine_time: parsed.engine_time,
        })
    }

    async fn engine_info(&self) -> Result<EngineInfo> {
        let mut guard = self.engine.lock().await;
        if let Some(info) = guard.as_ref() {
            return Ok(info.clone());
        }
        let info = self.discover_engine().await?;
        *guard = Some(info.clone());
        Ok(info)
    }

    fn localized_auth_key(&self, engine_id: &[u8]) -> Option<Vec<u8>> {
        let protocol = self.usm.auth_protocol?;
        let passphrase = self.usm.auth_passphrase.as_ref()?;
        Some(usm::password_to_key(protocol, passphrase.as_bytes(), engine_id))
    }

    fn localized_priv_key(&self, engine_id: &[u8]) -> Option<Vec<u8>> {
        let auth_protocol = self.usm.auth_protocol?;
        let passphrase = self.usm.priv_passphrase.as_ref()?;
        Some(usm::password_to_key(auth_protocol, passphrase.as_bytes(), engine_id))
    }

    /// Parses a response message, decrypting its scoped PDU first when this
    /// transport's security level is `authPriv` — the agent encrypts every
    /// ordinary response the same way it encrypts the request.
    fn decode_response(&self, engine: &EngineInfo, bytes: &[u8]) -> Result<ParsedMessage> {
        let priv_ctx = if self.usm.security_level == SecurityLevel::AuthPriv {
            let priv_protocol = self.usm.priv_protocol.context("authPriv requires priv_protocol")?;
            let priv_key = self
                .localized_priv_key(&engine.engine_id)
                .context("authPriv requires a localized privacy key")?;
            Some((priv_protocol, priv_key, engine.engine_boots))
        } else {
            None
        };
        parse_message(bytes, priv_ctx.as_ref().map(|(p, k, b)| (*p, k.as_slice(), *b)))
    }

    fn oid_for<'a>(&'a self, outlet: &str) -> Result<&'a str, SnmpOutcome> {
        self.outlet_oids
            .get(outlet)
            .map(String::as_str)
            .ok_or_else(|| SnmpOutcome::engine_failure(format!("no OID configured for outlet {outlet:?}")))
    }

    async fn perform(&self, pdu_tag: u8, outlet: &str, value: Option<i64>) -> SnmpOutcome {
        let oid = match self.oid_for(outlet) {
            Ok(oid) => oid,
            Err(outcome) => return outcome,
        };

        let engine = match self.engine_info().await {
            Ok(e) => e,
            Err(e) => return SnmpOutcome::engine_failure(format!("engine discovery failed: {e}")),
        };

        match self.build_authenticated_message(&engine, pdu_tag, oid, value) {
            Ok(message) => match self.roundtrip(&message).await {
                Ok(bytes) => match self.decode_response(&engine, &bytes) {
                    Ok(parsed) => match parsed.response_pdu {
                        Some(decoded) if decoded.error_status != 0 => {
                            SnmpOutcome::pdu_failure(decoded.error_status, decoded.error_index)
                        },
                        Some(decoded) => SnmpOutcome::success(decoded.var_binds),
                        None => SnmpOutcome::engine_failure("no scoped PDU in response"),
                    },
                    Err(e) => SnmpOutcome::engine_failure(e.to_string()),
                },
                Err(e) => SnmpOutcome::engine_failure(e.to_string()),
            },
            Err(e) => SnmpOutcome::engine_failure(e.to_string()),
        }
    }

    fn build_authenticated_message(
        &self,
        engine: &EngineInfo,
        pdu_tag: u8,
        oid: &str,
        value: Option<i64>,
    ) -> Result<Vec<u8>> {
        let value_bytes = match value {
            Some(v) => ber::encode_integer(v),
            None => ber::encode_null(),
        };
        let varbind = ber::encode_sequence(TAG_SEQUENCE, &[ber::encode_oid(oid)?, value_bytes]);
        let varbind_list = ber::encode_sequence(TAG_SEQUENCE, &[varbind]);
        let pdu = ber::encode_sequence(
            pdu_tag,
            &[
                ber::encode_integer(self.next_msg_id() as i64),
                ber::encode_integer(0),
                ber::encode_integer(0),
                varbind_list,
            ],
        );
        let scoped_pdu = build_scoped_pdu(&engine.engine_id, pdu_tag, 0, &pdu);

        let authenticated = matches!(
            self.usm.security_level,
            SecurityLevel::AuthNoPriv | SecurityLevel::AuthPriv
        );
        let encrypted = matches!(self.usm.security_level, SecurityLevel::AuthPriv);

        let (scoped_pdu_field, priv_params) = if encrypted {
            let priv_protocol = self.usm.priv_protocol.context("authPriv requires priv_protocol")?;
            let priv_key = self
                .localized_priv_key(&engine.engine_id)
                .context("authPriv requires a localized privacy key")?;
            let salt: [u8; 8] = rand::rng().random();
            let padded = pad_to_block(&scoped_pdu, priv_protocol);
            let cipher_text =
                usm::privacy_encrypt(priv_protocol, &priv_key, &salt, engine.engine_boots, &padded);
            (ber::encode_octet_string(&cipher_text), salt.to_vec())
        } else {
            (scoped_pdu, Vec::new())
        };

        let auth_params_placeholder = if authenticated { vec![0u8; 12] } else { Vec::new() };
        let security_params = build_security_params(
            &engine.engine_id,
            engine.engine_boots,
            engine.engine_time,
            &self.usm.username,
            &auth_params_placeholder,
            &priv_params,
        );

        let header = build_header(self.next_msg_id(), if authenticated { 0x01 } else { 0x00 } | if encrypted { 0x02 } else { 0x00 });

        let mut message = ber::encode_sequence(
            TAG_SEQUENCE,
            &[
                ber::encode_integer(USM_SECURITY_MODEL),
                header,
                ber::encode_octet_string(&security_params),
                scoped_pdu_field,
            ],
        );

        if authenticated {
            let auth_protocol = self.usm.auth_protocol.context("authNoPriv/authPriv requires auth_protocol")?;
            let auth_key = self
                .localized_auth_key(&engine.engine_id)
                .context("authNoPriv/authPriv requires a localized auth key")?;
            let digest = usm::auth_digest(auth_protocol, &auth_key, &message);
            splice_auth_digest(&mut message, &digest)?;
        }

        Ok(message)
    }
}

fn pad_to_block(data: &[u8], priv_protocol: PrivProtocol) -> Vec<u8> {
    let block = match priv_protocol {
        PrivProtocol::Des => 8,
        PrivProtocol::Aes128 => 16,
    };
    let mut out = data.to_vec();
    let remainder = out.len() % block;
    if remainder != 0 {
        out.resize(out.len() + (block - remainder), 0);
    }
    out
}

fn build_header(msg_id: i32, flags: u8) -> Vec<u8> {
    ber::encode_sequence(
        TAG_SEQUENCE,
        &[
            ber::encode_integer(msg_id as i64),
            ber::encode_integer(65507),
            ber::encode_octet_string(&[flags]),
            ber::encode_integer(USM_SECURITY_MODEL),
        ],
    )
}

fn build_security_params(
    engine_id: &[u8],
    engine_boots: u32,
    engine_time: u32,
    username: &str,
    auth_params: &[u8],
    priv_params: &[u8],
) -> Vec<u8> {
    ber::encode_sequence(
        TAG_SEQUENCE,
        &[
            ber::encode_octet_string(engine_id),
            ber::encode_integer(engine_boots as i64),
            ber::encode_integer(engine_time as i64),
            ber::encode_octet_string(username.as_bytes()),
            ber::encode_octet_string(auth_params),
            ber::encode_octet_string(priv_params),
        ],
    )
}

fn build_scoped_pdu(engine_id: &[u8], _pdu_tag: u8, _unused: i64, pdu_bytes: &[u8]) -> Vec<u8> {
    ber::encode_sequence(
        TAG_SEQUENCE,
        &[
            ber::encode_octet_string(engine_id),
            ber::encode_octet_string(&[]),
            pdu_bytes.to_vec(),
        ],
    )
}

/// Overwrites the 12-byte placeholder inside an already-serialized
/// `msgSecurityParameters.msgAuthenticationParameters` field with the real
/// digest, matching RFC 3414 §6.3's "zero the field, digest, then splice"
/// procedure without re-serializing the whole message.
fn splice_auth_digest(message: &mut [u8], digest: &[u8]) -> Result<()> {
    let needle = ber::encode_octet_string(&vec![0u8; 12]);
    let pos = message
        .windows(needle.len())
        .position(|w| w == needle.as_slice())
        .context("auth-parameters placeholder not found in serialized message")?;
    let content_start = pos + (needle.len() - 12);
    message[content_start..content_start + 12].copy_from_slice(digest);
    Ok(())
}

struct ParsedMessage {
    engine_id: Vec<u8>,
    engine_boots: u32,
    engine_time: u32,
    response_pdu: Option<ber::DecodedResponse>,
}

/// Parses a `msgSecurityParameters`/`ScopedPDU` pair out of a full message.
/// `priv_ctx`, when set, carries the privacy protocol, localized privacy
/// key, and `engineBoots` needed to decrypt an encrypted scoped PDU — every
/// ordinary `authPriv` response carries one, not just discovery replies.
fn parse_message(bytes: &[u8], priv_ctx: Option<(PrivProtocol, &[u8], u32)>) -> Result<ParsedMessage> {
    let (outer, _) = ber::read_tlv(bytes)?;
    let (_version, rest) = ber::read_tlv(outer.content)?;
    let (_header, rest) = ber::read_tlv(rest)?;
    let (security_params_tlv, rest) = ber::read_tlv(rest)?;
    let (scoped_pdu_tlv, _) = ber::read_tlv(rest)?;

    let (engine_id_tlv, rest) = ber::read_tlv(security_params_tlv.content)?;
    let (boots_tlv, rest) = ber::read_tlv(rest)?;
    let (time_tlv, rest) = ber::read_tlv(rest)?;
    let (_username_tlv, rest) = ber::read_tlv(rest)?;
    let (_auth_params_tlv, rest) = ber::read_tlv(rest)?;
    let (priv_params_tlv, _) = ber::read_tlv(rest)?;

    let engine_id = engine_id_tlv.content.to_vec();
    let engine_boots = ber::decode_integer(boots_tlv.content)? as u32;
    let engine_time = ber::decode_integer(time_tlv.content)? as u32;

    let response_pdu = match scoped_pdu_tlv.tag {
        TAG_SEQUENCE => decode_scoped_pdu(scoped_pdu_tlv.content)?,
        TAG_OCTET_STRING => {
            let (priv_protocol, priv_key, engine_boots) = priv_ctx
                .context("received an encrypted scoped PDU but no privacy key is configured")?;
            let salt: [u8; 8] = priv_params_tlv
                .content
                .try_into()
                .context("msgPrivacyParameters must be an 8-byte salt")?;
            let plaintext =
                usm::privacy_decrypt(priv_protocol, priv_key, &salt, engine_boots, scoped_pdu_tlv.content);
            decode_scoped_pdu(&plaintext)?
        },
        _ => None,
    };

    Ok(ParsedMessage {
        engine_id,
        engine_boots,
        engine_time,
        response_pdu,
    })
}

fn decode_scoped_pdu(content: &[u8]) -> Result<Option<ber::DecodedResponse>> {
    let (_ctx_engine, rest) = ber::read_tlv(content)?;
    let (_ctx_name, rest) = ber::read_tlv(rest)?;
    let (pdu, _) = ber::read_tlv(rest)?;
    if pdu.tag == TAG_GET_RESPONSE {
        Ok(Some(ber::decode_response_pdu(pdu.content)?))
    } else {
        Ok(None)
    }
}

impl Transport for SnmpV3Transport {
    fn outlet_state_get<'a>(
        &'a self,
        outlet: &'a str,
    ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
        Box::pin(async move { self.perform(TAG_GET_REQUEST, outlet, None).await })
    }

    fn outlet_state_set<'a>(
        &'a self,
        outlet: &'a str,
        value: i64,
    ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
        Box::pin(async move { self.perform(TAG_SET_REQUEST, outlet, Some(value)).await })
    }
}
