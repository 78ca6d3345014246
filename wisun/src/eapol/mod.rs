// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! IEEE 802.1X EAPOL transport: PDU framing shared by the EAP exchange
//! and the key handshakes, and the authenticator built on top of it.
//!
//! EAPOL is big-endian on the wire, unlike everything the RCP speaks.

pub mod auth;
pub mod eap;

use crate::net::stream::SResult;
use crate::net::stream::{decode_u16_be, decode_u8};

pub const EAPOL_PROTOCOL_VERSION: u8 = 3;
pub const EAPOL_HDR_LEN: usize = 4;

/// KMP identifiers from IEEE 802.15.9, carried in front of each EAPOL
/// PDU inside the MPX-IE. The authenticator processes 802.1X; the
/// four-way and group key handshake ids are recognized and dropped with
/// a diagnostic.
pub const KMP_ID_8021X: u8 = 1;
pub const KMP_ID_80211_4WH: u8 = 6;
pub const KMP_ID_80211_GKH: u8 = 7;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum EapolPacketType {
    Eap = 0,
    Start = 1,
    Key = 3,
}

impl EapolPacketType {
    fn from_u8(v: u8) -> Option<EapolPacketType> {
        match v {
            0 => Some(EapolPacketType::Eap),
            1 => Some(EapolPacketType::Start),
            3 => Some(EapolPacketType::Key),
            _ => None,
        }
    }
}

/// Wraps `body` into an EAPOL PDU.
pub fn write_pdu(packet_type: EapolPacketType, body: &[u8]) -> Vec<u8> {
    debug_assert!(body.len() <= u16::MAX as usize);
    let mut pdu = Vec::with_capacity(EAPOL_HDR_LEN + body.len());
    pdu.push(EAPOL_PROTOCOL_VERSION);
    pdu.push(packet_type as u8);
    pdu.extend_from_slice(&(body.len() as u16).to_be_bytes());
    pdu.extend_from_slice(body);
    pdu
}

/// Splits an EAPOL PDU into its packet type and body. The body length
/// field bounds the body; trailing padding is dropped.
pub fn parse_pdu(pdu: &[u8]) -> SResult<(EapolPacketType, &[u8])> {
    let (off, _version) = dec_try!(pdu; decode_u8);
    let (off, packet_type) = dec_try!(pdu, off; decode_u8);
    let (off, length) = dec_try!(pdu, off; decode_u16_be);
    let packet_type = match EapolPacketType::from_u8(packet_type) {
        Some(t) => t,
        None => stream_err!(),
    };
    stream_len_cond!(pdu, off + length as usize);
    stream_done!(
        off + length as usize,
        (packet_type, &pdu[off..off + length as usize])
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdu_round_trip() {
        let pdu = write_pdu(EapolPacketType::Eap, &[1, 2, 3]);
        assert_eq!(pdu[..4], [EAPOL_PROTOCOL_VERSION, 0, 0, 3]);
        let (_, (packet_type, body)) = parse_pdu(&pdu).done().unwrap();
        assert_eq!(packet_type, EapolPacketType::Eap);
        assert_eq!(body, &[1, 2, 3]);
    }

    #[test]
    fn truncated_pdu_rejected() {
        let mut pdu = write_pdu(EapolPacketType::Key, &[1, 2, 3, 4]);
        pdu.truncate(6);
        assert!(parse_pdu(&pdu).done().is_none());
    }
}
