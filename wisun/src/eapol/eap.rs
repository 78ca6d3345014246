// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! EAP packet header (RFC 3748 §4).

use crate::net::stream::SResult;
use crate::net::stream::{decode_u16_be, decode_u8};

pub const EAP_HDR_LEN: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum EapCode {
    Request = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

impl EapCode {
    fn from_u8(v: u8) -> Option<EapCode> {
        match v {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    /// Success and Failure are unacknowledged (RFC 3748 §4.2) and thus
    /// never retransmitted.
    pub fn is_acknowledged(self) -> bool {
        matches!(self, EapCode::Request | EapCode::Response)
    }
}

pub const EAP_TYPE_IDENTITY: u8 = 1;
pub const EAP_TYPE_TLS: u8 = 13;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct EapHdr {
    pub code: EapCode,
    pub identifier: u8,
    pub length: u16,
}

/// Builds an EAP packet; Success and Failure carry no type byte.
pub fn write_packet(code: EapCode, identifier: u8, eap_type: Option<u8>, data: &[u8]) -> Vec<u8> {
    let length = EAP_HDR_LEN + eap_type.map_or(0, |_| 1) + data.len();
    let mut packet = Vec::with_capacity(length);
    packet.push(code as u8);
    packet.push(identifier);
    packet.extend_from_slice(&(length as u16).to_be_bytes());
    if let Some(eap_type) = eap_type {
        packet.push(eap_type);
    }
    packet.extend_from_slice(data);
    packet
}

/// Parses the header and returns it with the packet contents (the type
/// byte, if any, is the first content byte).
pub fn parse_packet(buf: &[u8]) -> SResult<(EapHdr, &[u8])> {
    let (off, code) = dec_try!(buf; decode_u8);
    let (off, identifier) = dec_try!(buf, off; decode_u8);
    let (off, length) = dec_try!(buf, off; decode_u16_be);
    let code = match EapCode::from_u8(code) {
        Some(c) => c,
        None => stream_err!(),
    };
    stream_cond!(length as usize >= EAP_HDR_LEN);
    stream_len_cond!(buf, length as usize);
    let hdr = EapHdr {
        code,
        identifier,
        length,
    };
    stream_done!(length as usize, (hdr, &buf[off..length as usize]));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_identity_layout() {
        let packet = write_packet(EapCode::Request, 6, Some(EAP_TYPE_IDENTITY), &[]);
        assert_eq!(packet, [1, 6, 0, 5, 1]);
        let (_, (hdr, contents)) = parse_packet(&packet).done().unwrap();
        assert_eq!(hdr.code, EapCode::Request);
        assert_eq!(hdr.identifier, 6);
        assert_eq!(contents, &[EAP_TYPE_IDENTITY]);
    }

    #[test]
    fn failure_has_no_type() {
        let packet = write_packet(EapCode::Failure, 2, None, &[]);
        assert_eq!(packet, [4, 2, 0, 4]);
        assert!(!EapCode::Failure.is_acknowledged());
    }

    #[test]
    fn short_packet_rejected() {
        assert!(parse_packet(&[1, 1]).done().is_none());
        // Length field smaller than the header itself.
        assert!(parse_packet(&[1, 1, 0, 2]).done().is_none());
    }
}
