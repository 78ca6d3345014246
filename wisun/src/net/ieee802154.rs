// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! IEEE 802.15.4-2015 frame encoding and decoding, restricted to the
//! frame shapes Wi-SUN FAN uses on the air.
//!
//! Wi-SUN data and ack frames always carry an extended source address and
//! either an extended destination (unicast) or none (broadcast and async
//! frames). The PAN ID, when present, is therefore either the destination
//! PAN (destination address present) or the source PAN (destination
//! address absent); `Header::pan_id == None` selects PAN ID compression.
//!
//! Frames are version 2 (802.15.4-2015) and carry information elements.
//! The header IE list is passed through as a single pre-encoded vector;
//! payload IE vectors (at most two) are separated from the header IEs by
//! a Header Termination 2 IE. When the security level is ENC-MIC-64, the
//! encoder reserves eight trailing bytes: the MIC itself, like the frame
//! counter, is produced by the RCP's security engine.

use crate::net::stream::SResult;
use crate::net::stream::{decode_u16, decode_u32, decode_u8};
use crate::net::stream::{encode_bytes, encode_u16, encode_u32, encode_u8};

use core::fmt;

/// Largest PSDU the radio will accept; frame assembly fails beyond this.
pub const MAX_FRAME_LEN: usize = 2047;

pub const MIC64_LEN: usize = 8;

/// Header Termination 1: ends the header IE list, data payload follows.
pub const IE_ID_HT1: u8 = 0x7e;
/// Header Termination 2: ends the header IE list, payload IEs follow.
pub const IE_ID_HT2: u8 = 0x7f;

/// Payload IE group identifiers (IEEE 802.15.4-2015, table 7-15).
pub const IE_GROUP_MPX: u8 = 0x3;
pub const IE_GROUP_WP: u8 = 0x4;
pub const IE_GROUP_TERMINATION: u8 = 0xf;

/// 64-bit extended unique identifier, the only L2 address Wi-SUN uses.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub const BROADCAST: Eui64 = Eui64([0xff; 8]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FrameType {
    Data = 0b001,
    Ack = 0b010,
}

impl FrameType {
    fn from_fcf(bits: u16) -> Option<FrameType> {
        match bits {
            0b001 => Some(FrameType::Data),
            0b010 => Some(FrameType::Ack),
            _ => None,
        }
    }
}

/// Only the two levels Wi-SUN transmits: unsecured, or AES-CCM with
/// encryption and a 64-bit MIC.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SecurityLevel {
    #[default]
    None = 0,
    EncMic64 = 6,
}

impl SecurityLevel {
    pub fn mic_len(&self) -> usize {
        match self {
            SecurityLevel::None => 0,
            SecurityLevel::EncMic64 => MIC64_LEN,
        }
    }
}

/// Parsed or to-be-encoded MAC header.
///
/// `pan_id == None` means PAN ID compression on the wire; `decode` expands
/// it to the local PAN ID. `seqno == None` selects sequence number
/// suppression. `frame_counter` is written as zero on egress, the RCP
/// replaces it along with the MIC.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Header {
    pub frame_type: FrameType,
    pub ack_req: bool,
    pub pan_id: Option<u16>,
    pub dst: Eui64,
    pub src: Eui64,
    pub seqno: Option<u8>,
    pub security: SecurityLevel,
    pub key_index: u8,
    pub frame_counter: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed header")]
    MalformedHeader,
    #[error("unsupported ie layout")]
    UnsupportedIeLayout,
    #[error("truncated mic")]
    TruncatedMic,
    #[error("frame too long")]
    FrameTooLong,
}

/// Decoded frame regions. The IE cursors borrow the input buffer and
/// include the raw IE descriptors but neither termination IE.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub hdr: Header,
    pub ie_header: &'a [u8],
    pub ie_payload: &'a [u8],
    pub payload: &'a [u8],
    pub mic: &'a [u8],
}

// Frame control field, IEEE 802.15.4-2015 figure 7-2.
const FCF_TYPE: u16 = 0x0007;
const FCF_SEC_ENABLED: u16 = 1 << 3;
const FCF_ACK_REQ: u16 = 1 << 5;
const FCF_PAN_ID_COMPRESSION: u16 = 1 << 6;
const FCF_SEQNO_SUPPRESSION: u16 = 1 << 8;
const FCF_IE_PRESENT: u16 = 1 << 9;
const FCF_DST_ADDR_MODE: u16 = 0x0c00;
const FCF_FRAME_VERSION: u16 = 0x3000;
const FCF_SRC_ADDR_MODE: u16 = 0xc000;

const ADDR_MODE_NONE: u16 = 0b00;
const ADDR_MODE_EXTENDED: u16 = 0b11;
const FRAME_VERSION_2015: u16 = 0b10;

// Security control field: level in bits 0-2, key ID mode in bits 3-4.
// Wi-SUN always uses key ID mode 1 (key index).
const SECCTL_LEVEL: u8 = 0x07;
const SECCTL_KEY_ID_MODE: u8 = 0x18;
const KEY_ID_MODE_INDEX: u8 = 1;

/// Appends a zero-length header IE descriptor (used for HT1/HT2).
pub fn ie_push_header(buf: &mut Vec<u8>, id: u8) {
    let descr = (id as u16) << 7;
    buf.extend_from_slice(&descr.to_le_bytes());
}

fn encode_header(buf: &mut [u8], hdr: &Header, ies_present: bool) -> SResult {
    let dst_mode = if hdr.dst.is_broadcast() {
        ADDR_MODE_NONE
    } else {
        ADDR_MODE_EXTENDED
    };
    let mut fcf = hdr.frame_type as u16;
    if hdr.security != SecurityLevel::None {
        fcf |= FCF_SEC_ENABLED;
    }
    if hdr.ack_req {
        fcf |= FCF_ACK_REQ;
    }
    if hdr.pan_id.is_none() {
        fcf |= FCF_PAN_ID_COMPRESSION;
    }
    if hdr.seqno.is_none() {
        fcf |= FCF_SEQNO_SUPPRESSION;
    }
    if ies_present {
        fcf |= FCF_IE_PRESENT;
    }
    fcf |= dst_mode << 10;
    fcf |= FRAME_VERSION_2015 << 12;
    fcf |= ADDR_MODE_EXTENDED << 14;

    let mut off = enc_consume!(buf; encode_u16, fcf);
    if let Some(seqno) = hdr.seqno {
        off = enc_consume!(buf, off; encode_u8, seqno);
    }
    // Destination address present: the PAN ID field is the destination
    // PAN. Destination absent: it is the source PAN. Either way it sits
    // before the address it qualifies (802.15.4-2015, table 7-2).
    if dst_mode == ADDR_MODE_EXTENDED {
        if let Some(pan_id) = hdr.pan_id {
            off = enc_consume!(buf, off; encode_u16, pan_id);
        }
        off = enc_consume!(buf, off; encode_bytes, &hdr.dst.0);
        off = enc_consume!(buf, off; encode_bytes, &hdr.src.0);
    } else {
        if let Some(pan_id) = hdr.pan_id {
            off = enc_consume!(buf, off; encode_u16, pan_id);
        }
        off = enc_consume!(buf, off; encode_bytes, &hdr.src.0);
    }
    if hdr.security != SecurityLevel::None {
        let secctl = hdr.security as u8 | KEY_ID_MODE_INDEX << 3;
        off = enc_consume!(buf, off; encode_u8, secctl);
        off = enc_consume!(buf, off; encode_u32, hdr.frame_counter);
        off = enc_consume!(buf, off; encode_u8, hdr.key_index);
    }
    stream_done!(off);
}

/// Assembles a frame: MHR, the single header-IE vector, an HT2 terminator
/// when payload IEs follow, the payload-IE vectors, and reserved MIC
/// space when the frame is secured.
pub fn encode(
    hdr: &Header,
    header_ies: &[u8],
    payload_ies: &[&[u8]],
) -> Result<Vec<u8>, FrameError> {
    debug_assert!(payload_ies.len() <= 2);

    let mut mhr = [0; 64];
    let ies_present = !header_ies.is_empty() || !payload_ies.is_empty();
    let (mhr_len, ()) = encode_header(&mut mhr, hdr, ies_present)
        .done()
        .ok_or(FrameError::MalformedHeader)?;

    let mut frame = Vec::with_capacity(mhr_len + header_ies.len() + 64);
    frame.extend_from_slice(&mhr[..mhr_len]);
    frame.extend_from_slice(header_ies);
    if !payload_ies.is_empty() {
        ie_push_header(&mut frame, IE_ID_HT2);
        for ie in payload_ies {
            frame.extend_from_slice(ie);
        }
    }
    frame.resize(frame.len() + hdr.security.mic_len(), 0);
    if frame.len() > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLong);
    }
    Ok(frame)
}

struct DecodedHeader {
    hdr: Header,
    ies_present: bool,
    pan_id_seen: bool,
}

fn decode_header(buf: &[u8]) -> SResult<DecodedHeader> {
    let (off, fcf) = dec_try!(buf; decode_u16);
    let frame_type = match FrameType::from_fcf(fcf & FCF_TYPE) {
        Some(t) => t,
        None => stream_err!(),
    };
    stream_cond!((fcf & FCF_FRAME_VERSION) >> 12 == FRAME_VERSION_2015);
    stream_cond!((fcf & FCF_SRC_ADDR_MODE) >> 14 == ADDR_MODE_EXTENDED);
    let dst_mode = (fcf & FCF_DST_ADDR_MODE) >> 10;
    stream_cond!(dst_mode == ADDR_MODE_NONE || dst_mode == ADDR_MODE_EXTENDED);

    let (off, seqno) = if fcf & FCF_SEQNO_SUPPRESSION == 0 {
        let (off, seqno) = dec_try!(buf, off; decode_u8);
        (off, Some(seqno))
    } else {
        (off, None)
    };

    let pan_id_seen = fcf & FCF_PAN_ID_COMPRESSION == 0;
    let (off, pan_id) = if pan_id_seen {
        let (off, pan_id) = dec_try!(buf, off; decode_u16);
        (off, Some(pan_id))
    } else {
        (off, None)
    };

    let (off, dst) = if dst_mode == ADDR_MODE_EXTENDED {
        dec_try!(buf, off; decode_eui64)
    } else {
        (off, Eui64::BROADCAST)
    };
    let (off, src) = dec_try!(buf, off; decode_eui64);
    let mut off = off;

    let mut security = SecurityLevel::None;
    let mut key_index = 0;
    let mut frame_counter = 0;
    if fcf & FCF_SEC_ENABLED != 0 {
        let (o, secctl) = dec_try!(buf, off; decode_u8);
        stream_cond!(secctl & SECCTL_LEVEL == SecurityLevel::EncMic64 as u8);
        stream_cond!((secctl & SECCTL_KEY_ID_MODE) >> 3 == KEY_ID_MODE_INDEX);
        let (o, counter) = dec_try!(buf, o; decode_u32);
        let (o, index) = dec_try!(buf, o; decode_u8);
        security = SecurityLevel::EncMic64;
        frame_counter = counter;
        key_index = index;
        off = o;
    }

    stream_done!(
        off,
        DecodedHeader {
            hdr: Header {
                frame_type,
                ack_req: fcf & FCF_ACK_REQ != 0,
                pan_id,
                dst,
                src,
                seqno,
                security,
                key_index,
                frame_counter,
            },
            ies_present: fcf & FCF_IE_PRESENT != 0,
            pan_id_seen,
        }
    );
}

fn decode_eui64(buf: &[u8]) -> SResult<Eui64> {
    stream_len_cond!(buf, 8);
    let mut b = [0; 8];
    b.copy_from_slice(&buf[..8]);
    stream_done!(8, Eui64(b));
}

/// Walks the header IE descriptors starting at `buf`, returning
/// `(header_ie_region_len, after_terminator_offset, terminator)`.
fn split_header_ies(buf: &[u8]) -> Result<(usize, usize, Option<u8>), FrameError> {
    let mut off = 0;
    loop {
        if off == buf.len() {
            return Ok((off, off, None));
        }
        if off + 2 > buf.len() {
            return Err(FrameError::MalformedHeader);
        }
        let descr = u16::from_le_bytes([buf[off], buf[off + 1]]);
        if descr & 0x8000 != 0 {
            // A payload IE descriptor before any header termination.
            return Err(FrameError::UnsupportedIeLayout);
        }
        let len = (descr & 0x007f) as usize;
        let id = ((descr >> 7) & 0xff) as u8;
        if id == IE_ID_HT1 || id == IE_ID_HT2 {
            return Ok((off, off + 2, Some(id)));
        }
        if off + 2 + len > buf.len() {
            return Err(FrameError::MalformedHeader);
        }
        off += 2 + len;
    }
}

/// Walks the payload IE descriptors, returning the length of the
/// payload-IE region and the offset where the data payload begins.
fn split_payload_ies(buf: &[u8]) -> Result<(usize, usize), FrameError> {
    let mut off = 0;
    loop {
        if off == buf.len() {
            return Ok((off, off));
        }
        if off + 2 > buf.len() {
            return Err(FrameError::MalformedHeader);
        }
        let descr = u16::from_le_bytes([buf[off], buf[off + 1]]);
        if descr & 0x8000 == 0 {
            return Err(FrameError::UnsupportedIeLayout);
        }
        let len = (descr & 0x07ff) as usize;
        let group = ((descr >> 11) & 0xf) as u8;
        if group == IE_GROUP_TERMINATION {
            return Ok((off, off + 2));
        }
        if off + 2 + len > buf.len() {
            return Err(FrameError::MalformedHeader);
        }
        off += 2 + len;
    }
}

/// Decodes a frame received from the RCP. A PAN ID suppressed on the wire
/// is expanded to `local_pan_id`.
pub fn decode(buf: &[u8], local_pan_id: u16) -> Result<ParsedFrame<'_>, FrameError> {
    let (mhr_len, decoded) = decode_header(buf)
        .done()
        .ok_or(FrameError::MalformedHeader)?;
    let mut hdr = decoded.hdr;
    if !decoded.pan_id_seen {
        hdr.pan_id = Some(local_pan_id);
    }

    let mic_len = hdr.security.mic_len();
    if buf.len() < mhr_len + mic_len {
        return Err(FrameError::TruncatedMic);
    }
    let mic = &buf[buf.len() - mic_len..];
    let body = &buf[mhr_len..buf.len() - mic_len];

    let (ie_header, ie_payload, payload) = if !decoded.ies_present {
        (&body[0..0], &body[0..0], body)
    } else {
        let (hdr_len, after, terminator) = split_header_ies(body)?;
        let ie_header = &body[..hdr_len];
        let rest = &body[after..];
        match terminator {
            Some(IE_ID_HT2) => {
                let (pie_len, data_off) = split_payload_ies(rest)?;
                (ie_header, &rest[..pie_len], &rest[data_off..])
            }
            // HT1: the data payload follows directly.
            Some(_) => (ie_header, &body[0..0], rest),
            // No terminator: header IEs ran to the end of the frame
            // (enhanced ack), no payload.
            None => (ie_header, &body[0..0], rest),
        }
    };

    Ok(ParsedFrame {
        hdr,
        ie_header,
        ie_payload,
        payload,
        mic,
    })
}

/// Iterator over the payload IEs of a decoded frame's `ie_payload` region.
pub struct PayloadIeIter<'a> {
    buf: &'a [u8],
    off: usize,
}

/// One payload IE: group identifier and raw content.
#[derive(Debug, PartialEq, Eq)]
pub struct PayloadIe<'a> {
    pub group_id: u8,
    pub content: &'a [u8],
}

impl<'a> PayloadIeIter<'a> {
    pub fn new(ie_payload: &'a [u8]) -> PayloadIeIter<'a> {
        PayloadIeIter {
            buf: ie_payload,
            off: 0,
        }
    }
}

impl<'a> Iterator for PayloadIeIter<'a> {
    type Item = PayloadIe<'a>;

    fn next(&mut self) -> Option<PayloadIe<'a>> {
        // The region was validated by `decode`; anything short here just
        // ends the iteration.
        if self.off + 2 > self.buf.len() {
            return None;
        }
        let descr = u16::from_le_bytes([self.buf[self.off], self.buf[self.off + 1]]);
        let len = (descr & 0x07ff) as usize;
        let group_id = ((descr >> 11) & 0xf) as u8;
        if self.off + 2 + len > self.buf.len() {
            return None;
        }
        let content = &self.buf[self.off + 2..self.off + 2 + len];
        self.off += 2 + len;
        Some(PayloadIe { group_id, content })
    }
}

/// Encodes one payload IE descriptor plus content into a fresh vector.
pub fn payload_ie(group_id: u8, content: &[u8]) -> Vec<u8> {
    debug_assert!(content.len() <= 0x07ff);
    let descr = 0x8000 | (group_id as u16) << 11 | content.len() as u16;
    let mut ie = Vec::with_capacity(2 + content.len());
    ie.extend_from_slice(&descr.to_le_bytes());
    ie.extend_from_slice(content);
    ie
}

/// Encodes one header IE descriptor plus content into a fresh vector.
pub fn header_ie(id: u8, content: &[u8]) -> Vec<u8> {
    debug_assert!(content.len() <= 0x7f);
    let descr = (content.len() as u16) | (id as u16) << 7;
    let mut ie = Vec::with_capacity(2 + content.len());
    ie.extend_from_slice(&descr.to_le_bytes());
    ie.extend_from_slice(content);
    ie
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_hdr(security: SecurityLevel) -> Header {
        Header {
            frame_type: FrameType::Data,
            ack_req: true,
            pan_id: None,
            dst: Eui64([2, 0, 0, 0, 0, 0, 0, 2]),
            src: Eui64([2, 0, 0, 0, 0, 0, 0, 1]),
            seqno: None,
            security,
            key_index: 1,
            frame_counter: 0,
        }
    }

    #[test]
    fn round_trip_unicast() {
        let hdr = data_hdr(SecurityLevel::EncMic64);
        let hie = header_ie(0x2a, &[1, 2, 3]);
        let pie = payload_ie(IE_GROUP_WP, &[9, 9]);
        let frame = encode(&hdr, &hie, &[&pie]).unwrap();

        let parsed = decode(&frame, 0x1234).unwrap();
        let mut expanded = hdr;
        expanded.pan_id = Some(0x1234);
        assert_eq!(parsed.hdr, expanded);
        assert_eq!(parsed.ie_header, &hie[..]);
        assert_eq!(parsed.ie_payload, &pie[..]);
        assert_eq!(parsed.payload, &[] as &[u8]);
        assert_eq!(parsed.mic.len(), MIC64_LEN);
    }

    #[test]
    fn round_trip_broadcast_with_pan() {
        let mut hdr = data_hdr(SecurityLevel::None);
        hdr.ack_req = false;
        hdr.dst = Eui64::BROADCAST;
        hdr.pan_id = Some(0xcafe);
        hdr.key_index = 0;
        let hie = header_ie(0x2b, &[7]);
        let frame = encode(&hdr, &hie, &[]).unwrap();

        let parsed = decode(&frame, 0x1111).unwrap();
        assert_eq!(parsed.hdr, hdr);
        assert_eq!(parsed.ie_header, &hie[..]);
        assert!(parsed.ie_payload.is_empty());
        assert!(parsed.mic.is_empty());
    }

    #[test]
    fn dual_payload_ie_framing() {
        let hdr = data_hdr(SecurityLevel::EncMic64);
        let hie = header_ie(0x2a, &[0; 5]);
        let pie_a = payload_ie(IE_GROUP_WP, &[1, 2, 3, 4]);
        let pie_b = payload_ie(IE_GROUP_MPX, &[5, 6, 7, 8, 9, 10, 11]);
        let frame = encode(&hdr, &hie, &[&pie_a, &pie_b]).unwrap();

        // MHR, header IE, HT2, both payload IEs, MIC space: in order.
        let mhr_len = frame.len() - hie.len() - 2 - pie_a.len() - pie_b.len() - MIC64_LEN;
        let mut off = mhr_len;
        assert_eq!(&frame[off..off + hie.len()], &hie[..]);
        off += hie.len();
        let ht2 = u16::from_le_bytes([frame[off], frame[off + 1]]);
        assert_eq!((ht2 >> 7) & 0xff, IE_ID_HT2 as u16);
        off += 2;
        assert_eq!(&frame[off..off + pie_a.len()], &pie_a[..]);
        off += pie_a.len();
        assert_eq!(&frame[off..off + pie_b.len()], &pie_b[..]);
        off += pie_b.len();
        assert_eq!(&frame[off..], &[0; MIC64_LEN]);

        let parsed = decode(&frame, 0).unwrap();
        let ies: Vec<_> = PayloadIeIter::new(parsed.ie_payload).collect();
        assert_eq!(ies.len(), 2);
        assert_eq!(ies[0].content, &[1, 2, 3, 4]);
        assert_eq!(ies[1].content, &[5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn no_payload_ies_no_ht2() {
        let mut hdr = data_hdr(SecurityLevel::None);
        hdr.key_index = 0;
        let hie = header_ie(0x2a, &[1]);
        let frame = encode(&hdr, &hie, &[]).unwrap();
        let parsed = decode(&frame, 0).unwrap();
        assert!(parsed.ie_payload.is_empty());
        assert!(!frame
            .windows(2)
            .any(|w| u16::from_le_bytes([w[0], w[1]]) == (IE_ID_HT2 as u16) << 7));
    }

    #[test]
    fn truncated_mic_rejected() {
        let hdr = data_hdr(SecurityLevel::EncMic64);
        let hie = header_ie(0x2a, &[]);
        let frame = encode(&hdr, &hie, &[]).unwrap();
        let short = &frame[..frame.len() - MIC64_LEN - 1];
        assert_eq!(decode(short, 0).unwrap_err(), FrameError::TruncatedMic);
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(decode(&[0x01], 0).unwrap_err(), FrameError::MalformedHeader);
    }

    #[test]
    fn payload_ie_before_termination_rejected() {
        let mut hdr = data_hdr(SecurityLevel::None);
        hdr.key_index = 0;
        // Hand-build a frame whose IE region starts with a payload IE
        // descriptor (type bit set) without any header termination.
        let bogus_ie = payload_ie(IE_GROUP_WP, &[1]);
        let frame = encode(&hdr, &bogus_ie, &[]).unwrap();
        assert_eq!(
            decode(&frame, 0).unwrap_err(),
            FrameError::UnsupportedIeLayout
        );
    }
}
