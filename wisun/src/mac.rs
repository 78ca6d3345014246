// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Bridge between the upper MAC and the RCP.
//!
//! Egress: data requests from the LLC are assembled into 802.15.4
//! frames, tagged with the destination neighbor's FHSS schedule and
//! frame-counter window, and handed to the RCP under a freshly
//! allocated handle. A frame context is kept per outstanding handle;
//! the context is dropped when the matching confirmation arrives or the
//! context times out, and every submitted request produces exactly one
//! confirm callback: the RCP's, or one synthesized here (unknown
//! unicast destination, context timeout).
//!
//! Ingress: received frames are parsed and demultiplexed by their
//! MPX-IE: KMP traffic goes to the EAPOL path, everything else to the
//! LLC indication callback. Parse failures are dropped with a trace and
//! a counter; indications are never synthesized.

use crate::hif::{FhssType, HifStatus, ModeSwitchType, RateInfo};
use crate::neighbor::{Neighbor, NeighborTable};
use crate::net::ieee802154::{
    self, header_ie, payload_ie, Eui64, FrameType, Header, ParsedFrame, PayloadIeIter,
    SecurityLevel, IE_GROUP_MPX, IE_GROUP_WP,
};
use crate::pcapng::PcapngWriter;
use crate::rcp::{Bus, Rcp, RxInd, TxCnf};
use crate::security::keys::GTK_NUM;
use crate::timer;

use log::{trace, warn};

use std::fs::File;

/// MPX multiplex identifiers (IEEE 802.15.9 / Wi-SUN FAN).
pub const MPX_ID_KMP: u16 = 0x0001;
pub const MPX_ID_6LOWPAN: u16 = 0xa0ed;

/// Wi-SUN header IE (id 0x2a) sub-IDs.
pub const IE_ID_WH: u8 = 0x2a;
pub const WH_SUB_UTT: u8 = 1;

/// Wi-SUN payload (WP) nested sub-IDs.
pub const WP_SUB_PAN: u8 = 4;
pub const WP_SUB_NETNAME: u8 = 6;

/// Wi-SUN frame type carried in the UTT-IE.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum WsFrameType {
    PanAdvert = 0,
    PanAdvertSolicit = 1,
    PanConfig = 2,
    PanConfigSolicit = 3,
    Data = 4,
    Ack = 5,
    Eapol = 6,
}

/// An outstanding transmission is one of these kinds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FrameKind {
    UnicastFfn,
    UnicastLfn,
    BroadcastFfn,
    BroadcastLfn,
    Async,
    Eapol,
}

impl FrameKind {
    fn from_fhss(fhss_type: FhssType) -> FrameKind {
        match fhss_type {
            FhssType::FfnUc => FrameKind::UnicastFfn,
            FhssType::LfnUc | FhssType::LfnPa => FrameKind::UnicastLfn,
            FhssType::FfnBc => FrameKind::BroadcastFfn,
            FhssType::LfnBc => FrameKind::BroadcastLfn,
            FhssType::Async => FrameKind::Async,
        }
    }
}

/// Frame sent to the RCP and waiting for its confirmation.
#[derive(Copy, Clone, Debug)]
pub struct FrameCtx {
    pub handle: u8,
    pub kind: FrameKind,
    pub dst: Option<Eui64>,
    pub timestamp_ms: u64,
}

/// A confirmation not delivered by the RCP within this window is
/// declared lost and synthesized as timed out.
pub const FRAME_CTX_TIMEOUT_MS: u64 = 30_000;

/// Data request from the upper MAC.
pub struct DataReq<'a> {
    pub tx_ack_req: bool,
    pub fhss_type: FhssType,
    pub dst: Option<Eui64>,
    pub seqno_suppressed: bool,
    pub security: SecurityLevel,
    pub key_index: u8,
    pub rate_list: Option<&'a [RateInfo]>,
    pub ms_mode: ModeSwitchType,
}

/// IE vectors accompanying a data request: exactly one header-IE
/// vector, at most two payload-IE vectors.
pub struct IeList<'a> {
    pub header: &'a [u8],
    pub payload: &'a [&'a [u8]],
}

/// Upper-MAC callbacks. Exactly one `confirm` per submitted request;
/// `indication` and `eapol_ind` only for frames that parsed.
pub trait MacClient {
    fn confirm(&mut self, cnf: &TxCnf, ctx: &FrameCtx, ack: Option<&ParsedFrame>);
    fn indication(&mut self, ind: &RxInd, frame: &ParsedFrame);
    fn eapol_ind(&mut self, src: &Eui64, kmp_id: u8, pdu: &[u8]);
}

pub struct WsCtx {
    pub pan_id: u16,
    pub eui64: Eui64,
    seqno: u8,
    handle_next: u8,
    frame_ctxs: Vec<FrameCtx>,
    pcap: Option<PcapngWriter<File>>,
    pub rx_drop_count: u64,
}

impl WsCtx {
    pub fn new() -> WsCtx {
        WsCtx {
            pan_id: 0xffff,
            eui64: Eui64::default(),
            seqno: 0,
            handle_next: 0,
            frame_ctxs: Vec::new(),
            pcap: None,
            rx_drop_count: 0,
        }
    }

    pub fn set_pcap(&mut self, pcap: PcapngWriter<File>) {
        self.pcap = Some(pcap);
    }

    pub fn frame_ctx_count(&self) -> usize {
        self.frame_ctxs.len()
    }

    fn alloc_handle(&mut self) -> u8 {
        assert!(self.frame_ctxs.len() < 255, "frame context table full");
        loop {
            let handle = self.handle_next;
            self.handle_next = self.handle_next.wrapping_add(1);
            if !self.frame_ctxs.iter().any(|c| c.handle == handle) {
                return handle;
            }
        }
    }

    fn pcap_write(&mut self, timestamp_us: u64, frame: &[u8]) {
        if let Some(pcap) = self.pcap.as_mut() {
            if let Err(err) = pcap.write_frame(timestamp_us, frame) {
                warn!("pcapng: {}", err);
                self.pcap = None;
            }
        }
    }

    fn confirm_fail<C: MacClient>(&mut self, client: &mut C, kind: FrameKind, dst: Option<Eui64>) {
        let ctx = FrameCtx {
            handle: self.alloc_handle(),
            kind,
            dst,
            timestamp_ms: timer::now_ms(),
        };
        let cnf = TxCnf {
            handle: ctx.handle,
            status: HifStatus::TimedOut,
            frame: Vec::new(),
            timestamp_us: 0,
        };
        client.confirm(&cnf, &ctx, None);
    }

    /// Submits a data request. The preconditions are contracts with the
    /// upper MAC, never runtime conditions.
    pub fn submit<B: Bus, C: MacClient>(
        &mut self,
        rcp: &mut Rcp<B>,
        neigh_table: &NeighborTable,
        req: &DataReq,
        ies: &IeList,
        client: &mut C,
    ) {
        self.submit_kind(
            rcp,
            neigh_table,
            req,
            ies,
            FrameKind::from_fhss(req.fhss_type),
            client,
        )
    }

    fn submit_kind<B: Bus, C: MacClient>(
        &mut self,
        rcp: &mut Rcp<B>,
        neigh_table: &NeighborTable,
        req: &DataReq,
        ies: &IeList,
        kind: FrameKind,
        client: &mut C,
    ) {
        assert!(
            !(req.tx_ack_req && req.fhss_type == FhssType::Async),
            "ack request on an async frame"
        );
        if req.fhss_type.is_unicast() {
            assert!(req.dst.is_some(), "unicast without destination");
        } else {
            assert!(req.dst.is_none(), "destination on broadcast/async frame");
        }
        assert!(ies.payload.len() <= 2, "too many payload IE vectors");
        assert!(
            req.security == SecurityLevel::None || req.key_index != 0,
            "secured frame without key index"
        );

        let neighbor = req.dst.as_ref().and_then(|dst| neigh_table.get(dst));
        if req.dst.is_some() && neighbor.is_none() {
            warn!("neighbor timeout before packet send");
            self.confirm_fail(client, kind, req.dst);
            return;
        }

        let seqno = if req.seqno_suppressed {
            None
        } else {
            let seqno = self.seqno;
            self.seqno = self.seqno.wrapping_add(1);
            Some(seqno)
        };
        let hdr = Header {
            frame_type: FrameType::Data,
            ack_req: req.tx_ack_req,
            pan_id: if req.dst.is_some() {
                None
            } else {
                Some(self.pan_id)
            },
            dst: req.dst.unwrap_or(Eui64::BROADCAST),
            src: self.eui64,
            seqno,
            security: req.security,
            key_index: req.key_index,
            frame_counter: 0,
        };
        let frame = match ieee802154::encode(&hdr, ies.header, ies.payload) {
            Ok(frame) => frame,
            Err(err) => {
                // Oversized assemblies only; surfaced as a local failure.
                warn!("tx frame assembly: {}", err);
                self.confirm_fail(client, kind, req.dst);
                return;
            }
        };

        let handle = self.alloc_handle();
        let counters = neighbor.map(frame_counters_min);
        rcp.req_data_tx(
            &frame,
            handle,
            req.fhss_type,
            neighbor.map(|n| &n.fhss_data_unsecured),
            counters.as_ref(),
            req.rate_list,
            req.ms_mode,
        )
        .unwrap_or_else(|err| warn!("rcp tx: {}", err));

        let now = timer::now_ms();
        self.frame_ctxs.push(FrameCtx {
            handle,
            kind,
            dst: req.dst,
            timestamp_ms: now,
        });
        self.pcap_write(now * 1000, &frame);
    }

    /// Authenticated-path transmit: wraps an EAPOL PDU in an MPX-IE
    /// under the KMP multiplex id. Shares the data path's context table
    /// and short-circuit behavior.
    pub fn send_eapol<B: Bus, C: MacClient>(
        &mut self,
        rcp: &mut Rcp<B>,
        neigh_table: &NeighborTable,
        kmp_id: u8,
        pdu: &[u8],
        dst: &Eui64,
        client: &mut C,
    ) {
        let utt = utt_ie(WsFrameType::Eapol);
        let mut mpx = Vec::with_capacity(3 + 1 + pdu.len());
        mpx.push(0); // transaction control: full frame
        mpx.extend_from_slice(&MPX_ID_KMP.to_le_bytes());
        mpx.push(kmp_id);
        mpx.extend_from_slice(pdu);
        let mpx_ie = payload_ie(IE_GROUP_MPX, &mpx);
        let req = DataReq {
            tx_ack_req: true,
            fhss_type: FhssType::FfnUc,
            dst: Some(*dst),
            seqno_suppressed: true,
            security: SecurityLevel::None,
            key_index: 0,
            rate_list: None,
            ms_mode: ModeSwitchType::Phy,
        };
        let payload = [mpx_ie.as_slice()];
        let ies = IeList {
            header: &utt,
            payload: &payload,
        };
        self.submit_kind(rcp, neigh_table, &req, &ies, FrameKind::Eapol, client);
    }

    /// PAN advertisement solicit, sent on the async schedule.
    pub fn send_pas<B: Bus, C: MacClient>(
        &mut self,
        rcp: &mut Rcp<B>,
        neigh_table: &NeighborTable,
        netname: &str,
        client: &mut C,
    ) {
        self.send_async_solicit(rcp, neigh_table, WsFrameType::PanAdvertSolicit, netname, client)
    }

    /// PAN configuration solicit, sent on the async schedule.
    pub fn send_pcs<B: Bus, C: MacClient>(
        &mut self,
        rcp: &mut Rcp<B>,
        neigh_table: &NeighborTable,
        netname: &str,
        client: &mut C,
    ) {
        self.send_async_solicit(rcp, neigh_table, WsFrameType::PanConfigSolicit, netname, client)
    }

    fn send_async_solicit<B: Bus, C: MacClient>(
        &mut self,
        rcp: &mut Rcp<B>,
        neigh_table: &NeighborTable,
        frame_type: WsFrameType,
        netname: &str,
        client: &mut C,
    ) {
        let utt = utt_ie(frame_type);
        let netname_ie = wp_nested_ie(WP_SUB_NETNAME, netname.as_bytes());
        let wp = payload_ie(IE_GROUP_WP, &netname_ie);
        let req = DataReq {
            tx_ack_req: false,
            fhss_type: FhssType::Async,
            dst: None,
            seqno_suppressed: true,
            security: SecurityLevel::None,
            key_index: 0,
            rate_list: None,
            ms_mode: ModeSwitchType::Phy,
        };
        let payload = [wp.as_slice()];
        let ies = IeList {
            header: &utt,
            payload: &payload,
        };
        self.submit(rcp, neigh_table, &req, &ies, client);
    }

    /// Routes a transmit confirmation to the upper MAC, parsing the ack
    /// frame when one rode along.
    pub fn recv_cnf<C: MacClient>(&mut self, cnf: &TxCnf, client: &mut C) {
        let Some(idx) = self.frame_ctxs.iter().position(|c| c.handle == cnf.handle) else {
            warn!("unexpected confirmation for handle {}", cnf.handle);
            return;
        };
        let ctx = self.frame_ctxs.swap_remove(idx);

        let ack = if cnf.frame.is_empty() {
            None
        } else {
            match ieee802154::decode(&cnf.frame, self.pan_id) {
                Ok(parsed) => {
                    self.pcap_write(cnf.timestamp_us, &cnf.frame);
                    Some(parsed)
                }
                Err(err) => {
                    warn!("invalid ack frame: {}", err);
                    None
                }
            }
        };
        client.confirm(cnf, &ctx, ack.as_ref());
    }

    /// Routes a receive indication. A frame that does not parse is
    /// dropped here; a drop is a drop, never an upper-layer callback.
    pub fn recv_ind<C: MacClient>(&mut self, ind: &RxInd, client: &mut C) {
        let parsed = match ieee802154::decode(&ind.frame, self.pan_id) {
            Ok(parsed) => parsed,
            Err(err) => {
                trace!("drop {:9}: {}", "15.4", err);
                self.rx_drop_count += 1;
                return;
            }
        };
        self.pcap_write(ind.timestamp_us, &ind.frame);

        for ie in PayloadIeIter::new(parsed.ie_payload) {
            if ie.group_id == IE_GROUP_MPX {
                if let Some((MPX_ID_KMP, kmp_frame)) = mpx_parse(ie.content) {
                    if kmp_frame.is_empty() {
                        trace!("drop {:9}: empty kmp frame", "15.4");
                        self.rx_drop_count += 1;
                        return;
                    }
                    client.eapol_ind(&parsed.hdr.src, kmp_frame[0], &kmp_frame[1..]);
                    return;
                }
            }
        }
        client.indication(ind, &parsed);
    }

    /// Declares contexts older than [`FRAME_CTX_TIMEOUT_MS`] lost,
    /// synthesizing their confirm. A confirmation from the RCP arriving
    /// later finds no context and is dropped.
    pub fn expire_frame_ctxs<C: MacClient>(&mut self, now_ms: u64, client: &mut C) {
        loop {
            let Some(idx) = self
                .frame_ctxs
                .iter()
                .position(|c| now_ms.saturating_sub(c.timestamp_ms) > FRAME_CTX_TIMEOUT_MS)
            else {
                return;
            };
            let ctx = self.frame_ctxs.swap_remove(idx);
            warn!("no confirmation for handle {}, dropping", ctx.handle);
            let cnf = TxCnf {
                handle: ctx.handle,
                status: HifStatus::TimedOut,
                frame: Vec::new(),
                timestamp_us: 0,
            };
            client.confirm(&cnf, &ctx, None);
        }
    }
}

fn frame_counters_min(neighbor: &Neighbor) -> [u32; GTK_NUM] {
    let mut counters = [0; GTK_NUM];
    for (out, entry) in counters.iter_mut().zip(neighbor.frame_counter_min.iter()) {
        if entry.set {
            *out = entry.counter;
        }
    }
    counters
}

/// UTT header IE: sub-id, frame type, and the 3-byte UFSI the RCP fills
/// at transmit time.
pub fn utt_ie(frame_type: WsFrameType) -> Vec<u8> {
    header_ie(IE_ID_WH, &[WH_SUB_UTT, frame_type as u8, 0, 0, 0])
}

/// Short-format nested IE inside a WP payload IE.
pub fn wp_nested_ie(sub_id: u8, content: &[u8]) -> Vec<u8> {
    debug_assert!(content.len() <= 0xff);
    let descr = content.len() as u16 | (sub_id as u16) << 8;
    let mut ie = Vec::with_capacity(2 + content.len());
    ie.extend_from_slice(&descr.to_le_bytes());
    ie.extend_from_slice(content);
    ie
}

/// Splits an MPX-IE into its multiplex id and frame. Only full-frame
/// transfers (transaction control 0) are supported.
pub fn mpx_parse(content: &[u8]) -> Option<(u16, &[u8])> {
    if content.len() < 3 || content[0] & 0x07 != 0 {
        return None;
    }
    let multiplex_id = u16::from_le_bytes([content[1], content[2]]);
    Some((multiplex_id, &content[3..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hif::version;
    use crate::neighbor::NodeRole;
    use crate::rcp::testing::{radio_list_cnf, reset_ind, FakeBus};
    use crate::rcp::RcpEvent;

    #[derive(Default)]
    struct FakeLlc {
        confirms: Vec<(u8, HifStatus, FrameKind)>,
        indications: Vec<Vec<u8>>,
        eapol: Vec<(Eui64, u8, Vec<u8>)>,
    }

    impl MacClient for FakeLlc {
        fn confirm(&mut self, cnf: &TxCnf, ctx: &FrameCtx, _ack: Option<&ParsedFrame>) {
            assert_eq!(cnf.handle, ctx.handle);
            self.confirms.push((cnf.handle, cnf.status, ctx.kind));
        }

        fn indication(&mut self, _ind: &RxInd, frame: &ParsedFrame) {
            self.indications.push(frame.payload.to_vec());
        }

        fn eapol_ind(&mut self, src: &Eui64, kmp_id: u8, pdu: &[u8]) {
            self.eapol.push((*src, kmp_id, pdu.to_vec()));
        }
    }

    fn ready_rcp() -> Rcp<FakeBus> {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.req_reset().unwrap();
        rcp.bus_mut()
            .to_host
            .push_back(reset_ind(version(2, 0, 0), 0, "RCP", [2, 0, 0, 0, 0, 0, 0, 1]));
        assert!(matches!(rcp.rx().unwrap(), Some(RcpEvent::Reset)));
        rcp.bus_mut().to_host.push_back(radio_list_cnf(false, &[]));
        assert!(matches!(rcp.rx().unwrap(), Some(RcpEvent::RadioListReady)));
        rcp.bus_mut().from_host.clear();
        rcp
    }

    fn ws() -> WsCtx {
        let mut ws = WsCtx::new();
        ws.pan_id = 0x1234;
        ws.eui64 = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        ws
    }

    fn peer() -> Eui64 {
        Eui64([2, 0, 0, 0, 0, 0, 0, 0xaa])
    }

    fn unicast_req() -> DataReq<'static> {
        DataReq {
            tx_ack_req: true,
            fhss_type: FhssType::FfnUc,
            dst: Some(peer()),
            seqno_suppressed: true,
            security: SecurityLevel::EncMic64,
            key_index: 1,
            rate_list: None,
            ms_mode: ModeSwitchType::Phy,
        }
    }

    #[test]
    fn unknown_unicast_short_circuits() {
        let mut rcp = ready_rcp();
        let mut ws = ws();
        let table = NeighborTable::new(600);
        let mut llc = FakeLlc::default();
        let hie = header_ie(IE_ID_WH, &[1]);
        let ies = IeList {
            header: &hie,
            payload: &[],
        };

        ws.submit(&mut rcp, &table, &unicast_req(), &ies, &mut llc);

        // Exactly one synthesized confirm; the RCP saw no transmit.
        assert_eq!(llc.confirms.len(), 1);
        let (handle, status, kind) = llc.confirms[0];
        assert_eq!(handle, 0);
        assert_eq!(status, HifStatus::TimedOut);
        assert_eq!(kind, FrameKind::UnicastFfn);
        assert!(rcp.bus_mut().from_host.is_empty());
        assert_eq!(ws.frame_ctx_count(), 0);
    }

    #[test]
    fn submit_and_confirm() {
        let mut rcp = ready_rcp();
        let mut ws = ws();
        let mut table = NeighborTable::new(600);
        table.add(peer(), NodeRole::Ffn, 0);
        let mut llc = FakeLlc::default();
        let hie = utt_ie(WsFrameType::Data);
        let pie = payload_ie(IE_GROUP_WP, &[1, 2]);
        let payload = [pie.as_slice()];
        let ies = IeList {
            header: &hie,
            payload: &payload,
        };

        ws.submit(&mut rcp, &table, &unicast_req(), &ies, &mut llc);
        assert_eq!(ws.frame_ctx_count(), 1);
        assert_eq!(rcp.bus_mut().from_host.len(), 1);
        assert_eq!(rcp.bus_mut().from_host[0][0], crate::hif::HifCmd::ReqDataTx as u8);
        assert!(llc.confirms.is_empty());

        let cnf = TxCnf {
            handle: rcp.bus_mut().from_host[0][1],
            status: HifStatus::Success,
            frame: Vec::new(),
            timestamp_us: 10,
        };
        ws.recv_cnf(&cnf, &mut llc);
        assert_eq!(llc.confirms.len(), 1);
        assert_eq!(llc.confirms[0].1, HifStatus::Success);
        assert_eq!(ws.frame_ctx_count(), 0);

        // A duplicate confirmation finds no context.
        ws.recv_cnf(&cnf, &mut llc);
        assert_eq!(llc.confirms.len(), 1);
    }

    #[test]
    fn context_timeout_synthesizes_confirm() {
        let mut rcp = ready_rcp();
        let mut ws = ws();
        let mut table = NeighborTable::new(600);
        table.add(peer(), NodeRole::Ffn, 0);
        let mut llc = FakeLlc::default();
        let hie = utt_ie(WsFrameType::Data);
        let ies = IeList {
            header: &hie,
            payload: &[],
        };
        ws.submit(&mut rcp, &table, &unicast_req(), &ies, &mut llc);

        let later = timer::now_ms() + FRAME_CTX_TIMEOUT_MS + 1;
        ws.expire_frame_ctxs(later, &mut llc);
        assert_eq!(llc.confirms.len(), 1);
        assert_eq!(llc.confirms[0].1, HifStatus::TimedOut);
        assert_eq!(ws.frame_ctx_count(), 0);
    }

    #[test]
    fn eapol_ind_demux() {
        let mut ws = ws();
        let mut llc = FakeLlc::default();

        let hdr = Header {
            frame_type: FrameType::Data,
            ack_req: true,
            pan_id: None,
            dst: ws.eui64,
            src: peer(),
            seqno: None,
            security: SecurityLevel::None,
            key_index: 0,
            frame_counter: 0,
        };
        let utt = utt_ie(WsFrameType::Eapol);
        let mut mpx = vec![0];
        mpx.extend_from_slice(&MPX_ID_KMP.to_le_bytes());
        mpx.push(crate::eapol::KMP_ID_8021X);
        mpx.extend_from_slice(&[3, 0, 0, 0]);
        let mpx_ie = payload_ie(IE_GROUP_MPX, &mpx);
        let frame = ieee802154::encode(&hdr, &utt, &[&mpx_ie]).unwrap();

        let ind = RxInd {
            frame,
            timestamp_us: 1,
            channel: 0,
            rssi_dbm: -60,
            lqi: 255,
        };
        ws.recv_ind(&ind, &mut llc);
        assert!(llc.indications.is_empty());
        assert_eq!(llc.eapol.len(), 1);
        let (src, kmp_id, pdu) = &llc.eapol[0];
        assert_eq!(*src, peer());
        assert_eq!(*kmp_id, crate::eapol::KMP_ID_8021X);
        assert_eq!(pdu, &[3, 0, 0, 0]);
    }

    #[test]
    fn malformed_ind_dropped_without_callback() {
        let mut ws = ws();
        let mut llc = FakeLlc::default();
        let ind = RxInd {
            frame: vec![0x01],
            timestamp_us: 1,
            channel: 0,
            rssi_dbm: -60,
            lqi: 255,
        };
        ws.recv_ind(&ind, &mut llc);
        assert!(llc.indications.is_empty());
        assert!(llc.eapol.is_empty());
        assert_eq!(ws.rx_drop_count, 1);
    }

    #[test]
    #[should_panic(expected = "ack request on an async frame")]
    fn ack_on_async_is_programmer_error() {
        let mut rcp = ready_rcp();
        let mut ws = ws();
        let table = NeighborTable::new(600);
        let mut llc = FakeLlc::default();
        let req = DataReq {
            tx_ack_req: true,
            fhss_type: FhssType::Async,
            dst: None,
            seqno_suppressed: true,
            security: SecurityLevel::None,
            key_index: 0,
            rate_list: None,
            ms_mode: ModeSwitchType::Phy,
        };
        let hie = utt_ie(WsFrameType::PanAdvertSolicit);
        let ies = IeList {
            header: &hie,
            payload: &[],
        };
        ws.submit(&mut rcp, &table, &req, &ies, &mut llc);
    }

    #[test]
    fn eapol_send_uses_context_table() {
        let mut rcp = ready_rcp();
        let mut ws = ws();
        let mut table = NeighborTable::new(600);
        table.add(peer(), NodeRole::Ffn, 0);
        let mut llc = FakeLlc::default();

        ws.send_eapol(&mut rcp, &table, crate::eapol::KMP_ID_8021X, &[1, 2], &peer(), &mut llc);
        assert_eq!(ws.frame_ctx_count(), 1);
        assert_eq!(rcp.bus_mut().from_host.len(), 1);

        let cnf = TxCnf {
            handle: rcp.bus_mut().from_host[0][1],
            status: HifStatus::Success,
            frame: Vec::new(),
            timestamp_us: 0,
        };
        ws.recv_cnf(&cnf, &mut llc);
        assert_eq!(llc.confirms.len(), 1);
        assert_eq!(llc.confirms[0].2, FrameKind::Eapol);
    }
}
