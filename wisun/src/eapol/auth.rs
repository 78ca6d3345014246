// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! IEEE 802.1X authenticator.
//!
//! One context per PAN, one supplicant entry per joining node. The
//! authenticator drives the EAP exchange (Identity, then EAP-TLS relayed
//! to a RADIUS upstream when one is configured), retransmits
//! acknowledged EAP packets on a timer, and applies the handshake
//! outputs to the supplicant's key block: PMK write-through, PTK
//! derivation, and the inserted-GTK bookkeeping that the four-way and
//! group key handshakes consume.
//!
//! The internal EAP-TLS server is not implemented; without a RADIUS
//! upstream, EAP responses are dropped with a diagnostic.

use crate::eapol::eap::{self, EapCode, EAP_TYPE_IDENTITY};
use crate::eapol::{self, EapolPacketType, KMP_ID_80211_4WH, KMP_ID_80211_GKH, KMP_ID_8021X};
use crate::net::ieee802154::Eui64;
use crate::security::keys::{self, GtkRing, SecKeys, PMK_LEN};
use crate::timer::{TimerCtxt, TimerGroup};

use log::{debug, trace};

/// Retransmission and lifetime policy.
#[derive(Copy, Clone, Debug)]
pub struct AuthCfg {
    pub rt_timeout_ms: u64,
    /// Doubling backoff instead of a fixed interval.
    pub rt_exponential: bool,
    /// Retry ceiling; exhaustion fails the supplicant.
    pub rt_max: u8,
    pub pmk_lifetime_s: u32,
    pub ptk_lifetime_s: u32,
}

impl Default for AuthCfg {
    fn default() -> AuthCfg {
        AuthCfg {
            rt_timeout_ms: 3_000,
            rt_exponential: false,
            rt_max: 3,
            pmk_lifetime_s: 4 * 30 * 24 * 60 * 60,
            ptk_lifetime_s: 2 * 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum EapState {
    #[default]
    Idle,
    IdentityRequested,
    TlsInProgress,
    Success,
    Failure,
}

/// Index into the authenticator's supplicant arena. Doubles as the
/// retransmission timer token.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SuppId(pub usize);

pub struct SuppCtx {
    pub eui64: Eui64,
    pub state: EapState,
    pub keys: SecKeys,
    eap_id: u8,
    rt_count: u8,
    rt_pdu: Vec<u8>,
    rt_kmp_id: u8,
}

impl SuppCtx {
    fn new(eui64: Eui64) -> SuppCtx {
        SuppCtx {
            eui64,
            state: EapState::Idle,
            keys: SecKeys::new(),
            eap_id: 0,
            rt_count: 0,
            rt_pdu: Vec::new(),
            rt_kmp_id: KMP_ID_8021X,
        }
    }
}

/// Authenticated send path the authenticator emits through; the daemon
/// routes this into the MAC bridge's EAPOL transmit path.
pub trait AuthOutput {
    fn send_eapol(&mut self, dst: &Eui64, kmp_id: u8, pdu: &[u8]);
}

/// Upstream AAA server carrying the EAP-TLS conversation.
pub trait RadiusUpstream {
    fn send_eap(&mut self, supp: &Eui64, eap: &[u8]);
}

pub struct AuthCtx {
    pub cfg: AuthCfg,
    pub timer_group: TimerGroup,
    supps: Vec<SuppCtx>,
}

impl AuthCtx {
    pub fn new(cfg: AuthCfg, timer_group: TimerGroup) -> AuthCtx {
        AuthCtx {
            cfg,
            timer_group,
            supps: Vec::new(),
        }
    }

    pub fn supp_get_or_create(&mut self, eui64: Eui64) -> SuppId {
        match self.supps.iter().position(|s| s.eui64 == eui64) {
            Some(idx) => SuppId(idx),
            None => {
                self.supps.push(SuppCtx::new(eui64));
                SuppId(self.supps.len() - 1)
            }
        }
    }

    pub fn supp_by_eui64(&self, eui64: &Eui64) -> Option<SuppId> {
        self.supps.iter().position(|s| s.eui64 == *eui64).map(SuppId)
    }

    pub fn supp(&self, id: SuppId) -> &SuppCtx {
        &self.supps[id.0]
    }

    pub fn supp_mut(&mut self, id: SuppId) -> &mut SuppCtx {
        &mut self.supps[id.0]
    }

    pub fn supps(&self) -> impl Iterator<Item = (SuppId, &SuppCtx)> {
        self.supps.iter().enumerate().map(|(i, s)| (SuppId(i), s))
    }

    pub fn supps_mut(&mut self) -> impl Iterator<Item = (SuppId, &mut SuppCtx)> {
        self.supps
            .iter_mut()
            .enumerate()
            .map(|(i, s)| (SuppId(i), s))
    }

    /// Sends an EAP packet wrapped in EAPOL. Acknowledged codes arm the
    /// retransmission timer; Success and Failure are sent exactly once.
    fn send_eap(
        &mut self,
        timers: &mut TimerCtxt,
        out: &mut impl AuthOutput,
        id: SuppId,
        packet: Vec<u8>,
    ) {
        let (hdr, _) = match eap::parse_packet(&packet).done() {
            Some((_, parsed)) => parsed,
            None => unreachable!("locally built EAP packet"),
        };
        let supp = &mut self.supps[id.0];
        supp.eap_id = hdr.identifier;
        trace!("tx-eap {:?} id={} to {}", hdr.code, hdr.identifier, supp.eui64);

        let pdu = eapol::write_pdu(EapolPacketType::Eap, &packet);
        out.send_eapol(&supp.eui64, KMP_ID_8021X, &pdu);

        if hdr.code.is_acknowledged() {
            supp.rt_pdu = pdu;
            supp.rt_kmp_id = KMP_ID_8021X;
            supp.rt_count = 0;
            timers.start_rel(self.timer_group, id.0 as u64, self.cfg.rt_timeout_ms);
        }
    }

    /// Starts (or restarts) the EAP exchange with a Request/Identity.
    pub fn send_request_identity(
        &mut self,
        timers: &mut TimerCtxt,
        out: &mut impl AuthOutput,
        id: SuppId,
    ) {
        let supp = &mut self.supps[id.0];
        supp.eap_id = 0;
        supp.state = EapState::IdentityRequested;
        let eap_id = supp.eap_id + 1;
        let packet = eap::write_packet(EapCode::Request, eap_id, Some(EAP_TYPE_IDENTITY), &[]);
        self.send_eap(timers, out, id, packet);
    }

    pub fn send_failure(&mut self, timers: &mut TimerCtxt, out: &mut impl AuthOutput, id: SuppId) {
        let supp = &mut self.supps[id.0];
        supp.state = EapState::Failure;
        let packet = eap::write_packet(EapCode::Failure, supp.eap_id.wrapping_add(1), None, &[]);
        self.send_eap(timers, out, id, packet);
    }

    /// Relays an EAP Success from the AAA exchange and installs the PMK
    /// it produced.
    pub fn eap_success(
        &mut self,
        timers: &mut TimerCtxt,
        out: &mut impl AuthOutput,
        id: SuppId,
        pmk: &[u8; PMK_LEN],
    ) {
        let pmk_lifetime_s = self.cfg.pmk_lifetime_s;
        let supp = &mut self.supps[id.0];
        supp.state = EapState::Success;
        supp.keys.pmk_write(pmk, pmk_lifetime_s);
        let packet = eap::write_packet(EapCode::Success, supp.eap_id.wrapping_add(1), None, &[]);
        self.send_eap(timers, out, id, packet);
    }

    /// Handles an EAPOL PDU received from the supplicant.
    pub fn recv_eapol(
        &mut self,
        timers: &mut TimerCtxt,
        out: &mut impl AuthOutput,
        radius: Option<&mut dyn RadiusUpstream>,
        eui64: Eui64,
        kmp_id: u8,
        pdu: &[u8],
    ) {
        match kmp_id {
            KMP_ID_8021X => (),
            // The four-way and group key handshakes ride these ids; their
            // message codecs are not implemented.
            KMP_ID_80211_4WH | KMP_ID_80211_GKH => {
                trace!("drop {:9}: kmp id {} support disabled", "eapol", kmp_id);
                return;
            }
            _ => {
                trace!("drop {:9}: unknown kmp id {}", "eapol", kmp_id);
                return;
            }
        }
        let body = match eapol::parse_pdu(pdu).done() {
            Some((_, (EapolPacketType::Eap, body))) => body,
            Some((_, (EapolPacketType::Start, _))) => {
                // A (re)joining supplicant kicks the exchange off.
                let id = self.supp_get_or_create(eui64);
                self.send_request_identity(timers, out, id);
                return;
            }
            Some((_, (packet_type, _))) => {
                trace!("drop {:9}: unsupported packet type {:?}", "eapol", packet_type);
                return;
            }
            None => {
                trace!("drop {:9}: malformed packet", "eapol");
                return;
            }
        };
        let id = self.supp_get_or_create(eui64);
        self.recv_eap(timers, out, radius, id, body);
    }

    /// Handles the EAP payload of an EAPOL-EAP PDU.
    pub fn recv_eap(
        &mut self,
        timers: &mut TimerCtxt,
        _out: &mut impl AuthOutput,
        radius: Option<&mut dyn RadiusUpstream>,
        id: SuppId,
        buf: &[u8],
    ) {
        let (hdr, _) = match eap::parse_packet(buf).done() {
            Some((_, parsed)) => parsed,
            None => {
                trace!("drop {:9}: malformed packet", "eap");
                return;
            }
        };
        let supp = &mut self.supps[id.0];
        if hdr.identifier != supp.eap_id {
            trace!("drop {:9}: invalid identifier", "eap");
            return;
        }
        trace!("rx-eap {:?} id={} from {}", hdr.code, hdr.identifier, supp.eui64);

        timers.stop(self.timer_group, id.0 as u64);

        match radius {
            Some(upstream) => {
                supp.state = EapState::TlsInProgress;
                upstream.send_eap(&supp.eui64, buf);
            }
            // TODO: internal EAP-TLS implementation without RADIUS
            None => trace!("drop {:9}: support disabled", "eap"),
        }
    }

    /// Retransmission timer expiry for the supplicant `token`.
    pub fn rt_timeout(&mut self, timers: &mut TimerCtxt, out: &mut impl AuthOutput, token: u64) {
        let id = SuppId(token as usize);
        let supp = &mut self.supps[id.0];
        supp.rt_count += 1;
        if supp.rt_count > self.cfg.rt_max {
            debug!("eap: {} unresponsive, failing", supp.eui64);
            supp.rt_pdu.clear();
            timers.stop(self.timer_group, token);
            self.send_failure(timers, out, id);
            return;
        }
        trace!("tx-eap retry {}/{} to {}", supp.rt_count, self.cfg.rt_max, supp.eui64);
        let delay = if self.cfg.rt_exponential {
            self.cfg.rt_timeout_ms << supp.rt_count
        } else {
            self.cfg.rt_timeout_ms
        };
        out.send_eapol(&supp.eui64, supp.rt_kmp_id, &supp.rt_pdu);
        timers.start_rel(self.timer_group, token, delay);
    }

    /// Derives and installs the PTK for a supplicant from the four-way
    /// handshake nonces.
    pub fn ptk_establish(
        &mut self,
        id: SuppId,
        local_eui64: &Eui64,
        local_nonce: &[u8; 32],
        remote_nonce: &[u8; 32],
    ) -> bool {
        let ptk_lifetime_s = self.cfg.ptk_lifetime_s;
        let supp = &mut self.supps[id.0];
        let remote = supp.eui64;
        let Some(pmk) = supp.keys.pmk_get() else {
            return false;
        };
        let ptk = keys::derive_ptk(pmk, local_eui64, &remote, local_nonce, remote_nonce);
        supp.keys.ptk_write(&ptk, ptk_lifetime_s);
        supp.keys.ptk_eui64_write(remote);
        true
    }

    /// Selects the next GTK for this supplicant and records its hash
    /// prefix as inserted under the current PTK.
    pub fn gtk_insert(&mut self, id: SuppId, ring: &GtkRing, index: usize, is_4wh: bool) -> bool {
        let supp = &mut self.supps[id.0];
        if supp.keys.gtks.insert_index_set(index).is_err() {
            return false;
        }
        supp.keys.gtks.ins_gtk_hash_set(ring, is_4wh);
        supp.keys.gtks.gtkl_from_insert_index_set();
        supp.keys.gtks.insert_index_clear();
        true
    }

    /// One-second lifetime tick over every supplicant key block.
    pub fn tick_lifetimes(&mut self, seconds: u32) {
        for supp in self.supps.iter_mut() {
            if supp.keys.pmk_lifetime_decrement(seconds) {
                debug!("eap: {} pmk expired", supp.eui64);
                supp.state = EapState::Idle;
            } else if supp.keys.ptk_lifetime_decrement(seconds) {
                debug!("eap: {} ptk expired", supp.eui64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keys::{gtk_hash, GTK_LEN, INS_GTK_HASH_LEN};

    #[derive(Default)]
    struct FakeOutput {
        sent: Vec<(Eui64, u8, Vec<u8>)>,
    }

    impl AuthOutput for FakeOutput {
        fn send_eapol(&mut self, dst: &Eui64, kmp_id: u8, pdu: &[u8]) {
            self.sent.push((*dst, kmp_id, pdu.to_vec()));
        }
    }

    #[derive(Default)]
    struct FakeRadius {
        forwarded: Vec<Vec<u8>>,
    }

    impl RadiusUpstream for FakeRadius {
        fn send_eap(&mut self, _supp: &Eui64, eap: &[u8]) {
            self.forwarded.push(eap.to_vec());
        }
    }

    fn supp_eui() -> Eui64 {
        Eui64([2, 0, 0, 0, 0, 0, 0, 2])
    }

    fn setup() -> (AuthCtx, TimerCtxt, FakeOutput) {
        let mut timers = TimerCtxt::new().unwrap();
        let group = timers.group();
        (AuthCtx::new(AuthCfg::default(), group), timers, FakeOutput::default())
    }

    #[test]
    fn request_identity_arms_retransmission() {
        let (mut auth, mut timers, mut out) = setup();
        let id = auth.supp_get_or_create(supp_eui());
        auth.send_request_identity(&mut timers, &mut out, id);

        assert_eq!(auth.supp(id).state, EapState::IdentityRequested);
        assert_eq!(out.sent.len(), 1);
        let (dst, kmp_id, pdu) = &out.sent[0];
        assert_eq!(*dst, supp_eui());
        assert_eq!(*kmp_id, KMP_ID_8021X);
        // EAPOL header, then EAP Request/Identity with id 1.
        assert_eq!(pdu[4..], [1, 1, 0, 5, EAP_TYPE_IDENTITY]);
        assert!(timers.is_armed(auth.timer_group, id.0 as u64));
    }

    #[test]
    fn failure_is_not_retransmitted() {
        let (mut auth, mut timers, mut out) = setup();
        let id = auth.supp_get_or_create(supp_eui());
        auth.send_failure(&mut timers, &mut out, id);
        assert_eq!(auth.supp(id).state, EapState::Failure);
        assert_eq!(out.sent.len(), 1);
        assert!(!timers.is_armed(auth.timer_group, id.0 as u64));
    }

    #[test]
    fn response_cancels_timer_and_feeds_radius() {
        let (mut auth, mut timers, mut out) = setup();
        let mut radius = FakeRadius::default();
        let id = auth.supp_get_or_create(supp_eui());
        auth.send_request_identity(&mut timers, &mut out, id);

        let response = eap::write_packet(EapCode::Response, 1, Some(EAP_TYPE_IDENTITY), b"node");
        let pdu = eapol::write_pdu(EapolPacketType::Eap, &response);
        auth.recv_eapol(
            &mut timers,
            &mut out,
            Some(&mut radius),
            supp_eui(),
            KMP_ID_8021X,
            &pdu,
        );

        assert!(!timers.is_armed(auth.timer_group, id.0 as u64));
        assert_eq!(auth.supp(id).state, EapState::TlsInProgress);
        assert_eq!(radius.forwarded.len(), 1);
        assert_eq!(radius.forwarded[0], response);
    }

    #[test]
    fn key_handshake_kmp_ids_dropped() {
        let (mut auth, mut timers, mut out) = setup();
        let pdu = eapol::write_pdu(EapolPacketType::Key, &[0; 4]);
        for kmp_id in [KMP_ID_80211_4WH, KMP_ID_80211_GKH, 0x42] {
            auth.recv_eapol(&mut timers, &mut out, None, supp_eui(), kmp_id, &pdu);
        }
        // Nothing sent, no supplicant state created.
        assert!(out.sent.is_empty());
        assert!(auth.supp_by_eui64(&supp_eui()).is_none());
    }

    #[test]
    fn mismatched_identifier_dropped_silently() {
        let (mut auth, mut timers, mut out) = setup();
        let mut radius = FakeRadius::default();
        let id = auth.supp_get_or_create(supp_eui());
        auth.send_request_identity(&mut timers, &mut out, id);

        let response = eap::write_packet(EapCode::Response, 9, Some(EAP_TYPE_IDENTITY), b"node");
        let pdu = eapol::write_pdu(EapolPacketType::Eap, &response);
        auth.recv_eapol(
            &mut timers,
            &mut out,
            Some(&mut radius),
            supp_eui(),
            KMP_ID_8021X,
            &pdu,
        );

        // Timer stays armed, nothing reaches RADIUS.
        assert!(timers.is_armed(auth.timer_group, id.0 as u64));
        assert!(radius.forwarded.is_empty());
    }

    #[test]
    fn retry_exhaustion_fails_supplicant() {
        let (mut auth, mut timers, mut out) = setup();
        let id = auth.supp_get_or_create(supp_eui());
        auth.send_request_identity(&mut timers, &mut out, id);

        for _ in 0..auth.cfg.rt_max {
            auth.rt_timeout(&mut timers, &mut out, id.0 as u64);
        }
        assert_eq!(auth.supp(id).state, EapState::IdentityRequested);
        auth.rt_timeout(&mut timers, &mut out, id.0 as u64);
        assert_eq!(auth.supp(id).state, EapState::Failure);
        // Initial request, rt_max retries, final failure.
        assert_eq!(out.sent.len(), 1 + auth.cfg.rt_max as usize + 1);
        assert!(!timers.is_armed(auth.timer_group, id.0 as u64));
    }

    #[test]
    fn join_sequence_installs_keys() {
        let (mut auth, mut timers, mut out) = setup();
        let mut radius = FakeRadius::default();
        let local = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        let id = auth.supp_get_or_create(supp_eui());

        auth.send_request_identity(&mut timers, &mut out, id);
        let response = eap::write_packet(EapCode::Response, 1, Some(EAP_TYPE_IDENTITY), b"node");
        let pdu = eapol::write_pdu(EapolPacketType::Eap, &response);
        auth.recv_eapol(&mut timers, &mut out, Some(&mut radius), supp_eui(), KMP_ID_8021X, &pdu);

        // RADIUS delivers EAP Success with a PMK.
        let pmk = [0x11; PMK_LEN];
        auth.eap_success(&mut timers, &mut out, id, &pmk);
        assert_eq!(auth.supp(id).state, EapState::Success);
        assert_eq!(auth.supp(id).keys.pmk_get(), Some(&pmk));

        assert!(auth.ptk_establish(id, &local, &[1; 32], &[2; 32]));
        assert_eq!(auth.supp(id).keys.ptk_eui64_get(), Some(&supp_eui()));

        // Four-way handshake installs the GTK at index 2.
        let mut ring = GtkRing::new_gtk();
        let gtk = [0x77; GTK_LEN];
        ring.gtk_set(2, &gtk, 1000).unwrap();
        assert!(auth.gtk_insert(id, &ring, 2, true));
        let supp = auth.supp(id);
        assert!(supp.keys.gtks.gtk_is_live(2));
        assert_eq!(
            supp.keys.gtks.ins_gtk_hash[2],
            gtk_hash(&gtk)[..INS_GTK_HASH_LEN]
        );
        assert_eq!(ring.hash_generate()[2], gtk_hash(&gtk));
    }
}
