// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Wi-SUN border router daemon.
//!
//! Single-threaded: one `poll(2)` loop multiplexes the RCP bus, the
//! timer wheel and the TUN device, and every handler runs to
//! completion. The daemon owns the authenticator and the GTK rings;
//! routers join through EAPOL and receive group keys from here.
//!
//! Exit codes: 1 configuration error, 2 I/O or system error, 3 RCP
//! incompatibility or unsupported runtime event.

mod config;

use clap::Parser;
use log::{debug, info, warn};

use wisun::eapol::auth::{AuthCfg, AuthCtx, AuthOutput};
use wisun::hif::{self, FhssType, HifStatus, ModeSwitchType};
use wisun::mac::{
    mpx_parse, utt_ie, DataReq, FrameCtx, FrameKind, IeList, MacClient, WsCtx, WsFrameType,
    MPX_ID_6LOWPAN,
};
use wisun::neighbor::{NeighborTable, NodeRole};
use wisun::net::ieee802154::{payload_ie, Eui64, ParsedFrame, PayloadIeIter, SecurityLevel, IE_GROUP_MPX};
use wisun::pcapng::PcapngWriter;
use wisun::rcp::{Rcp, RcpError, RcpEvent, RxInd, TxCnf, UartBus};
use wisun::security::keys::{self, GtkRing, GTK_DEFAULT_LIFETIME};
use wisun::security::storage::{self, StorageRecord};
use wisun::timer::{self, TimerCtxt, TimerGroup};
use wisun::tun::Tun;

use std::fmt::Display;
use std::process::exit;

const EXIT_CONFIG: i32 = 1;
const EXIT_SYSTEM: i32 = 2;
const EXIT_RCP: i32 = 3;

const HOST_API_VERSION: u32 = hif::version(2, 0, 0);

/// Index the GAK occupies in the RCP key table.
const GAK_KEY_INDEX: u8 = 1;

/// 6LoWPAN dispatch: uncompressed IPv6.
const LOWPAN_DISPATCH_IPV6: u8 = 0x41;

const NEIGHBOR_TTL_S: u32 = 30 * 60;
const ASYNC_FRAG_DURATION_MS: u32 = 500;

const TICK_TOKEN: u64 = 0;

fn fatal(code: i32, msg: impl Display) -> ! {
    log::error!("{}", msg);
    exit(code);
}

/// Upper-MAC events buffered during a bridge callback and processed
/// once the bridge call has returned, keeping every entry point
/// run-to-completion.
#[derive(Default)]
struct LlcSink {
    eapol: Vec<(Eui64, u8, Vec<u8>)>,
    ipv6: Vec<Vec<u8>>,
    /// Sources of authenticated frames, for neighbor liveness.
    sources: Vec<Eui64>,
    confirms: Vec<(u8, HifStatus, FrameKind)>,
}

impl MacClient for LlcSink {
    fn confirm(&mut self, cnf: &TxCnf, ctx: &FrameCtx, _ack: Option<&ParsedFrame>) {
        self.confirms.push((cnf.handle, cnf.status, ctx.kind));
    }

    fn indication(&mut self, _ind: &RxInd, frame: &ParsedFrame) {
        if frame.hdr.security != SecurityLevel::None {
            self.sources.push(frame.hdr.src);
        }
        for ie in PayloadIeIter::new(frame.ie_payload) {
            if ie.group_id != IE_GROUP_MPX {
                continue;
            }
            if let Some((MPX_ID_6LOWPAN, lowpan)) = mpx_parse(ie.content) {
                if lowpan.first() == Some(&LOWPAN_DISPATCH_IPV6) {
                    self.ipv6.push(lowpan[1..].to_vec());
                }
            }
        }
    }

    fn eapol_ind(&mut self, src: &Eui64, kmp_id: u8, pdu: &[u8]) {
        self.eapol.push((*src, kmp_id, pdu.to_vec()));
    }
}

#[derive(Default)]
struct EapolOut {
    sent: Vec<(Eui64, u8, Vec<u8>)>,
}

impl AuthOutput for EapolOut {
    fn send_eapol(&mut self, dst: &Eui64, kmp_id: u8, pdu: &[u8]) {
        self.sent.push((*dst, kmp_id, pdu.to_vec()));
    }
}

struct Wsbrd {
    config: config::Config,
    rcp: Rcp<UartBus>,
    ws: WsCtx,
    neigh: NeighborTable,
    timers: TimerCtxt,
    tick_group: TimerGroup,
    auth: AuthCtx,
    gtks: GtkRing,
    lgtks: GtkRing,
    tun: Tun,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = config::Config::parse();

    info!("Wi-SUN border router");

    let mut timers = match TimerCtxt::new() {
        Ok(timers) => timers,
        Err(err) => fatal(EXIT_SYSTEM, format_args!("timerfd: {}", err)),
    };
    let tick_group = timers.group();
    let auth_group = timers.group();

    let rcp = init_rcp(&config);
    let tun = match Tun::open(&config.tun_device, config.mtu) {
        Ok(tun) => tun,
        Err(err) => fatal(
            EXIT_SYSTEM,
            format_args!("tun {}: {}", config.tun_device, err),
        ),
    };

    let mut daemon = Wsbrd {
        ws: WsCtx::new(),
        neigh: NeighborTable::new(NEIGHBOR_TTL_S),
        auth: AuthCtx::new(AuthCfg::default(), auth_group),
        gtks: GtkRing::new_gtk(),
        lgtks: GtkRing::new_lgtk(),
        config,
        rcp,
        timers,
        tick_group,
        tun,
    };
    daemon.init_radio();
    daemon.init_ws();
    daemon.init_keys();
    daemon.load_key_storage();

    info!("Wi-SUN border router successfully started");
    info!("  HwAddress: {}", daemon.ws.eui64);
    info!("  PanId: {:#06x}", daemon.ws.pan_id);
    for gak in daemon.property_gaks() {
        debug!("  Gak: {}", hex::encode(gak));
    }

    daemon.run()
}

fn init_rcp(config: &config::Config) -> Rcp<UartBus> {
    let bus = match UartBus::open(&config.uart_device, config.uart_baudrate) {
        Ok(bus) => bus,
        Err(err) => fatal(
            EXIT_SYSTEM,
            format_args!("uart {}: {}", config.uart_device, err),
        ),
    };
    let mut rcp = Rcp::new(bus);
    if let Err(err) = rcp.req_reset() {
        fatal(EXIT_SYSTEM, err);
    }

    // Handshake: reset indication, host API publication, then the radio
    // configuration list.
    let mut saw_reset = false;
    let mut saw_rf_list = false;
    while !saw_rf_list {
        if !poll_in(rcp.fd(), 5_000) {
            warn!("RCP is not responding");
            continue;
        }
        loop {
            match rcp.rx() {
                Ok(None) => break,
                Ok(Some(RcpEvent::Reset)) => {
                    saw_reset = true;
                    rcp.set_host_api(HOST_API_VERSION)
                        .and_then(|()| rcp.req_radio_list())
                        .unwrap_or_else(|err| fatal(EXIT_SYSTEM, err));
                }
                Ok(Some(RcpEvent::RadioListReady)) => saw_rf_list = true,
                Ok(Some(event)) => debug!("ignored {:?} during handshake", event),
                Err(err) => fatal_rcp(err),
            }
        }
        if !saw_reset {
            warn!("RCP is not responding (no reset indication)");
        }
    }

    if config.list_rf_configs {
        for rail in &rcp.rail_config_list {
            println!(
                "{:3} chan0_freq:{:9} chan_spacing:{:6} chan_count:{:3} phy_mode_id:{:#04x}",
                rail.index, rail.chan0_freq, rail.chan_spacing, rail.chan_count,
                rail.rail_phy_mode_id
            );
        }
        exit(0);
    }
    rcp
}

fn fatal_rcp(err: RcpError) -> ! {
    match err {
        RcpError::Io(err) => fatal(EXIT_SYSTEM, err),
        other => fatal(EXIT_RCP, other),
    }
}

fn poll_in(fd: std::os::unix::io::RawFd, timeout_ms: i32) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pfd is a valid pollfd array of length 1.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return false;
        }
        fatal(EXIT_SYSTEM, format_args!("poll: {}", err));
    }
    ret > 0
}

impl Wsbrd {
    fn init_radio(&mut self) {
        let rail = self
            .rcp
            .rail_config_list
            .iter()
            .find(|rail| {
                rail.rail_phy_mode_id == self.config.phy_mode_id
                    && rail.chan0_freq == self.config.chan0_freq
                    && rail.chan_spacing == self.config.chan_spacing
                    && rail.chan_count == self.config.chan_count
            })
            .copied()
            .unwrap_or_else(|| {
                fatal(
                    EXIT_SYSTEM,
                    "unsupported radio configuration (check --list-rf-configs)",
                )
            });
        let chan_mask = self
            .config
            .chan_mask()
            .unwrap_or_else(|err| fatal(EXIT_CONFIG, err));

        self.rcp
            .set_radio(rail.index, 0, false)
            .and_then(|()| {
                self.rcp
                    .set_fhss_uc(self.config.uc_dwell_interval, &chan_mask)
            })
            .and_then(|()| self.rcp.set_fhss_async(ASYNC_FRAG_DURATION_MS, &chan_mask))
            .and_then(|()| self.rcp.req_radio_enable())
            .unwrap_or_else(|err| fatal_rcp(err));
    }

    fn init_ws(&mut self) {
        self.ws.eui64 = self.rcp.eui64;
        self.ws.pan_id = self.config.pan_id.unwrap_or_else(|| {
            // Stable but not configured: derive from the EUI-64, keeping
            // clear of the unset value 0xffff.
            u16::from_le_bytes([self.rcp.eui64.0[6], self.rcp.eui64.0[7]]) & 0x7fff
        });
        if let Some(path) = self.config.pcap_file.as_deref() {
            match PcapngWriter::create(path) {
                Ok(pcap) => self.ws.set_pcap(pcap),
                Err(err) => fatal(EXIT_SYSTEM, format_args!("pcapng: {}", err)),
            }
        }
        self.timers.start_periodic(self.tick_group, TICK_TOKEN, 1_000);
    }

    fn init_keys(&mut self) {
        let gtk = self.config.gtk.unwrap_or_else(keys::generate_gtk);
        self.gtks
            .gtk_set(0, &gtk, GTK_DEFAULT_LIFETIME)
            .unwrap_or_else(|err| fatal(EXIT_CONFIG, err));
        self.gtks.status_fresh_set(0);
        self.gtks
            .status_active_set(0)
            .expect("freshly installed key is fresh");

        let gak = keys::generate_gak(&self.config.network_name, &gtk);
        debug!("install key={} key-idx={}", hex::encode(gak), GAK_KEY_INDEX);
        self.rcp
            .set_sec_key(GAK_KEY_INDEX, &gak, 0)
            .unwrap_or_else(|err| fatal_rcp(err));
    }

    fn load_key_storage(&mut self) {
        let Some(path) = self.config.key_storage.clone() else {
            return;
        };
        if !path.exists() {
            return;
        }
        match storage::load(&path) {
            Ok(records) => {
                info!("restored {} supplicant(s) from {}", records.len(), path.display());
                for record in records {
                    let id = self.auth.supp_get_or_create(record.eui64);
                    self.auth.supp_mut(id).keys = record.to_keys();
                }
            }
            Err(err) => warn!("key storage: {}", err),
        }
    }

    fn dump_key_storage(&mut self) {
        let Some(path) = self.config.key_storage.clone() else {
            return;
        };
        let mut any_updated = false;
        let records: Vec<StorageRecord> = self
            .auth
            .supps()
            .map(|(_, supp)| {
                any_updated |= supp.keys.updated;
                StorageRecord::from_keys(supp.eui64, &supp.keys)
            })
            .collect();
        if !any_updated {
            return;
        }
        match storage::store(&path, &records) {
            Ok(()) => {
                for (_, supp) in self.auth.supps_mut() {
                    supp.keys.updated = false;
                }
            }
            Err(err) => warn!("key storage: {}", err),
        }
    }

    /// GAKs derived from the present GTKs, as exposed on the management
    /// interface. Computed from the locally configured ring; the key a
    /// given supplicant actually runs may lag until rekey (known
    /// limitation).
    fn property_gaks(&self) -> Vec<[u8; 16]> {
        (0..self.gtks.slot_count())
            .filter_map(|i| self.gtks.gtk_get(i))
            .map(|gtk| keys::generate_gak(&self.config.network_name, gtk))
            .collect()
    }

    fn run(&mut self) -> ! {
        enum Pollfd {
            Rcp,
            Timer,
            Tun,
        }
        const POLLFD_COUNT: usize = 3;

        loop {
            let mut pfd = [
                libc::pollfd {
                    fd: self.rcp.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.timers.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.tun.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: pfd is a valid pollfd array.
            let ret = unsafe { libc::poll(pfd.as_mut_ptr(), POLLFD_COUNT as libc::nfds_t, -1) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                fatal(EXIT_SYSTEM, format_args!("poll: {}", err));
            }
            if pfd[Pollfd::Rcp as usize].revents & libc::POLLIN != 0 {
                self.on_rcp();
            }
            if pfd[Pollfd::Timer as usize].revents & libc::POLLIN != 0 {
                self.on_timer();
            }
            if pfd[Pollfd::Tun as usize].revents & libc::POLLIN != 0 {
                self.on_tun();
            }
        }
    }

    fn on_rcp(&mut self) {
        loop {
            match self.rcp.rx() {
                Ok(None) => return,
                Ok(Some(RcpEvent::RxInd(ind))) => {
                    let mut sink = LlcSink::default();
                    self.ws.recv_ind(&ind, &mut sink);
                    self.drain_sink(sink);
                }
                Ok(Some(RcpEvent::TxCnf(cnf))) => {
                    let mut sink = LlcSink::default();
                    self.ws.recv_cnf(&cnf, &mut sink);
                    self.drain_sink(sink);
                }
                Ok(Some(event)) => debug!("ignored {:?}", event),
                Err(err) => fatal_rcp(err),
            }
        }
    }

    fn on_timer(&mut self) {
        self.timers.drain();
        while let Some((group, token)) = self.timers.pop_expired() {
            if group == self.tick_group {
                self.on_tick();
            } else if group == self.auth.timer_group {
                let mut out = EapolOut::default();
                self.auth.rt_timeout(&mut self.timers, &mut out, token);
                self.send_eapol_out(out);
            }
        }
    }

    fn on_tick(&mut self) {
        let now = timer::now_ms();
        self.auth.tick_lifetimes(1);
        for index in 0..self.gtks.slot_count() {
            self.gtks.lifetime_decrement(index, 1, true);
        }
        for index in 0..self.lgtks.slot_count() {
            self.lgtks.lifetime_decrement(index, 1, true);
        }
        self.neigh.expire(now);

        let mut sink = LlcSink::default();
        self.ws.expire_frame_ctxs(now, &mut sink);
        self.drain_sink(sink);

        self.dump_key_storage();
    }

    fn on_tun(&mut self) {
        let mut buf = [0u8; 1504];
        loop {
            let len = match self.tun.recv(&mut buf) {
                Ok(0) => return,
                Ok(len) => len,
                Err(err) => fatal(EXIT_SYSTEM, format_args!("tun: {}", err)),
            };
            self.send_ipv6(&buf[..len]);
        }
    }

    /// Forwards one IPv6 datagram from the kernel into the PAN,
    /// uncompressed inside an MPX-IE. Link-local destinations with an
    /// EUI-64-derived interface identifier go out unicast, everything
    /// else on the broadcast schedule.
    fn send_ipv6(&mut self, pkt: &[u8]) {
        let dst = ipv6_dst_eui64(pkt);
        let mut lowpan = Vec::with_capacity(1 + pkt.len());
        lowpan.push(LOWPAN_DISPATCH_IPV6);
        lowpan.extend_from_slice(pkt);
        let mut mpx = Vec::with_capacity(3 + lowpan.len());
        mpx.push(0); // transaction control: full frame
        mpx.extend_from_slice(&MPX_ID_6LOWPAN.to_le_bytes());
        mpx.extend_from_slice(&lowpan);
        let mpx_ie = payload_ie(IE_GROUP_MPX, &mpx);
        let utt = utt_ie(WsFrameType::Data);

        let req = DataReq {
            tx_ack_req: dst.is_some(),
            fhss_type: if dst.is_some() {
                FhssType::FfnUc
            } else {
                FhssType::FfnBc
            },
            dst,
            seqno_suppressed: false,
            security: SecurityLevel::EncMic64,
            key_index: GAK_KEY_INDEX,
            rate_list: None,
            ms_mode: ModeSwitchType::Phy,
        };
        let payload = [mpx_ie.as_slice()];
        let ies = IeList {
            header: &utt,
            payload: &payload,
        };
        let mut sink = LlcSink::default();
        self.ws
            .submit(&mut self.rcp, &self.neigh, &req, &ies, &mut sink);
        self.drain_sink(sink);
    }

    fn drain_sink(&mut self, sink: LlcSink) {
        for (handle, status, kind) in sink.confirms {
            if status != HifStatus::Success {
                debug!("tx {:?} handle {} failed: {:?}", kind, handle, status);
            }
        }
        for src in sink.sources {
            self.neigh.add(src, NodeRole::Router, timer::now_ms());
        }
        for pkt in sink.ipv6 {
            if let Err(err) = self.tun.send(&pkt) {
                fatal(EXIT_SYSTEM, format_args!("tun: {}", err));
            }
        }
        for (src, kmp_id, pdu) in sink.eapol {
            self.neigh.add(src, NodeRole::Router, timer::now_ms());
            let mut out = EapolOut::default();
            self.auth
                .recv_eapol(&mut self.timers, &mut out, None, src, kmp_id, &pdu);
            self.on_supplicant_ready(&src);
            self.send_eapol_out(out);
        }
    }

    /// Marks the next GTK as inserted for a supplicant whose pairwise
    /// keys are established. The group key handshake message carrying
    /// the key under the KEK rides on the 4WH/GKH KMP path.
    fn on_supplicant_ready(&mut self, eui64: &Eui64) {
        let Some(id) = self.auth.supp_by_eui64(eui64) else {
            return;
        };
        let supp = self.auth.supp(id);
        if !supp.keys.ptk_set {
            return;
        }
        if let Some(index) = supp.keys.gtks.insert_index_from_gtkl(&self.gtks) {
            self.auth.gtk_insert(id, &self.gtks, index, false);
        }
    }

    fn send_eapol_out(&mut self, out: EapolOut) {
        for (dst, kmp_id, pdu) in out.sent {
            let mut sink = LlcSink::default();
            self.ws
                .send_eapol(&mut self.rcp, &self.neigh, kmp_id, &pdu, &dst, &mut sink);
            // Only confirms can come back from an EAPOL transmit.
            self.drain_sink(sink);
        }
    }
}

/// Extracts the destination EUI-64 from a link-local IPv6 destination
/// whose interface identifier follows the EUI-64 mapping.
fn ipv6_dst_eui64(pkt: &[u8]) -> Option<Eui64> {
    if pkt.len() < 40 {
        return None;
    }
    let dst = &pkt[24..40];
    if dst[0] != 0xfe || dst[1] & 0xc0 != 0x80 {
        return None;
    }
    let mut eui64 = [0u8; 8];
    eui64.copy_from_slice(&dst[8..16]);
    eui64[0] ^= 0x02;
    Some(Eui64(eui64))
}
