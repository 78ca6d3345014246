// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Wi-SUN router daemon.
//!
//! The router side of the pair: brings up the RCP, installs the GAK
//! derived from the configured GTK, solicits PAN advertisements and
//! configuration on the async schedule until it hears the PAN, and
//! forwards IPv6 between the TUN device and the mesh. The EAPOL
//! supplicant state machine and RPL live above the hook points exposed
//! here.
//!
//! Exit codes: 1 configuration error, 2 I/O or system error, 3 RCP
//! incompatibility or unsupported runtime event.

mod config;

use clap::Parser;
use log::{debug, info, warn};

use wisun::hif::{self, FhssType, HifStatus, ModeSwitchType};
use wisun::mac::{
    mpx_parse, utt_ie, DataReq, FrameCtx, FrameKind, IeList, MacClient, WsCtx, WsFrameType,
    MPX_ID_6LOWPAN,
};
use wisun::neighbor::{NeighborTable, NodeRole};
use wisun::net::ieee802154::{
    payload_ie, Eui64, ParsedFrame, PayloadIeIter, SecurityLevel, IE_GROUP_MPX,
};
use wisun::pcapng::PcapngWriter;
use wisun::rcp::{Rcp, RcpError, RcpEvent, RxInd, TxCnf, UartBus};
use wisun::security::keys;
use wisun::timer::{self, TimerCtxt, TimerGroup};
use wisun::tun::Tun;

use std::fmt::Display;
use std::process::exit;

const EXIT_CONFIG: i32 = 1;
const EXIT_SYSTEM: i32 = 2;
const EXIT_RCP: i32 = 3;

const HOST_API_VERSION: u32 = hif::version(2, 0, 0);
const GAK_KEY_INDEX: u8 = 1;
const LOWPAN_DISPATCH_IPV6: u8 = 0x41;
const NEIGHBOR_TTL_S: u32 = 30 * 60;
const ASYNC_FRAG_DURATION_MS: u32 = 500;

const TICK_TOKEN: u64 = 0;
const SOLICIT_TOKEN: u64 = 1;
const SOLICIT_PERIOD_MS: u64 = 15_000;

fn fatal(code: i32, msg: impl Display) -> ! {
    log::error!("{}", msg);
    exit(code);
}

#[derive(Default)]
struct LlcSink {
    ipv6: Vec<Vec<u8>>,
    sources: Vec<(Eui64, u16)>,
    confirms: Vec<(u8, HifStatus, FrameKind)>,
}

impl MacClient for LlcSink {
    fn confirm(&mut self, cnf: &TxCnf, ctx: &FrameCtx, _ack: Option<&ParsedFrame>) {
        self.confirms.push((cnf.handle, cnf.status, ctx.kind));
    }

    fn indication(&mut self, _ind: &RxInd, frame: &ParsedFrame) {
        self.sources
            .push((frame.hdr.src, frame.hdr.pan_id.unwrap_or(0xffff)));
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

    fn eapol_ind(&mut self, src: &Eui64, _kmp_id: u8, _pdu: &[u8]) {
        // Supplicant-side key handshakes hook in here.
        debug!("eapol from {}", src);
    }
}

struct Wsrd {
    config: config::Config,
    rcp: Rcp<UartBus>,
    ws: WsCtx,
    neigh: NeighborTable,
    timers: TimerCtxt,
    tick_group: TimerGroup,
    tun: Tun,
    pan_found: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = config::Config::parse();

    info!("Wi-SUN router");

    let mut timers = match TimerCtxt::new() {
        Ok(timers) => timers,
        Err(err) => fatal(EXIT_SYSTEM, format_args!("timerfd: {}", err)),
    };
    let tick_group = timers.group();

    let rcp = init_rcp(&config);
    let tun = match Tun::open(&config.tun_device, config.mtu) {
        Ok(tun) => tun,
        Err(err) => fatal(
            EXIT_SYSTEM,
            format_args!("tun {}: {}", config.tun_device, err),
        ),
    };

    let mut daemon = Wsrd {
        ws: WsCtx::new(),
        neigh: NeighborTable::new(NEIGHBOR_TTL_S),
        config,
        rcp,
        timers,
        tick_group,
        tun,
        pan_found: false,
    };
    daemon.init_radio();
    daemon.init_ws();
    daemon.init_key();

    info!("Wi-SUN router successfully started");
    info!("  HwAddress: {}", daemon.ws.eui64);

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

impl Wsrd {
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
        if let Some(path) = self.config.pcap_file.as_deref() {
            match PcapngWriter::create(path) {
                Ok(pcap) => self.ws.set_pcap(pcap),
                Err(err) => fatal(EXIT_SYSTEM, format_args!("pcapng: {}", err)),
            }
        }
        self.timers.start_periodic(self.tick_group, TICK_TOKEN, 1_000);
        // First solicit as soon as the loop starts.
        self.timers.start_rel(self.tick_group, SOLICIT_TOKEN, 1);
    }

    fn init_key(&mut self) {
        let gak = keys::generate_gak(&self.config.network_name, &self.config.gtk);
        debug!("install key={} key-idx={}", hex::encode(gak), GAK_KEY_INDEX);
        self.rcp
            .set_sec_key(GAK_KEY_INDEX, &gak, 0)
            .unwrap_or_else(|err| fatal_rcp(err));
    }

    fn run(&mut self) -> ! {
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
            let ret = unsafe { libc::poll(pfd.as_mut_ptr(), pfd.len() as libc::nfds_t, -1) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                fatal(EXIT_SYSTEM, format_args!("poll: {}", err));
            }
            if pfd[0].revents & libc::POLLIN != 0 {
                self.on_rcp();
            }
            if pfd[1].revents & libc::POLLIN != 0 {
                self.on_timer();
            }
            if pfd[2].revents & libc::POLLIN != 0 {
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
            if group != self.tick_group {
                continue;
            }
            match token {
                TICK_TOKEN => self.on_tick(),
                SOLICIT_TOKEN => self.on_solicit(),
                _ => unreachable!("unknown timer token"),
            }
        }
    }

    fn on_tick(&mut self) {
        let now = timer::now_ms();
        self.neigh.expire(now);
        let mut sink = LlcSink::default();
        self.ws.expire_frame_ctxs(now, &mut sink);
        self.drain_sink(sink);
    }

    /// Re-solicits the PAN until an advertisement is heard, then once
    /// more for the PAN configuration.
    fn on_solicit(&mut self) {
        let mut sink = LlcSink::default();
        if !self.pan_found {
            self.ws
                .send_pas(&mut self.rcp, &self.neigh, &self.config.network_name, &mut sink);
        } else {
            self.ws
                .send_pcs(&mut self.rcp, &self.neigh, &self.config.network_name, &mut sink);
        }
        self.drain_sink(sink);
        if !self.pan_found {
            self.timers
                .start_rel(self.tick_group, SOLICIT_TOKEN, SOLICIT_PERIOD_MS);
        }
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
        for (src, pan_id) in sink.sources {
            self.neigh.add(src, NodeRole::Ffn, timer::now_ms());
            if !self.pan_found && pan_id != 0xffff {
                info!("found PAN {:#06x} via {}", pan_id, src);
                self.ws.pan_id = pan_id;
                self.pan_found = true;
                // Ask for the PAN configuration right away.
                self.timers.start_rel(self.tick_group, SOLICIT_TOKEN, 1);
            }
        }
        for pkt in sink.ipv6 {
            if let Err(err) = self.tun.send(&pkt) {
                fatal(EXIT_SYSTEM, format_args!("tun: {}", err));
            }
        }
    }
}

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
