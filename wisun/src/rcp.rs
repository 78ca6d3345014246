// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Transport to the radio co-processor.
//!
//! The RCP speaks length-delimited HIF frames over a byte bus (UART, or
//! an in-memory pair in tests). This module owns the connection state
//! machine:
//!
//! `Closed → Opening → WaitingReset → WaitingRfList → Ready`
//!
//! Egress data transmission is a programmer error outside `Ready`. The
//! host must publish its own API version (`set_host_api`) after every
//! reset, and an RCP reporting an API older than 2.0.0 is rejected at
//! the handshake. A reset indication arriving after `Ready` means the
//! RCP rebooted underneath us and is fatal; reconnection is not a
//! supported transition.

use crate::hif::{self, FhssType, FhssUcSchedule, HifCmd, HifStatus, ModeSwitchType, RateInfo};
use crate::net::ieee802154::{Eui64, MAX_FRAME_LEN};
use crate::net::stream::SResult;
use crate::net::stream::{decode_u16, decode_u32, decode_u64, decode_u8};
use crate::security::keys::GTK_NUM;

use log::{debug, trace, warn};

use std::io;
use std::os::unix::io::RawFd;

/// Maximum HIF frame: opcode, header fields, and a full PSDU.
pub const HIF_FRAME_MAX: usize = MAX_FRAME_LEN + 128;

/// Byte bus carrying length-delimited HIF frames.
pub trait Bus {
    fn tx_frame(&mut self, frame: &[u8]) -> io::Result<()>;
    /// Receives one frame, `Ok(0)` when none is pending.
    fn rx_frame(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn fd(&self) -> RawFd;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RcpState {
    Closed,
    Opening,
    WaitingReset,
    WaitingRfList,
    Ready,
}

#[derive(Debug, thiserror::Error)]
pub enum RcpError {
    #[error("rcp bus: {0}")]
    Io(#[from] io::Error),
    #[error("RCP API {0}.{1}.{2} < 2.0.0 (too old)")]
    Incompatible(u8, u16, u8),
    #[error("unsupported RCP reset")]
    UnexpectedReset,
    #[error("RCP fatal: {0}")]
    Fatal(String),
    #[error("malformed hif frame")]
    Malformed,
}

/// Radio configuration supported by the RCP, enumerated at handshake.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RailConfig {
    pub index: u16,
    pub chan0_freq: u32,
    pub chan_spacing: u32,
    pub chan_count: u16,
    pub rail_phy_mode_id: u8,
}

/// Received frame indication.
#[derive(Clone, Debug)]
pub struct RxInd {
    pub frame: Vec<u8>,
    pub timestamp_us: u64,
    pub channel: u16,
    pub rssi_dbm: i8,
    pub lqi: u8,
}

/// Transmit confirmation; `frame` holds the ack frame when one was
/// received.
#[derive(Clone, Debug)]
pub struct TxCnf {
    pub handle: u8,
    pub status: HifStatus,
    pub frame: Vec<u8>,
    pub timestamp_us: u64,
}

/// Event surfaced to the daemon from one received HIF frame.
#[derive(Debug)]
pub enum RcpEvent {
    /// Reset indication accepted; version and EUI-64 are populated.
    Reset,
    /// The radio configuration list is complete; transmit is now legal.
    RadioListReady,
    RxInd(RxInd),
    TxCnf(TxCnf),
}

pub struct Rcp<B: Bus> {
    bus: B,
    state: RcpState,
    pub version_api: u32,
    pub version_fw: u32,
    pub version_label: String,
    pub eui64: Eui64,
    pub rail_config_list: Vec<RailConfig>,
}

// Request flags for `req_data_tx`.
const TX_FLAG_FHSS: u8 = 1 << 0;
const TX_FLAG_FRAME_COUNTERS: u8 = 1 << 1;
const TX_FLAG_RATE_LIST: u8 = 1 << 2;
const TX_FLAG_MS_MAC: u8 = 1 << 3;

impl<B: Bus> Rcp<B> {
    pub fn new(bus: B) -> Rcp<B> {
        Rcp {
            bus,
            state: RcpState::Opening,
            version_api: 0,
            version_fw: 0,
            version_label: String::new(),
            eui64: Eui64::default(),
            rail_config_list: Vec::new(),
        }
    }

    pub fn state(&self) -> RcpState {
        self.state
    }

    pub fn fd(&self) -> RawFd {
        self.bus.fd()
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RcpError> {
        trace!("hif tx: cmd {:#04x} ({} bytes)", frame[0], frame.len());
        self.bus.tx_frame(frame)?;
        Ok(())
    }

    /// Asks the RCP to reboot into the bootstrapped state; the reset
    /// indication carries its identity.
    pub fn req_reset(&mut self) -> Result<(), RcpError> {
        self.state = RcpState::WaitingReset;
        self.send(&[HifCmd::ReqReset as u8, 0])
    }

    /// Publishes the host's API version, required after every reset.
    pub fn set_host_api(&mut self, version: u32) -> Result<(), RcpError> {
        let mut frame = vec![HifCmd::SetHostApi as u8];
        frame.extend_from_slice(&version.to_le_bytes());
        self.send(&frame)
    }

    pub fn req_radio_list(&mut self) -> Result<(), RcpError> {
        self.rail_config_list.clear();
        self.send(&[HifCmd::ReqRadioList as u8])
    }

    pub fn set_radio(&mut self, index: u16, ofdm_mcs: u8, rf_on: bool) -> Result<(), RcpError> {
        let mut frame = vec![HifCmd::SetRadio as u8];
        frame.extend_from_slice(&index.to_le_bytes());
        frame.push(ofdm_mcs);
        frame.push(rf_on as u8);
        self.send(&frame)
    }

    pub fn set_fhss_uc(
        &mut self,
        dwell_interval_ms: u8,
        chan_mask: &[u8; 32],
    ) -> Result<(), RcpError> {
        let mut frame = vec![HifCmd::SetFhssUc as u8, dwell_interval_ms];
        frame.extend_from_slice(chan_mask);
        self.send(&frame)
    }

    pub fn set_fhss_async(
        &mut self,
        frag_duration_ms: u32,
        chan_mask: &[u8; 32],
    ) -> Result<(), RcpError> {
        let mut frame = vec![HifCmd::SetFhssAsync as u8];
        frame.extend_from_slice(&frag_duration_ms.to_le_bytes());
        frame.extend_from_slice(chan_mask);
        self.send(&frame)
    }

    pub fn req_radio_enable(&mut self) -> Result<(), RcpError> {
        self.send(&[HifCmd::ReqRadioEnable as u8])
    }

    /// Installs a GAK into the RCP's security engine.
    pub fn set_sec_key(
        &mut self,
        key_index: u8,
        key: &[u8; 16],
        frame_counter: u32,
    ) -> Result<(), RcpError> {
        let mut frame = vec![HifCmd::SetSecKey as u8, key_index];
        frame.extend_from_slice(key);
        frame.extend_from_slice(&frame_counter.to_le_bytes());
        self.send(&frame)
    }

    /// Hands an assembled frame to the RCP for transmission under the
    /// given FHSS schedule. Transmitting before the handshake finished
    /// is a bug in the caller, not a runtime condition.
    pub fn req_data_tx(
        &mut self,
        frame: &[u8],
        handle: u8,
        fhss_type: FhssType,
        fhss: Option<&FhssUcSchedule>,
        frame_counters: Option<&[u32; GTK_NUM]>,
        rate_list: Option<&[RateInfo]>,
        ms_mode: ModeSwitchType,
    ) -> Result<(), RcpError> {
        assert!(
            self.state == RcpState::Ready,
            "data tx in state {:?}",
            self.state
        );
        let mut flags = 0;
        if fhss.is_some() {
            flags |= TX_FLAG_FHSS;
        }
        if frame_counters.is_some() {
            flags |= TX_FLAG_FRAME_COUNTERS;
        }
        if rate_list.is_some() {
            flags |= TX_FLAG_RATE_LIST;
        }
        if ms_mode == ModeSwitchType::Mac {
            flags |= TX_FLAG_MS_MAC;
        }

        let mut req = Vec::with_capacity(frame.len() + 64);
        req.push(HifCmd::ReqDataTx as u8);
        req.push(handle);
        req.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        req.extend_from_slice(frame);
        req.push(fhss_type as u8);
        req.push(flags);
        if let Some(fhss) = fhss {
            req.extend_from_slice(&fhss.utt_rx_tstamp_us.to_le_bytes());
            req.extend_from_slice(&fhss.ufsi.to_le_bytes());
            req.push(fhss.dwell_interval_ms);
            req.push(fhss.clock_drift);
            req.push(fhss.timing_accuracy);
            req.push(fhss.chan_func);
            req.extend_from_slice(&fhss.chan_fixed.to_le_bytes());
            req.extend_from_slice(&fhss.chan_mask);
        }
        if let Some(counters) = frame_counters {
            for counter in counters {
                req.extend_from_slice(&counter.to_le_bytes());
            }
        }
        if let Some(rates) = rate_list {
            req.push(rates.len() as u8);
            for rate in rates {
                req.push(rate.phy_mode_id);
                req.push(rate.tx_attempts);
                req.push(rate.tx_power_dbm as u8);
            }
        }
        self.send(&req)
    }

    /// Processes one pending HIF frame from the bus. Returns `None` when
    /// nothing is pending or the frame carried nothing the daemon acts
    /// on.
    pub fn rx(&mut self) -> Result<Option<RcpEvent>, RcpError> {
        let mut buf = vec![0; HIF_FRAME_MAX];
        let len = self.bus.rx_frame(&mut buf)?;
        if len == 0 {
            return Ok(None);
        }
        buf.truncate(len);

        let Some(cmd) = HifCmd::from_u8(buf[0]) else {
            trace!("drop {:9}: unknown command {:#04x}", "hif", buf[0]);
            return Ok(None);
        };
        let payload = &buf[1..];
        match cmd {
            HifCmd::IndReset => self.on_reset_ind(payload).map(Some),
            HifCmd::IndFatal => {
                let msg = String::from_utf8_lossy(payload).into_owned();
                Err(RcpError::Fatal(msg))
            }
            HifCmd::CnfRadioList => self.on_radio_list_cnf(payload),
            HifCmd::IndDataRx => {
                let (_, ind) = decode_rx_ind(payload).done().ok_or(RcpError::Malformed)?;
                Ok(Some(RcpEvent::RxInd(ind)))
            }
            HifCmd::CnfDataTx => {
                let (_, cnf) = decode_tx_cnf(payload).done().ok_or(RcpError::Malformed)?;
                Ok(Some(RcpEvent::TxCnf(cnf)))
            }
            _ => {
                trace!("drop {:9}: unexpected command {:?}", "hif", cmd);
                Ok(None)
            }
        }
    }

    fn on_reset_ind(&mut self, payload: &[u8]) -> Result<RcpEvent, RcpError> {
        if self.state == RcpState::Ready {
            return Err(RcpError::UnexpectedReset);
        }
        let (_, reset) = decode_reset_ind(payload).done().ok_or(RcpError::Malformed)?;
        self.version_api = reset.version_api;
        self.version_fw = reset.version_fw;
        self.version_label = reset.label;
        self.eui64 = reset.eui64;
        debug!(
            "Connected to RCP \"{}\" ({}.{}.{}), API {}.{}.{}",
            self.version_label,
            hif::version_major(self.version_fw),
            hif::version_minor(self.version_fw),
            hif::version_patch(self.version_fw),
            hif::version_major(self.version_api),
            hif::version_minor(self.version_api),
            hif::version_patch(self.version_api),
        );
        if hif::version_older_than(self.version_api, 2, 0, 0) {
            return Err(RcpError::Incompatible(
                hif::version_major(self.version_api),
                hif::version_minor(self.version_api),
                hif::version_patch(self.version_api),
            ));
        }
        self.state = RcpState::WaitingRfList;
        Ok(RcpEvent::Reset)
    }

    fn on_radio_list_cnf(&mut self, payload: &[u8]) -> Result<Option<RcpEvent>, RcpError> {
        let (_, (more, entries)) = decode_radio_list_cnf(payload)
            .done()
            .ok_or(RcpError::Malformed)?;
        self.rail_config_list.extend_from_slice(&entries);
        if more {
            return Ok(None);
        }
        if self.state != RcpState::WaitingRfList {
            warn!("unexpected radio list confirmation in {:?}", self.state);
        }
        self.state = RcpState::Ready;
        Ok(Some(RcpEvent::RadioListReady))
    }
}

struct ResetInd {
    version_api: u32,
    version_fw: u32,
    label: String,
    eui64: Eui64,
}

fn decode_reset_ind(buf: &[u8]) -> SResult<ResetInd> {
    let (off, version_api) = dec_try!(buf; decode_u32);
    let (off, version_fw) = dec_try!(buf, off; decode_u32);
    let (off, label_len) = dec_try!(buf, off; decode_u8);
    stream_len_cond!(buf, off + label_len as usize + 8);
    let label = String::from_utf8_lossy(&buf[off..off + label_len as usize]).into_owned();
    let off = off + label_len as usize;
    let mut eui64 = Eui64::default();
    eui64.0.copy_from_slice(&buf[off..off + 8]);
    stream_done!(
        off + 8,
        ResetInd {
            version_api,
            version_fw,
            label,
            eui64,
        }
    );
}

fn decode_radio_list_cnf(buf: &[u8]) -> SResult<(bool, Vec<RailConfig>)> {
    let (off, more) = dec_try!(buf; decode_u8);
    let (mut off, count) = dec_try!(buf, off; decode_u8);
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (o, index) = dec_try!(buf, off; decode_u16);
        let (o, chan0_freq) = dec_try!(buf, o; decode_u32);
        let (o, chan_spacing) = dec_try!(buf, o; decode_u32);
        let (o, chan_count) = dec_try!(buf, o; decode_u16);
        let (o, rail_phy_mode_id) = dec_try!(buf, o; decode_u8);
        entries.push(RailConfig {
            index,
            chan0_freq,
            chan_spacing,
            chan_count,
            rail_phy_mode_id,
        });
        off = o;
    }
    stream_done!(off, (more != 0, entries));
}

fn decode_rx_ind(buf: &[u8]) -> SResult<RxInd> {
    let (off, frame_len) = dec_try!(buf; decode_u16);
    stream_len_cond!(buf, off + frame_len as usize);
    let frame = buf[off..off + frame_len as usize].to_vec();
    let off = off + frame_len as usize;
    let (off, timestamp_us) = dec_try!(buf, off; decode_u64);
    let (off, channel) = dec_try!(buf, off; decode_u16);
    let (off, rssi) = dec_try!(buf, off; decode_u8);
    let (off, lqi) = dec_try!(buf, off; decode_u8);
    stream_done!(
        off,
        RxInd {
            frame,
            timestamp_us,
            channel,
            rssi_dbm: rssi as i8,
            lqi,
        }
    );
}

fn decode_tx_cnf(buf: &[u8]) -> SResult<TxCnf> {
    let (off, handle) = dec_try!(buf; decode_u8);
    let (off, status) = dec_try!(buf, off; decode_u8);
    let (off, frame_len) = dec_try!(buf, off; decode_u16);
    stream_len_cond!(buf, off + frame_len as usize);
    let frame = buf[off..off + frame_len as usize].to_vec();
    let off = off + frame_len as usize;
    let (off, timestamp_us) = dec_try!(buf, off; decode_u64);
    stream_done!(
        off,
        TxCnf {
            handle,
            status: HifStatus::from_u8(status),
            frame,
            timestamp_us,
        }
    );
}

/// UART bus: raw termios, HIF frames delimited by a little-endian
/// 16-bit length prefix.
pub struct UartBus {
    fd: RawFd,
    rx_buf: Vec<u8>,
}

impl UartBus {
    pub fn open(device: &str, baudrate: u32) -> io::Result<UartBus> {
        let path = std::ffi::CString::new(device)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad device path"))?;
        // SAFETY: path is a valid NUL-terminated string.
        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let speed = match baudrate {
            9_600 => libc::B9600,
            19_200 => libc::B19200,
            38_400 => libc::B38400,
            57_600 => libc::B57600,
            115_200 => libc::B115200,
            230_400 => libc::B230400,
            460_800 => libc::B460800,
            921_600 => libc::B921600,
            _ => {
                // SAFETY: fd was opened above.
                unsafe { libc::close(fd) };
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unsupported baud rate",
                ));
            }
        };

        // SAFETY: fd is open; termios is an out-parameter.
        unsafe {
            let mut tios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tios) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            libc::cfmakeraw(&mut tios);
            libc::cfsetspeed(&mut tios, speed);
            tios.c_cflag |= libc::CLOCAL | libc::CREAD;
            if libc::tcsetattr(fd, libc::TCSANOW, &tios) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
        }
        Ok(UartBus {
            fd,
            rx_buf: Vec::new(),
        })
    }

    fn fill_rx_buf(&mut self) -> io::Result<()> {
        let mut chunk = [0; 4096];
        loop {
            // SAFETY: reading into a local buffer on an owned fd.
            let n = unsafe {
                libc::read(self.fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len())
            };
            if n > 0 {
                self.rx_buf.extend_from_slice(&chunk[..n as usize]);
                continue;
            }
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "uart closed"));
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }
}

impl Bus for UartBus {
    fn tx_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        debug_assert!(frame.len() <= u16::MAX as usize);
        let mut out = Vec::with_capacity(2 + frame.len());
        out.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        out.extend_from_slice(frame);
        let mut written = 0;
        while written < out.len() {
            // SAFETY: writing from a local buffer on an owned fd.
            let n = unsafe {
                libc::write(
                    self.fd,
                    out[written..].as_ptr() as *const libc::c_void,
                    out.len() - written,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted
                    || err.kind() == io::ErrorKind::WouldBlock
                {
                    continue;
                }
                return Err(err);
            }
            written += n as usize;
        }
        Ok(())
    }

    fn rx_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill_rx_buf()?;
        if self.rx_buf.len() < 2 {
            return Ok(0);
        }
        let len = u16::from_le_bytes([self.rx_buf[0], self.rx_buf[1]]) as usize;
        if self.rx_buf.len() < 2 + len {
            return Ok(0);
        }
        if len > buf.len() {
            self.rx_buf.drain(..2 + len);
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized frame"));
        }
        buf[..len].copy_from_slice(&self.rx_buf[2..2 + len]);
        self.rx_buf.drain(..2 + len);
        Ok(len)
    }

    fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for UartBus {
    fn drop(&mut self) {
        // SAFETY: fd is owned by self and closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory bus: frames queued by the test on one side, requests
    /// captured on the other.
    #[derive(Default)]
    pub struct FakeBus {
        pub to_host: VecDeque<Vec<u8>>,
        pub from_host: Vec<Vec<u8>>,
    }

    impl Bus for FakeBus {
        fn tx_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.from_host.push(frame.to_vec());
            Ok(())
        }

        fn rx_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.to_host.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Ok(0),
            }
        }

        fn fd(&self) -> RawFd {
            -1
        }
    }

    pub fn reset_ind(api: u32, fw: u32, label: &str, eui64: [u8; 8]) -> Vec<u8> {
        let mut frame = vec![HifCmd::IndReset as u8];
        frame.extend_from_slice(&api.to_le_bytes());
        frame.extend_from_slice(&fw.to_le_bytes());
        frame.push(label.len() as u8);
        frame.extend_from_slice(label.as_bytes());
        frame.extend_from_slice(&eui64);
        frame
    }

    pub fn radio_list_cnf(more: bool, entries: &[RailConfig]) -> Vec<u8> {
        let mut frame = vec![HifCmd::CnfRadioList as u8, more as u8, entries.len() as u8];
        for e in entries {
            frame.extend_from_slice(&e.index.to_le_bytes());
            frame.extend_from_slice(&e.chan0_freq.to_le_bytes());
            frame.extend_from_slice(&e.chan_spacing.to_le_bytes());
            frame.extend_from_slice(&e.chan_count.to_le_bytes());
            frame.push(e.rail_phy_mode_id);
        }
        frame
    }

    pub fn rx_ind(frame: &[u8], timestamp_us: u64) -> Vec<u8> {
        let mut ind = vec![HifCmd::IndDataRx as u8];
        ind.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        ind.extend_from_slice(frame);
        ind.extend_from_slice(&timestamp_us.to_le_bytes());
        ind.extend_from_slice(&5u16.to_le_bytes());
        ind.push(-70i8 as u8);
        ind.push(200);
        ind
    }

    pub fn tx_cnf(handle: u8, status: HifStatus, ack: &[u8], timestamp_us: u64) -> Vec<u8> {
        let mut cnf = vec![HifCmd::CnfDataTx as u8, handle, status.to_u8()];
        cnf.extend_from_slice(&(ack.len() as u16).to_le_bytes());
        cnf.extend_from_slice(ack);
        cnf.extend_from_slice(&timestamp_us.to_le_bytes());
        cnf
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::hif::version;

    const SAMPLE_CONFIG: RailConfig = RailConfig {
        index: 1,
        chan0_freq: 863_100_000,
        chan_spacing: 100_000,
        chan_count: 69,
        rail_phy_mode_id: 0x51,
    };

    fn eui() -> [u8; 8] {
        [2, 0, 0, 0, 0, 0, 0, 1]
    }

    #[test]
    fn handshake_reaches_ready() {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.req_reset().unwrap();
        assert_eq!(rcp.state(), RcpState::WaitingReset);

        rcp.bus
            .to_host
            .push_back(reset_ind(version(2, 0, 1), version(2, 3, 0), "RCP", eui()));
        assert!(matches!(rcp.rx().unwrap(), Some(RcpEvent::Reset)));
        assert_eq!(rcp.state(), RcpState::WaitingRfList);
        assert_eq!(rcp.eui64.0, eui());
        assert_eq!(rcp.version_label, "RCP");

        rcp.set_host_api(version(2, 0, 0)).unwrap();
        rcp.req_radio_list().unwrap();
        rcp.bus
            .to_host
            .push_back(radio_list_cnf(true, &[SAMPLE_CONFIG]));
        assert!(rcp.rx().unwrap().is_none());
        rcp.bus.to_host.push_back(radio_list_cnf(false, &[]));
        assert!(matches!(rcp.rx().unwrap(), Some(RcpEvent::RadioListReady)));
        assert_eq!(rcp.state(), RcpState::Ready);
        assert_eq!(rcp.rail_config_list, vec![SAMPLE_CONFIG]);
    }

    #[test]
    fn old_api_rejected() {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.req_reset().unwrap();
        rcp.bus
            .to_host
            .push_back(reset_ind(version(1, 9, 9), 0, "old", eui()));
        assert!(matches!(rcp.rx(), Err(RcpError::Incompatible(1, 9, 9))));
    }

    #[test]
    fn reset_after_ready_is_fatal() {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.req_reset().unwrap();
        rcp.bus
            .to_host
            .push_back(reset_ind(version(2, 0, 0), 0, "RCP", eui()));
        rcp.rx().unwrap();
        rcp.bus.to_host.push_back(radio_list_cnf(false, &[]));
        rcp.rx().unwrap();

        rcp.bus
            .to_host
            .push_back(reset_ind(version(2, 0, 0), 0, "RCP", eui()));
        assert!(matches!(rcp.rx(), Err(RcpError::UnexpectedReset)));
    }

    #[test]
    #[should_panic(expected = "data tx in state")]
    fn tx_outside_ready_is_programmer_error() {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.req_reset().unwrap();
        let _ = rcp.req_data_tx(
            &[0; 4],
            1,
            FhssType::Async,
            None,
            None,
            None,
            ModeSwitchType::Phy,
        );
    }

    #[test]
    fn rx_ind_and_tx_cnf_round_trip() {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.bus.to_host.push_back(rx_ind(&[1, 2, 3], 42));
        match rcp.rx().unwrap() {
            Some(RcpEvent::RxInd(ind)) => {
                assert_eq!(ind.frame, vec![1, 2, 3]);
                assert_eq!(ind.timestamp_us, 42);
                assert_eq!(ind.channel, 5);
                assert_eq!(ind.rssi_dbm, -70);
                assert_eq!(ind.lqi, 200);
            }
            other => panic!("unexpected event {:?}", other),
        }

        rcp.bus
            .to_host
            .push_back(tx_cnf(7, HifStatus::NoAck, &[], 43));
        match rcp.rx().unwrap() {
            Some(RcpEvent::TxCnf(cnf)) => {
                assert_eq!(cnf.handle, 7);
                assert_eq!(cnf.status, HifStatus::NoAck);
                assert!(cnf.frame.is_empty());
                assert_eq!(cnf.timestamp_us, 43);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn data_tx_request_layout() {
        let mut rcp = Rcp::new(FakeBus::default());
        rcp.req_reset().unwrap();
        rcp.bus
            .to_host
            .push_back(reset_ind(version(2, 0, 0), 0, "RCP", eui()));
        rcp.rx().unwrap();
        rcp.bus.to_host.push_back(radio_list_cnf(false, &[]));
        rcp.rx().unwrap();
        // Consume the reset request from the capture.
        rcp.bus.from_host.clear();

        let fhss = FhssUcSchedule::default();
        rcp.req_data_tx(
            &[0xaa, 0xbb],
            9,
            FhssType::FfnUc,
            Some(&fhss),
            Some(&[1, 2, 3, 4]),
            None,
            ModeSwitchType::Mac,
        )
        .unwrap();

        let req = &rcp.bus.from_host[0];
        assert_eq!(req[0], HifCmd::ReqDataTx as u8);
        assert_eq!(req[1], 9);
        assert_eq!(u16::from_le_bytes([req[2], req[3]]), 2);
        assert_eq!(&req[4..6], &[0xaa, 0xbb]);
        assert_eq!(req[6], FhssType::FfnUc as u8);
        assert_eq!(req[7], TX_FLAG_FHSS | TX_FLAG_FRAME_COUNTERS | TX_FLAG_MS_MAC);
    }
}
