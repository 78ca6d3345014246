// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Command-line configuration of the router.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wsrd", about = "Wi-SUN router", version)]
pub struct Config {
    /// Serial device connected to the RCP.
    #[arg(short = 'u', long, value_name = "DEVICE")]
    pub uart_device: String,

    /// UART baud rate.
    #[arg(long, default_value_t = 115_200)]
    pub uart_baudrate: u32,

    /// Wi-SUN network name of the PAN to join.
    #[arg(short = 'n', long, value_name = "NAME")]
    pub network_name: String,

    /// Group transient key of the PAN, as 32 hex digits.
    #[arg(long, value_parser = parse_key)]
    pub gtk: [u8; 16],

    /// PHY mode ID to select among the RCP's radio configurations.
    #[arg(long, default_value_t = 0x51, value_parser = parse_u8)]
    pub phy_mode_id: u8,

    /// First channel center frequency, in Hz.
    #[arg(long, default_value_t = 863_100_000)]
    pub chan0_freq: u32,

    /// Channel spacing, in Hz.
    #[arg(long, default_value_t = 100_000)]
    pub chan_spacing: u32,

    /// Number of channels in the plan.
    #[arg(long, default_value_t = 69)]
    pub chan_count: u16,

    /// Allowed channel ranges, e.g. "0-68" or "0-10,20-30".
    #[arg(long, default_value = "0-255")]
    pub allowed_channels: String,

    /// Unicast dwell interval, in milliseconds.
    #[arg(long, default_value_t = 255)]
    pub uc_dwell_interval: u8,

    /// TUN interface name.
    #[arg(long, default_value = "tunwsrd")]
    pub tun_device: String,

    /// MTU of the TUN interface.
    #[arg(long, default_value_t = 1280)]
    pub mtu: u16,

    /// Write a pcap-ng capture of every frame to this file.
    #[arg(long, value_name = "FILE")]
    pub pcap_file: Option<PathBuf>,

    /// List the RCP's radio configurations and exit.
    #[arg(long)]
    pub list_rf_configs: bool,
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let result = match s.strip_prefix("0x") {
        Some(hexval) => u8::from_str_radix(hexval, 16),
        None => s.parse(),
    };
    result.map_err(|e| e.to_string())
}

fn parse_key(s: &str) -> Result<[u8; 16], String> {
    let bytes = hex::decode(s).map_err(|e| e.to_string())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| "expected 32 hex digits".to_string())
}

impl Config {
    pub fn chan_mask(&self) -> Result<[u8; 32], String> {
        wisun::hif::chan_mask(&self.allowed_channels, self.chan_count)
    }
}
