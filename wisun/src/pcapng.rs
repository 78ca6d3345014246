// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Minimal pcap-ng stream: one section, one 802.15.4 interface, one
//! enhanced packet block per frame, stamped with the RCP timestamp (the
//! default if_tsresol of 10^-6 matches the RCP's microsecond clock).

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

const BLOCK_TYPE_SHB: u32 = 0x0a0d_0d0a;
const BLOCK_TYPE_IDB: u32 = 0x0000_0001;
const BLOCK_TYPE_EPB: u32 = 0x0000_0006;
const SHB_BYTE_ORDER_MAGIC: u32 = 0x1a2b_3c4d;
const LINKTYPE_IEEE802_15_4_NOFCS: u16 = 230;

pub struct PcapngWriter<W: Write> {
    out: W,
}

impl PcapngWriter<File> {
    pub fn create(path: &Path) -> io::Result<PcapngWriter<File>> {
        PcapngWriter::new(File::create(path)?)
    }
}

impl<W: Write> PcapngWriter<W> {
    pub fn new(out: W) -> io::Result<PcapngWriter<W>> {
        let mut writer = PcapngWriter { out };
        writer.write_shb()?;
        writer.write_idb()?;
        Ok(writer)
    }

    fn write_shb(&mut self) -> io::Result<()> {
        let mut block = Vec::with_capacity(28);
        block.extend_from_slice(&BLOCK_TYPE_SHB.to_le_bytes());
        block.extend_from_slice(&28u32.to_le_bytes());
        block.extend_from_slice(&SHB_BYTE_ORDER_MAGIC.to_le_bytes());
        block.extend_from_slice(&1u16.to_le_bytes()); // major
        block.extend_from_slice(&0u16.to_le_bytes()); // minor
        block.extend_from_slice(&u64::MAX.to_le_bytes()); // section length
        block.extend_from_slice(&28u32.to_le_bytes());
        self.out.write_all(&block)
    }

    fn write_idb(&mut self) -> io::Result<()> {
        let mut block = Vec::with_capacity(20);
        block.extend_from_slice(&BLOCK_TYPE_IDB.to_le_bytes());
        block.extend_from_slice(&20u32.to_le_bytes());
        block.extend_from_slice(&LINKTYPE_IEEE802_15_4_NOFCS.to_le_bytes());
        block.extend_from_slice(&0u16.to_le_bytes()); // reserved
        block.extend_from_slice(&0u32.to_le_bytes()); // snaplen: unlimited
        block.extend_from_slice(&20u32.to_le_bytes());
        self.out.write_all(&block)
    }

    /// Appends one frame as an enhanced packet block.
    pub fn write_frame(&mut self, timestamp_us: u64, frame: &[u8]) -> io::Result<()> {
        let padded = frame.len().div_ceil(4) * 4;
        let total = 32 + padded;
        let mut block = Vec::with_capacity(total);
        block.extend_from_slice(&BLOCK_TYPE_EPB.to_le_bytes());
        block.extend_from_slice(&(total as u32).to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes()); // interface 0
        block.extend_from_slice(&((timestamp_us >> 32) as u32).to_le_bytes());
        block.extend_from_slice(&(timestamp_us as u32).to_le_bytes());
        block.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        block.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        block.extend_from_slice(frame);
        block.resize(28 + padded, 0);
        block.extend_from_slice(&(total as u32).to_le_bytes());
        self.out.write_all(&block)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_layout() {
        let mut out = Vec::new();
        {
            let mut writer = PcapngWriter::new(&mut out).unwrap();
            writer.write_frame(0x1_0000_0002, &[1, 2, 3]).unwrap();
        }
        // SHB magic at offset 8.
        assert_eq!(&out[8..12], &SHB_BYTE_ORDER_MAGIC.to_le_bytes());
        // IDB linktype.
        assert_eq!(&out[36..38], &LINKTYPE_IEEE802_15_4_NOFCS.to_le_bytes());
        // EPB: block length accounts for padding to 32 bits.
        let epb = &out[48..];
        assert_eq!(&epb[0..4], &BLOCK_TYPE_EPB.to_le_bytes());
        assert_eq!(u32::from_le_bytes(epb[4..8].try_into().unwrap()), 36);
        assert_eq!(u32::from_le_bytes(epb[12..16].try_into().unwrap()), 1); // ts high
        assert_eq!(u32::from_le_bytes(epb[16..20].try_into().unwrap()), 2); // ts low
        assert_eq!(u32::from_le_bytes(epb[20..24].try_into().unwrap()), 3); // cap len
        assert_eq!(&epb[28..31], &[1, 2, 3]);
        assert_eq!(epb.len(), 36);
    }
}
