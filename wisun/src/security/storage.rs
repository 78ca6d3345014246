// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Persistent authenticator key storage.
//!
//! A size-minimized image of each supplicant's pairwise state, enough to
//! resume the authenticator after a restart without forcing every node
//! through a full authentication: PMK, PTK, the EUI-64 the PTK was
//! derived against, the inserted-GTK hash prefixes, a 16-bit replay
//! counter and short-format (minutes) lifetimes. Records are fixed width
//! and keyed by EUI-64; this is the only state the daemon persists.

use crate::net::ieee802154::Eui64;
use crate::net::stream::SResult;
use crate::net::stream::{decode_bytes, decode_u16, decode_u8};
use crate::net::stream::{encode_bytes, encode_u16, encode_u8};
use crate::security::keys::{SecKeys, GTK_NUM, INS_GTK_HASH_LEN, PMK_LEN, PTK_LEN};

use std::fs;
use std::io;
use std::path::Path;

pub const STORAGE_RECORD_LEN: usize =
    8 + PMK_LEN + PTK_LEN + 8 + 2 * GTK_NUM * INS_GTK_HASH_LEN + 2 + 2 + 2 + 1 + 1 + 1;

const FLAG_PMK_SET: u8 = 1 << 0;
const FLAG_PTK_SET: u8 = 1 << 1;
const FLAG_REPLAY_CNT_SET: u8 = 1 << 2;
const FLAG_PTK_EUI64_SET: u8 = 1 << 3;

/// One supplicant's persisted state.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StorageRecord {
    pub eui64: Eui64,
    pub pmk: [u8; PMK_LEN],
    pub ptk: [u8; PTK_LEN],
    pub ptk_eui64: [u8; 8],
    pub ins_gtk_hash: [[u8; INS_GTK_HASH_LEN]; GTK_NUM],
    pub ins_lgtk_hash: [[u8; INS_GTK_HASH_LEN]; GTK_NUM],
    pub pmk_replay_cnt: u16,
    pub pmk_lifetime_m: u16,
    pub ptk_lifetime_m: u16,
    pub ins_gtk_hash_set: u8,
    pub ins_lgtk_hash_set: u8,
    flags: u8,
}

fn lifetime_to_short(seconds: u32) -> u16 {
    (seconds / 60).min(u16::MAX as u32) as u16
}

fn lifetime_from_short(minutes: u16) -> u32 {
    minutes as u32 * 60
}

impl StorageRecord {
    pub fn from_keys(eui64: Eui64, keys: &SecKeys) -> StorageRecord {
        let mut flags = 0;
        let mut pmk = [0; PMK_LEN];
        if let Some(k) = keys.pmk_get() {
            pmk = *k;
            flags |= FLAG_PMK_SET;
        }
        let mut ptk = [0; PTK_LEN];
        if let Some(k) = keys.ptk_get() {
            ptk = *k;
            flags |= FLAG_PTK_SET;
        }
        let mut ptk_eui64 = [0; 8];
        if let Some(eui) = keys.ptk_eui64_get() {
            ptk_eui64 = eui.0;
            flags |= FLAG_PTK_EUI64_SET;
        }
        if keys.pmk_replay_cnt_set {
            flags |= FLAG_REPLAY_CNT_SET;
        }
        StorageRecord {
            eui64,
            pmk,
            ptk,
            ptk_eui64,
            ins_gtk_hash: keys.gtks.ins_gtk_hash,
            ins_lgtk_hash: keys.lgtks.ins_gtk_hash,
            pmk_replay_cnt: keys.pmk_replay_cnt_wire(),
            pmk_lifetime_m: lifetime_to_short(keys.pmk_lifetime),
            ptk_lifetime_m: lifetime_to_short(keys.ptk_lifetime),
            ins_gtk_hash_set: keys.gtks.ins_gtk_hash_set,
            ins_lgtk_hash_set: keys.lgtks.ins_gtk_hash_set,
            flags,
        }
    }

    pub fn to_keys(&self) -> SecKeys {
        let mut keys = SecKeys::new();
        if self.flags & FLAG_PMK_SET != 0 {
            keys.pmk_write(&self.pmk, lifetime_from_short(self.pmk_lifetime_m));
        }
        if self.flags & FLAG_PTK_SET != 0 {
            keys.ptk_write(&self.ptk, lifetime_from_short(self.ptk_lifetime_m));
        }
        if self.flags & FLAG_PTK_EUI64_SET != 0 {
            keys.ptk_eui64_write(Eui64(self.ptk_eui64));
        }
        if self.flags & FLAG_REPLAY_CNT_SET != 0 {
            keys.pmk_replay_cnt_restore(self.pmk_replay_cnt);
        }
        keys.gtks.ins_gtk_hash = self.ins_gtk_hash;
        keys.gtks.ins_gtk_hash_set = self.ins_gtk_hash_set;
        keys.lgtks.ins_gtk_hash = self.ins_lgtk_hash;
        keys.lgtks.ins_gtk_hash_set = self.ins_lgtk_hash_set;
        keys
    }

    fn encode(&self, buf: &mut [u8]) -> SResult {
        let mut off = enc_consume!(buf; encode_bytes, &self.eui64.0);
        off = enc_consume!(buf, off; encode_bytes, &self.pmk);
        off = enc_consume!(buf, off; encode_bytes, &self.ptk);
        off = enc_consume!(buf, off; encode_bytes, &self.ptk_eui64);
        for hash in self.ins_gtk_hash.iter().chain(self.ins_lgtk_hash.iter()) {
            off = enc_consume!(buf, off; encode_bytes, hash);
        }
        off = enc_consume!(buf, off; encode_u16, self.pmk_replay_cnt);
        off = enc_consume!(buf, off; encode_u16, self.pmk_lifetime_m);
        off = enc_consume!(buf, off; encode_u16, self.ptk_lifetime_m);
        off = enc_consume!(buf, off; encode_u8, self.ins_gtk_hash_set);
        off = enc_consume!(buf, off; encode_u8, self.ins_lgtk_hash_set);
        off = enc_consume!(buf, off; encode_u8, self.flags);
        stream_done!(off);
    }

    fn decode(buf: &[u8]) -> SResult<StorageRecord> {
        let mut record = StorageRecord {
            eui64: Eui64([0; 8]),
            pmk: [0; PMK_LEN],
            ptk: [0; PTK_LEN],
            ptk_eui64: [0; 8],
            ins_gtk_hash: [[0; INS_GTK_HASH_LEN]; GTK_NUM],
            ins_lgtk_hash: [[0; INS_GTK_HASH_LEN]; GTK_NUM],
            pmk_replay_cnt: 0,
            pmk_lifetime_m: 0,
            ptk_lifetime_m: 0,
            ins_gtk_hash_set: 0,
            ins_lgtk_hash_set: 0,
            flags: 0,
        };
        let (off, ()) = dec_try!(buf; decode_bytes, &mut record.eui64.0);
        let (off, ()) = dec_try!(buf, off; decode_bytes, &mut record.pmk);
        let (off, ()) = dec_try!(buf, off; decode_bytes, &mut record.ptk);
        let (mut off, ()) = dec_try!(buf, off; decode_bytes, &mut record.ptk_eui64);
        for i in 0..GTK_NUM {
            let (o, ()) = dec_try!(buf, off; decode_bytes, &mut record.ins_gtk_hash[i]);
            off = o;
        }
        for i in 0..GTK_NUM {
            let (o, ()) = dec_try!(buf, off; decode_bytes, &mut record.ins_lgtk_hash[i]);
            off = o;
        }
        let (off, pmk_replay_cnt) = dec_try!(buf, off; decode_u16);
        let (off, pmk_lifetime_m) = dec_try!(buf, off; decode_u16);
        let (off, ptk_lifetime_m) = dec_try!(buf, off; decode_u16);
        let (off, ins_gtk_hash_set) = dec_try!(buf, off; decode_u8);
        let (off, ins_lgtk_hash_set) = dec_try!(buf, off; decode_u8);
        let (off, flags) = dec_try!(buf, off; decode_u8);
        record.pmk_replay_cnt = pmk_replay_cnt;
        record.pmk_lifetime_m = pmk_lifetime_m;
        record.ptk_lifetime_m = ptk_lifetime_m;
        record.ins_gtk_hash_set = ins_gtk_hash_set;
        record.ins_lgtk_hash_set = ins_lgtk_hash_set;
        record.flags = flags;
        stream_done!(off, record);
    }
}

/// Writes all records to `path`, replacing the previous dump.
pub fn store(path: &Path, records: &[StorageRecord]) -> io::Result<()> {
    let mut data = vec![0; records.len() * STORAGE_RECORD_LEN];
    for (i, record) in records.iter().enumerate() {
        record
            .encode(&mut data[i * STORAGE_RECORD_LEN..(i + 1) * STORAGE_RECORD_LEN])
            .done()
            .expect("record buffer is sized for the fixed-width record");
    }
    fs::write(path, data)
}

/// Loads a dump written by [`store`]. A file whose size is not a whole
/// number of records is rejected rather than partially applied.
pub fn load(path: &Path) -> io::Result<Vec<StorageRecord>> {
    let data = fs::read(path)?;
    if data.len() % STORAGE_RECORD_LEN != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "truncated key storage",
        ));
    }
    let mut records = Vec::with_capacity(data.len() / STORAGE_RECORD_LEN);
    for chunk in data.chunks_exact(STORAGE_RECORD_LEN) {
        match StorageRecord::decode(chunk).done() {
            Some((_, record)) => records.push(record),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "corrupt key storage record",
                ))
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys() -> SecKeys {
        let mut keys = SecKeys::new();
        keys.pmk_write(&[0xaa; PMK_LEN], 120 * 60);
        keys.ptk_write(&[0xbb; PTK_LEN], 60 * 60);
        keys.ptk_eui64_write(Eui64([2, 0, 0, 0, 0, 0, 0, 9]));
        keys.pmk_replay_cnt_increment();
        keys.gtks.ins_gtk_hash[2] = [0x12, 0x34];
        keys.gtks.ins_gtk_hash_set = 1 << 2;
        keys
    }

    #[test]
    fn record_round_trip() {
        let eui = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        let record = StorageRecord::from_keys(eui, &sample_keys());
        let mut buf = [0; STORAGE_RECORD_LEN];
        let (len, ()) = record.encode(&mut buf).done().unwrap();
        assert_eq!(len, STORAGE_RECORD_LEN);
        let (_, decoded) = StorageRecord::decode(&buf).done().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn keys_survive_restore() {
        let eui = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        let keys = sample_keys();
        let restored = StorageRecord::from_keys(eui, &keys).to_keys();
        assert_eq!(restored.pmk_get(), keys.pmk_get());
        assert_eq!(restored.ptk_get(), keys.ptk_get());
        assert_eq!(restored.ptk_eui64_get(), keys.ptk_eui64_get());
        assert_eq!(restored.pmk_replay_cnt_wire(), keys.pmk_replay_cnt_wire());
        assert_eq!(restored.pmk_lifetime, keys.pmk_lifetime);
        assert_eq!(restored.gtks.ins_gtk_hash_set, 1 << 2);
        assert_eq!(restored.gtks.ins_gtk_hash[2], [0x12, 0x34]);
    }

    #[test]
    fn dump_and_load() {
        let dir = std::env::temp_dir().join("wisun-storage-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("keys");
        let records = vec![
            StorageRecord::from_keys(Eui64([2, 0, 0, 0, 0, 0, 0, 1]), &sample_keys()),
            StorageRecord::from_keys(Eui64([2, 0, 0, 0, 0, 0, 0, 2]), &SecKeys::new()),
        ];
        store(&path, &records).unwrap();
        assert_eq!(load(&path).unwrap(), records);

        fs::write(&path, [0; STORAGE_RECORD_LEN - 1]).unwrap();
        assert!(load(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}
