// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! EAPOL key storage.
//!
//! Holds the per-network group transient key rings and the per-supplicant
//! pairwise state (PMK, PTK, replay counter, liveness and inserted-key
//! bookkeeping). Used as supplicant storage on a router and as
//! authenticator storage for each supplicant on a border router.
//!
//! Single writer: all mutation happens from the EAPOL pipeline, which
//! runs to completion on the daemon thread, so no locking is involved.
//! Cryptographic primitives (SHA-256, HMAC-SHA1) come from the crypto
//! backend crates; this module only sequences them.

use crate::net::ieee802154::Eui64;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub const PMK_LEN: usize = 32;
pub const PTK_LEN: usize = 48;
pub const GTK_LEN: usize = 16;
pub const GTK_NUM: usize = 4;
pub const LGTK_NUM: usize = 3;

pub const KCK_LEN: usize = 16;
pub const KEK_LEN: usize = 16;
pub const KCK_INDEX: usize = 0;
pub const KEK_INDEX: usize = 16;

pub const GTK_HASH_LEN: usize = 8;
pub const INS_GTK_HASH_LEN: usize = 2;

pub const GTK_DEFAULT_LIFETIME: u32 = 60 * 60 * 24 * 30; // 30 days
/// A supplicant reports a lifetime mismatch if a GTK expires within this.
pub const GTK_EXPIRE_MISMATCH_TIME: u32 = 60;
/// Maximum lifetime for PMK, PTK, GTKs (two years).
pub const SEC_MAXIMUM_LIFETIME: u32 = 60 * 60 * 24 * 30 * 24;

/// Upper limit for the PMK replay counter; 16 bits go on the wire.
pub const PMK_REPLAY_CNT_LIMIT: u64 = 60_000;
pub const PMK_REPLAY_CNT_MASK: u64 = 0xffff;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid gtk index")]
    InvalidIndex,
    #[error("invalid gtk (all zero)")]
    InvalidKey,
    #[error("gtk status does not allow transition")]
    InvalidStatus,
}

/// Lifecycle of one GTK slot. Transitions are strictly
/// `New → Fresh → Active → Old`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum GtkStatus {
    /// Installed but not yet distributed.
    #[default]
    New,
    /// Distributed, usable for reception, not yet used for sending.
    Fresh,
    /// The key used for sending. At most one slot per ring.
    Active,
    /// Superseded; kept for reception until expiry.
    Old,
}

#[derive(Copy, Clone, Default)]
struct GtkSlot {
    key: [u8; GTK_LEN],
    lifetime: u32,
    status: GtkStatus,
    install_order: u8,
    set: bool,
}

/// One ring of group transient keys: four slots for the FFN GTKs, three
/// for the LFN LGTKs.
///
/// Install orders on present slots are kept dense: a permutation of
/// `0..present_count`, with 0 the key installed longest ago.
pub struct GtkRing {
    gtk: [GtkSlot; GTK_NUM],
    slot_count: usize,
    updated: bool,
}

impl GtkRing {
    pub fn new_gtk() -> GtkRing {
        GtkRing {
            gtk: [GtkSlot::default(); GTK_NUM],
            slot_count: GTK_NUM,
            updated: false,
        }
    }

    pub fn new_lgtk() -> GtkRing {
        GtkRing {
            gtk: [GtkSlot::default(); GTK_NUM],
            slot_count: LGTK_NUM,
            updated: false,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Installs `key` into `index`. A previously empty slot gets the next
    /// install order; re-installing the identical key only refreshes the
    /// lifetime.
    pub fn gtk_set(
        &mut self,
        index: usize,
        key: &[u8; GTK_LEN],
        lifetime: u32,
    ) -> Result<(), KeyError> {
        if index >= self.slot_count {
            return Err(KeyError::InvalidIndex);
        }
        if !gtk_valid_check(key) {
            return Err(KeyError::InvalidKey);
        }
        let lifetime = lifetime.min(SEC_MAXIMUM_LIFETIME);
        if self.gtk[index].set && self.gtk[index].key == *key {
            self.gtk[index].lifetime = lifetime;
            self.updated = true;
            return Ok(());
        }
        if self.gtk[index].set {
            // Replacing a different key: the slot becomes the newest
            // install again.
            self.clear_slot(index);
        }
        self.gtk[index] = GtkSlot {
            key: *key,
            lifetime,
            status: GtkStatus::New,
            install_order: self.install_order_last().map_or(0, |o| o + 1),
            set: true,
        };
        self.updated = true;
        Ok(())
    }

    /// Removes the slot and compacts the install orders of the others.
    pub fn gtk_clear(&mut self, index: usize) -> Result<(), KeyError> {
        if index >= self.slot_count {
            return Err(KeyError::InvalidIndex);
        }
        self.clear_slot(index);
        self.updated = true;
        Ok(())
    }

    fn clear_slot(&mut self, index: usize) {
        if !self.gtk[index].set {
            return;
        }
        let removed_order = self.gtk[index].install_order;
        self.gtk[index] = GtkSlot::default();
        for slot in self.gtk.iter_mut() {
            if slot.set && slot.install_order > removed_order {
                slot.install_order -= 1;
            }
        }
    }

    pub fn gtk_is_set(&self, index: usize) -> bool {
        index < self.slot_count && self.gtk[index].set
    }

    pub fn gtk_get(&self, index: usize) -> Option<&[u8; GTK_LEN]> {
        self.gtk_is_set(index).then(|| &self.gtk[index].key)
    }

    pub fn lifetime_get(&self, index: usize) -> u32 {
        if self.gtk_is_set(index) {
            self.gtk[index].lifetime
        } else {
            0
        }
    }

    pub fn status_get(&self, index: usize) -> Option<GtkStatus> {
        self.gtk_is_set(index).then(|| self.gtk[index].status)
    }

    /// Promotes `New → Fresh`; any other status is left alone.
    pub fn status_fresh_set(&mut self, index: usize) {
        if self.gtk_is_set(index) && self.gtk[index].status == GtkStatus::New {
            self.gtk[index].status = GtkStatus::Fresh;
            self.updated = true;
        }
    }

    pub fn status_all_fresh_set(&mut self) {
        for index in 0..self.slot_count {
            self.status_fresh_set(index);
        }
    }

    /// Promotes a `Fresh` key to `Active`, demoting the previously active
    /// key (if any) to `Old`.
    pub fn status_active_set(&mut self, index: usize) -> Result<(), KeyError> {
        if !self.gtk_is_set(index) {
            return Err(KeyError::InvalidIndex);
        }
        if self.gtk[index].status != GtkStatus::Fresh {
            return Err(KeyError::InvalidStatus);
        }
        if let Some(active) = self.status_active_get() {
            self.gtk[active].status = GtkStatus::Old;
        }
        self.gtk[index].status = GtkStatus::Active;
        self.updated = true;
        Ok(())
    }

    pub fn status_active_get(&self) -> Option<usize> {
        (0..self.slot_count).find(|&i| self.gtk[i].set && self.gtk[i].status == GtkStatus::Active)
    }

    /// A key is live once distributed: `Fresh` or `Active`.
    pub fn status_is_live(&self, index: usize) -> bool {
        matches!(
            self.status_get(index),
            Some(GtkStatus::Fresh) | Some(GtkStatus::Active)
        )
    }

    /// GTK liveness bitmap as advertised to peers (GTKL).
    pub fn fresh_gtkl_get(&self) -> u8 {
        let mut gtkl = 0;
        for index in 0..self.slot_count {
            if self.status_is_live(index) {
                gtkl |= 1 << index;
            }
        }
        gtkl
    }

    fn install_order_last(&self) -> Option<u8> {
        self.gtk
            .iter()
            .take(self.slot_count)
            .filter(|s| s.set)
            .map(|s| s.install_order)
            .max()
    }

    /// Slot index carrying install order `order`.
    pub fn install_order_index(&self, order: u8) -> Option<usize> {
        (0..self.slot_count).find(|&i| self.gtk[i].set && self.gtk[i].install_order == order)
    }

    /// The key that has been installed the longest.
    pub fn install_order_first_index(&self) -> Option<usize> {
        self.install_order_index(0)
    }

    pub fn install_order_second_index(&self) -> Option<usize> {
        self.install_order_index(1)
    }

    /// The most recently installed key.
    pub fn install_order_last_index(&self) -> Option<usize> {
        self.install_order_last()
            .and_then(|order| self.install_order_index(order))
    }

    pub fn install_order_last_lifetime(&self) -> u32 {
        self.install_order_last_index()
            .map_or(0, |i| self.gtk[i].lifetime)
    }

    /// Picks the slot a new key should be installed into: the first free
    /// slot, or the oldest key when the ring is full.
    pub fn install_index_get(&self) -> usize {
        (0..self.slot_count)
            .find(|&i| !self.gtk[i].set)
            .or_else(|| self.install_order_first_index())
            .unwrap_or(0)
    }

    /// Decrements the lifetime of slot `index` by `seconds` and returns
    /// the remaining lifetime. With `allow_status_update`, a key reaching
    /// zero is cleared from the ring.
    pub fn lifetime_decrement(
        &mut self,
        index: usize,
        seconds: u32,
        allow_status_update: bool,
    ) -> u32 {
        if !self.gtk_is_set(index) {
            return 0;
        }
        let lifetime = self.gtk[index].lifetime.saturating_sub(seconds);
        self.gtk[index].lifetime = lifetime;
        if lifetime == 0 && allow_status_update {
            self.clear_slot(index);
            self.updated = true;
        }
        lifetime
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn updated_reset(&mut self) {
        self.updated = false;
    }

    /// 8-byte hash of each slot for the on-air GTK hash advertisement;
    /// absent slots hash to all zeros. A pure function of the key bytes.
    pub fn hash_generate(&self) -> [[u8; GTK_HASH_LEN]; GTK_NUM] {
        let mut hashes = [[0; GTK_HASH_LEN]; GTK_NUM];
        for index in 0..self.slot_count {
            if let Some(key) = self.gtk_get(index) {
                hashes[index] = gtk_hash(key);
            }
        }
        hashes
    }
}

/// SHA-256 of the key, truncated to eight bytes. Bit-exact with deployed
/// Wi-SUN peers.
pub fn gtk_hash(gtk: &[u8; GTK_LEN]) -> [u8; GTK_HASH_LEN] {
    let digest = Sha256::digest(gtk);
    let mut hash = [0; GTK_HASH_LEN];
    hash.copy_from_slice(&digest[..GTK_HASH_LEN]);
    hash
}

/// An all-zero GTK is not a valid key.
pub fn gtk_valid_check(gtk: &[u8; GTK_LEN]) -> bool {
    gtk.iter().any(|&b| b != 0)
}

/// Draws a fresh random GTK.
pub fn generate_gtk() -> [u8; GTK_LEN] {
    let mut gtk = [0; GTK_LEN];
    while !gtk_valid_check(&gtk) {
        rand::thread_rng().fill_bytes(&mut gtk);
    }
    gtk
}

/// GAK = SHA-256(network name ‖ GTK) truncated to 128 bits, the key
/// actually installed into the RCP for link-layer encryption.
pub fn generate_gak(network_name: &str, gtk: &[u8; GTK_LEN]) -> [u8; GTK_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(network_name.as_bytes());
    hasher.update(gtk);
    let digest = hasher.finalize();
    let mut gak = [0; GTK_LEN];
    gak.copy_from_slice(&digest[..GTK_LEN]);
    gak
}

/// Result of checking a peer's view of a GTK against ours. The order is
/// the priority order: a hash mismatch shadows a lifetime mismatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GtkMismatch {
    None,
    Lifetime,
    Hash,
}

impl GtkMismatch {
    fn priority(self) -> u8 {
        match self {
            GtkMismatch::None => 0,
            GtkMismatch::Lifetime => 1,
            GtkMismatch::Hash => 2,
        }
    }
}

impl PartialOrd for GtkMismatch {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GtkMismatch {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// Compares an advertised hash to the ring's slot: absent or different
/// key is a hash mismatch, a nearly expired key a lifetime mismatch.
pub fn gtk_mismatch(ring: &GtkRing, index: usize, advertised: &[u8; GTK_HASH_LEN]) -> GtkMismatch {
    match ring.gtk_get(index) {
        None => GtkMismatch::Hash,
        Some(key) if gtk_hash(key) != *advertised => GtkMismatch::Hash,
        Some(_) if ring.lifetime_get(index) < GTK_EXPIRE_MISMATCH_TIME => GtkMismatch::Lifetime,
        Some(_) => GtkMismatch::None,
    }
}

/// Per-ring supplicant bookkeeping: which of our GTKs the peer holds
/// (GTKL), which one we are inserting next, and the 2-byte prefixes of
/// the hashes of GTKs inserted under the current PTK. The prefixes detect
/// a peer re-using a PTK across a GTK change.
#[derive(Copy, Clone, Default)]
pub struct SecGtks {
    pub ins_gtk_hash: [[u8; INS_GTK_HASH_LEN]; GTK_NUM],
    pub ins_gtk_hash_set: u8,
    pub gtkl: u8,
    pub gtk_set_index: Option<usize>,
}

impl SecGtks {
    pub fn gtkl_set(&mut self, gtkl: u8) {
        self.gtkl = gtkl;
    }

    pub fn gtk_is_live(&self, index: usize) -> bool {
        self.gtkl & (1 << index) != 0
    }

    pub fn gtk_live_set(&mut self, index: usize) -> Result<(), KeyError> {
        if index >= GTK_NUM {
            return Err(KeyError::InvalidIndex);
        }
        self.gtkl |= 1 << index;
        Ok(())
    }

    pub fn insert_index_set(&mut self, index: usize) -> Result<(), KeyError> {
        if index >= GTK_NUM {
            return Err(KeyError::InvalidIndex);
        }
        self.gtk_set_index = Some(index);
        Ok(())
    }

    pub fn insert_index_get(&self) -> Option<usize> {
        self.gtk_set_index
    }

    pub fn insert_index_clear(&mut self) {
        self.gtk_set_index = None;
    }

    /// Marks the GTK chosen for insertion as live at the peer.
    pub fn gtkl_from_insert_index_set(&mut self) {
        if let Some(index) = self.gtk_set_index {
            self.gtkl |= 1 << index;
        }
    }

    /// Next GTK to hand to this peer: lowest install order among keys
    /// that are live in the ring but not yet live at the peer.
    pub fn insert_index_from_gtkl(&self, ring: &GtkRing) -> Option<usize> {
        for order in 0..ring.slot_count() as u8 {
            if let Some(index) = ring.install_order_index(order) {
                if ring.status_is_live(index) && !self.gtk_is_live(index) {
                    return Some(index);
                }
            }
        }
        None
    }

    pub fn gtk_to_insert<'a>(&self, ring: &'a GtkRing) -> Option<(usize, &'a [u8; GTK_LEN])> {
        let index = self.gtk_set_index?;
        ring.gtk_get(index).map(|key| (index, key))
    }

    pub fn ins_gtk_hash_clear_all(&mut self) {
        self.ins_gtk_hash = [[0; INS_GTK_HASH_LEN]; GTK_NUM];
        self.ins_gtk_hash_set = 0;
    }

    /// Records the hash prefix of the GTK being inserted under the
    /// current PTK. A four-way handshake establishes fresh PTK usage and
    /// resets the earlier records.
    pub fn ins_gtk_hash_set(&mut self, ring: &GtkRing, is_4wh: bool) {
        if is_4wh {
            self.ins_gtk_hash_clear_all();
        }
        if let Some((index, key)) = self.gtk_to_insert(ring) {
            let hash = gtk_hash(key);
            self.ins_gtk_hash[index].copy_from_slice(&hash[..INS_GTK_HASH_LEN]);
            self.ins_gtk_hash_set |= 1 << index;
        }
    }

    /// True iff the ring's key at `index` no longer matches what was
    /// inserted to this supplicant under the current PTK.
    pub fn ins_gtk_hash_mismatch_check(&self, ring: &GtkRing, index: usize) -> bool {
        if index >= GTK_NUM || self.ins_gtk_hash_set & (1 << index) == 0 {
            return false;
        }
        match ring.gtk_get(index) {
            Some(key) => gtk_hash(key)[..INS_GTK_HASH_LEN] != self.ins_gtk_hash[index],
            None => false,
        }
    }
}

/// Pairwise security state for one peer relationship.
pub struct SecKeys {
    pmk: [u8; PMK_LEN],
    pub pmk_set: bool,
    pub pmk_lifetime: u32,
    pmk_replay_cnt: u64,
    pub pmk_replay_cnt_set: bool,
    pub pmk_mismatch: bool,

    ptk: [u8; PTK_LEN],
    pub ptk_set: bool,
    pub ptk_lifetime: u32,
    pub ptk_mismatch: bool,
    ptk_eui64: Option<Eui64>,

    pub gtks: SecGtks,
    pub lgtks: SecGtks,
    pub updated: bool,
}

impl Default for SecKeys {
    fn default() -> SecKeys {
        SecKeys {
            pmk: [0; PMK_LEN],
            pmk_set: false,
            pmk_lifetime: 0,
            pmk_replay_cnt: 0,
            pmk_replay_cnt_set: false,
            pmk_mismatch: false,
            ptk: [0; PTK_LEN],
            ptk_set: false,
            ptk_lifetime: 0,
            ptk_mismatch: false,
            ptk_eui64: None,
            gtks: SecGtks::default(),
            lgtks: SecGtks::default(),
            updated: false,
        }
    }
}

impl SecKeys {
    pub fn new() -> SecKeys {
        SecKeys::default()
    }

    pub fn pmk_write(&mut self, pmk: &[u8; PMK_LEN], lifetime: u32) {
        self.pmk = *pmk;
        self.pmk_set = true;
        self.pmk_lifetime = lifetime.min(SEC_MAXIMUM_LIFETIME);
        self.pmk_replay_cnt = 0;
        self.pmk_replay_cnt_set = false;
        self.pmk_mismatch = false;
        self.updated = true;
    }

    pub fn pmk_delete(&mut self) {
        self.pmk = [0; PMK_LEN];
        self.pmk_set = false;
        self.pmk_lifetime = 0;
        self.pmk_replay_cnt = 0;
        self.pmk_replay_cnt_set = false;
        self.updated = true;
    }

    pub fn pmk_get(&self) -> Option<&[u8; PMK_LEN]> {
        self.pmk_set.then_some(&self.pmk)
    }

    pub fn pmk_mismatch_reset(&mut self) {
        self.pmk_mismatch = false;
    }

    pub fn pmk_replay_cnt_get(&self) -> u64 {
        self.pmk_replay_cnt
    }

    /// 16-bit wire form of the replay counter; the retained high bits
    /// only distinguish never-set from zero internally.
    pub fn pmk_replay_cnt_wire(&self) -> u16 {
        (self.pmk_replay_cnt & PMK_REPLAY_CNT_MASK) as u16
    }

    /// Restores a persisted replay counter (authenticator restart).
    pub fn pmk_replay_cnt_restore(&mut self, cnt: u16) {
        self.pmk_replay_cnt = cnt as u64;
        self.pmk_replay_cnt_set = true;
    }

    /// Advances the replay counter, refusing to cross the rekey limit.
    pub fn pmk_replay_cnt_increment(&mut self) -> bool {
        if self.pmk_replay_cnt >= PMK_REPLAY_CNT_LIMIT {
            return false;
        }
        self.pmk_replay_cnt += 1;
        self.pmk_replay_cnt_set = true;
        true
    }

    /// Returns true when the PMK expired; expiry deletes both the PMK
    /// and the PTK derived from it.
    pub fn pmk_lifetime_decrement(&mut self, seconds: u32) -> bool {
        if !self.pmk_set {
            return false;
        }
        self.pmk_lifetime = self.pmk_lifetime.saturating_sub(seconds);
        if self.pmk_lifetime > 0 {
            return false;
        }
        self.pmk_delete();
        self.ptk_delete();
        true
    }

    pub fn ptk_write(&mut self, ptk: &[u8; PTK_LEN], lifetime: u32) {
        self.ptk = *ptk;
        self.ptk_set = true;
        self.ptk_lifetime = lifetime.min(SEC_MAXIMUM_LIFETIME);
        self.ptk_mismatch = false;
        // New PTK: the inserted-GTK records belong to the old one.
        self.gtks.ins_gtk_hash_clear_all();
        self.lgtks.ins_gtk_hash_clear_all();
        self.updated = true;
    }

    pub fn ptk_delete(&mut self) {
        self.ptk = [0; PTK_LEN];
        self.ptk_set = false;
        self.ptk_lifetime = 0;
        self.ptk_eui64 = None;
        self.updated = true;
    }

    pub fn ptk_get(&self) -> Option<&[u8; PTK_LEN]> {
        self.ptk_set.then_some(&self.ptk)
    }

    pub fn ptk_mismatch_reset(&mut self) {
        self.ptk_mismatch = false;
    }

    pub fn ptk_eui64_write(&mut self, eui64: Eui64) {
        self.ptk_eui64 = Some(eui64);
    }

    pub fn ptk_eui64_get(&self) -> Option<&Eui64> {
        self.ptk_eui64.as_ref()
    }

    /// Returns true when the PTK expired; only the PTK is deleted.
    pub fn ptk_lifetime_decrement(&mut self, seconds: u32) -> bool {
        if !self.ptk_set {
            return false;
        }
        self.ptk_lifetime = self.ptk_lifetime.saturating_sub(seconds);
        if self.ptk_lifetime > 0 {
            return false;
        }
        self.ptk_delete();
        true
    }
}

/// Key confirmation half of a PTK.
pub fn kck(ptk: &[u8; PTK_LEN]) -> &[u8] {
    &ptk[KCK_INDEX..KCK_INDEX + KCK_LEN]
}

/// Key encryption half of a PTK, the key the GTK travels under.
pub fn kek(ptk: &[u8; PTK_LEN]) -> &[u8] {
    &ptk[KEK_INDEX..KEK_INDEX + KEK_LEN]
}

/// PTK derivation: IEEE 802.11 PRF-384 keyed with the PMK over the
/// ordered EUI-64 pair and the ordered nonce pair.
pub fn derive_ptk(
    pmk: &[u8; PMK_LEN],
    local_eui64: &Eui64,
    remote_eui64: &Eui64,
    local_nonce: &[u8; 32],
    remote_nonce: &[u8; 32],
) -> [u8; PTK_LEN] {
    const LABEL: &[u8] = b"Pairwise key expansion";

    let (addr_min, addr_max) = if local_eui64.0 <= remote_eui64.0 {
        (local_eui64, remote_eui64)
    } else {
        (remote_eui64, local_eui64)
    };
    let (nonce_min, nonce_max) = if local_nonce <= remote_nonce {
        (local_nonce, remote_nonce)
    } else {
        (remote_nonce, local_nonce)
    };

    let mut ptk = [0; PTK_LEN];
    let mut written = 0;
    for i in 0u8.. {
        let mut mac = Hmac::<Sha1>::new_from_slice(pmk).expect("hmac accepts any key length");
        mac.update(LABEL);
        mac.update(&[0]);
        mac.update(&addr_min.0);
        mac.update(&addr_max.0);
        mac.update(nonce_min);
        mac.update(nonce_max);
        mac.update(&[i]);
        let block = mac.finalize().into_bytes();
        let take = block.len().min(PTK_LEN - written);
        ptk[written..written + take].copy_from_slice(&block[..take]);
        written += take;
        if written == PTK_LEN {
            break;
        }
    }
    ptk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> [u8; GTK_LEN] {
        [fill; GTK_LEN]
    }

    fn orders(ring: &GtkRing) -> Vec<(usize, u8)> {
        (0..ring.slot_count())
            .filter(|&i| ring.gtk_is_set(i))
            .map(|i| (i, ring.gtk[i].install_order))
            .collect()
    }

    #[test]
    fn all_zero_gtk_rejected() {
        let mut ring = GtkRing::new_gtk();
        assert_eq!(ring.gtk_set(0, &[0; GTK_LEN], 100), Err(KeyError::InvalidKey));
        assert!(!ring.gtk_is_set(0));
    }

    #[test]
    fn install_orders_stay_dense() {
        let mut ring = GtkRing::new_gtk();
        for i in 0..4 {
            ring.gtk_set(i, &key(i as u8 + 1), 100).unwrap();
        }
        assert_eq!(orders(&ring), vec![(0, 0), (1, 1), (2, 2), (3, 3)]);

        ring.gtk_clear(1).unwrap();
        assert_eq!(orders(&ring), vec![(0, 0), (2, 1), (3, 2)]);

        // The re-set slot becomes the newest install.
        ring.gtk_set(1, &key(9), 100).unwrap();
        assert_eq!(orders(&ring), vec![(0, 0), (1, 3), (2, 1), (3, 2)]);
    }

    #[test]
    fn clear_then_set_equals_set() {
        let mut a = GtkRing::new_gtk();
        let mut b = GtkRing::new_gtk();
        for ring in [&mut a, &mut b] {
            ring.gtk_set(0, &key(1), 100).unwrap();
            ring.gtk_set(2, &key(2), 200).unwrap();
        }
        a.gtk_clear(2).unwrap();
        a.gtk_set(2, &key(2), 200).unwrap();
        assert_eq!(orders(&a), orders(&b));
        assert_eq!(a.hash_generate(), b.hash_generate());
    }

    #[test]
    fn active_rotation() {
        let mut ring = GtkRing::new_gtk();
        ring.gtk_set(0, &key(1), 100).unwrap();
        ring.gtk_set(1, &key(2), 100).unwrap();
        ring.gtk_set(2, &key(3), 100).unwrap();
        ring.status_fresh_set(0);
        ring.status_active_set(0).unwrap();
        ring.status_fresh_set(1);

        // Ring: 0 active, 1 fresh, 2 new, 3 absent.
        ring.status_active_set(1).unwrap();
        assert_eq!(ring.status_get(1), Some(GtkStatus::Active));
        assert_eq!(ring.status_get(0), Some(GtkStatus::Old));
        assert_eq!(ring.status_get(2), Some(GtkStatus::New));
        assert_eq!(ring.status_get(3), None);
        assert_eq!(ring.status_active_get(), Some(1));
    }

    #[test]
    fn active_requires_fresh() {
        let mut ring = GtkRing::new_gtk();
        ring.gtk_set(0, &key(1), 100).unwrap();
        assert_eq!(ring.status_active_set(0), Err(KeyError::InvalidStatus));
        ring.status_fresh_set(0);
        ring.status_active_set(0).unwrap();
        // Already active: not fresh anymore.
        assert_eq!(ring.status_active_set(0), Err(KeyError::InvalidStatus));
    }

    #[test]
    fn at_most_one_active() {
        let mut ring = GtkRing::new_gtk();
        for i in 0..4 {
            ring.gtk_set(i, &key(i as u8 + 1), 100).unwrap();
            ring.status_fresh_set(i);
        }
        for i in 0..4 {
            ring.status_active_set(i).unwrap();
            let active = (0..4).filter(|&j| ring.status_get(j) == Some(GtkStatus::Active));
            assert_eq!(active.count(), 1);
        }
    }

    #[test]
    fn install_index_prefers_free_slot_then_oldest() {
        let mut ring = GtkRing::new_gtk();
        ring.gtk_set(0, &key(1), 100).unwrap();
        ring.gtk_set(1, &key(2), 100).unwrap();
        assert_eq!(ring.install_index_get(), 2);
        ring.gtk_set(2, &key(3), 100).unwrap();
        ring.gtk_set(3, &key(4), 100).unwrap();
        // Ring full: replace the key installed the longest ago.
        assert_eq!(ring.install_index_get(), 0);
        assert_eq!(ring.install_order_last_index(), Some(3));
        assert_eq!(ring.install_order_second_index(), Some(1));
        assert_eq!(ring.install_order_last_lifetime(), 100);
    }

    #[test]
    fn hash_is_pure_function_of_keys() {
        let mut a = GtkRing::new_gtk();
        let mut b = GtkRing::new_gtk();
        a.gtk_set(0, &key(1), 100).unwrap();
        a.gtk_set(1, &key(2), 100).unwrap();
        // Different insertion history, same final key bytes.
        b.gtk_set(1, &key(3), 5).unwrap();
        b.gtk_clear(1).unwrap();
        b.gtk_set(1, &key(2), 999).unwrap();
        b.gtk_set(0, &key(1), 100).unwrap();
        assert_eq!(a.hash_generate(), b.hash_generate());
        assert_eq!(a.hash_generate()[0], gtk_hash(&key(1)));
        assert_eq!(a.hash_generate()[2], [0; GTK_HASH_LEN]);
    }

    #[test]
    fn lifetime_expiry_clears_slot() {
        let mut ring = GtkRing::new_gtk();
        ring.gtk_set(0, &key(1), 100).unwrap();
        assert_eq!(ring.lifetime_decrement(0, 40, true), 60);
        assert_eq!(ring.lifetime_decrement(0, 70, false), 0);
        assert!(ring.gtk_is_set(0));
        assert_eq!(ring.lifetime_decrement(0, 1, true), 0);
        assert!(!ring.gtk_is_set(0));
    }

    #[test]
    fn replay_counter_saturates() {
        let mut keys = SecKeys::new();
        keys.pmk_write(&[1; PMK_LEN], 1000);
        for _ in 0..59_999 {
            assert!(keys.pmk_replay_cnt_increment());
        }
        assert_eq!(keys.pmk_replay_cnt_get(), 59_999);
        assert!(keys.pmk_replay_cnt_increment());
        assert_eq!(keys.pmk_replay_cnt_get(), 60_000);
        assert!(!keys.pmk_replay_cnt_increment());
        assert_eq!(keys.pmk_replay_cnt_get(), 60_000);
    }

    #[test]
    fn pmk_expiry_cascades_to_ptk() {
        let mut keys = SecKeys::new();
        keys.pmk_write(&[1; PMK_LEN], 100);
        keys.ptk_write(&[2; PTK_LEN], 1000);
        assert!(!keys.pmk_lifetime_decrement(99));
        assert!(keys.pmk_lifetime_decrement(1));
        assert!(keys.pmk_get().is_none());
        assert!(keys.ptk_get().is_none());
    }

    #[test]
    fn ptk_expiry_keeps_pmk() {
        let mut keys = SecKeys::new();
        keys.pmk_write(&[1; PMK_LEN], 1000);
        keys.ptk_write(&[2; PTK_LEN], 50);
        assert!(keys.ptk_lifetime_decrement(50));
        assert!(keys.pmk_get().is_some());
        assert!(keys.ptk_get().is_none());
    }

    #[test]
    fn mismatch_priority_order() {
        assert!(GtkMismatch::Hash > GtkMismatch::Lifetime);
        assert!(GtkMismatch::Lifetime > GtkMismatch::None);
    }

    #[test]
    fn gtk_mismatch_detection() {
        let mut ring = GtkRing::new_gtk();
        ring.gtk_set(0, &key(1), 1000).unwrap();
        let good = gtk_hash(&key(1));
        let bad = gtk_hash(&key(2));
        assert_eq!(gtk_mismatch(&ring, 0, &good), GtkMismatch::None);
        assert_eq!(gtk_mismatch(&ring, 0, &bad), GtkMismatch::Hash);
        assert_eq!(gtk_mismatch(&ring, 1, &good), GtkMismatch::Hash);
        ring.lifetime_decrement(0, 970, false);
        assert_eq!(gtk_mismatch(&ring, 0, &good), GtkMismatch::Lifetime);
    }

    #[test]
    fn ins_gtk_hash_tracks_ptk_reuse() {
        let mut ring = GtkRing::new_gtk();
        let mut gtks = SecGtks::default();
        ring.gtk_set(2, &key(7), 1000).unwrap();
        gtks.insert_index_set(2).unwrap();
        gtks.ins_gtk_hash_set(&ring, true);
        assert!(!gtks.ins_gtk_hash_mismatch_check(&ring, 2));

        // The ring moves to a different key at the same index while the
        // supplicant still runs the old PTK.
        ring.gtk_set(2, &key(8), 1000).unwrap();
        assert!(gtks.ins_gtk_hash_mismatch_check(&ring, 2));
        // Indexes never inserted under this PTK never mismatch.
        assert!(!gtks.ins_gtk_hash_mismatch_check(&ring, 0));
    }

    #[test]
    fn insert_index_follows_install_order() {
        let mut ring = GtkRing::new_gtk();
        let mut gtks = SecGtks::default();
        ring.gtk_set(1, &key(1), 100).unwrap();
        ring.gtk_set(3, &key(2), 100).unwrap();
        ring.status_all_fresh_set();
        assert_eq!(gtks.insert_index_from_gtkl(&ring), Some(1));
        gtks.gtk_live_set(1).unwrap();
        assert_eq!(gtks.insert_index_from_gtkl(&ring), Some(3));
        gtks.gtk_live_set(3).unwrap();
        assert_eq!(gtks.insert_index_from_gtkl(&ring), None);
    }

    #[test]
    fn ptk_derivation_is_symmetric() {
        let pmk = [0x5a; PMK_LEN];
        let a = Eui64([2, 0, 0, 0, 0, 0, 0, 1]);
        let b = Eui64([2, 0, 0, 0, 0, 0, 0, 2]);
        let na = [1; 32];
        let nb = [2; 32];
        // Both ends derive the same PTK regardless of which side they
        // see as local.
        assert_eq!(derive_ptk(&pmk, &a, &b, &na, &nb), derive_ptk(&pmk, &b, &a, &nb, &na));
        assert_ne!(derive_ptk(&pmk, &a, &b, &na, &nb), derive_ptk(&pmk, &a, &b, &nb, &na));
    }

    #[test]
    fn gak_derivation() {
        let gak = generate_gak("WiSUN-PAN", &key(1));
        assert_ne!(gak, [0; GTK_LEN]);
        assert_ne!(gak, generate_gak("WiSUN-PAN2", &key(1)));
        assert_eq!(gak, generate_gak("WiSUN-PAN", &key(1)));
    }
}
