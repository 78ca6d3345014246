// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Table of known link-layer peers.
//!
//! Entries are created on the first authenticated frame from a peer (or
//! when a peer starts an EAPOL exchange) and expire after a
//! policy-configured inactivity TTL. Other modules refer to neighbors
//! either by EUI-64 or by a [`NeighId`] arena index; indices are never
//! reused while the entry is live but lookups must tolerate expiry, so
//! nothing outside this table holds a neighbor past a callback.

use crate::hif::FhssUcSchedule;
use crate::net::ieee802154::Eui64;
use crate::security::keys::GTK_NUM;

use log::trace;

/// Index into the neighbor arena.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct NeighId(usize);

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum NodeRole {
    #[default]
    Ffn,
    Lfn,
    Router,
    Host,
}

/// Lowest acceptable frame counter for one GTK, tied to the key bytes so
/// a rekey at the same index restarts the window.
#[derive(Copy, Clone, Default)]
pub struct FrameCounter {
    pub gtk: [u8; 16],
    pub counter: u32,
    pub set: bool,
}

pub struct Neighbor {
    pub eui64: Eui64,
    pub role: NodeRole,
    pub fhss_data_unsecured: FhssUcSchedule,
    pub frame_counter_min: [FrameCounter; GTK_NUM],
    last_seen_ms: u64,
}

impl Neighbor {
    /// Records the lowest acceptable counter for the GTK at `index`,
    /// resetting the window when the key changed.
    pub fn frame_counter_update(&mut self, index: usize, gtk: &[u8; 16], counter: u32) {
        let entry = &mut self.frame_counter_min[index];
        if !entry.set || entry.gtk != *gtk {
            *entry = FrameCounter {
                gtk: *gtk,
                counter,
                set: true,
            };
        } else if counter > entry.counter {
            entry.counter = counter;
        }
    }
}

pub struct NeighborTable {
    slots: Vec<Option<Neighbor>>,
    ttl_ms: u64,
}

impl NeighborTable {
    pub fn new(ttl_s: u32) -> NeighborTable {
        NeighborTable {
            slots: Vec::new(),
            ttl_ms: ttl_s as u64 * 1000,
        }
    }

    pub fn get_id(&self, eui64: &Eui64) -> Option<NeighId> {
        self.slots
            .iter()
            .position(|n| n.as_ref().is_some_and(|n| n.eui64 == *eui64))
            .map(NeighId)
    }

    pub fn get(&self, eui64: &Eui64) -> Option<&Neighbor> {
        self.get_id(eui64).map(|id| self.by_id(id))
    }

    pub fn get_mut(&mut self, eui64: &Eui64) -> Option<&mut Neighbor> {
        let id = self.get_id(eui64)?;
        Some(self.by_id_mut(id))
    }

    /// Resolves an id obtained from this table in the current callback.
    /// Holding a `NeighId` across expiry is a caller bug.
    pub fn by_id(&self, id: NeighId) -> &Neighbor {
        self.slots[id.0].as_ref().unwrap()
    }

    pub fn by_id_mut(&mut self, id: NeighId) -> &mut Neighbor {
        self.slots[id.0].as_mut().unwrap()
    }

    /// Returns the existing entry for `eui64` refreshed, or inserts a
    /// fresh one.
    pub fn add(&mut self, eui64: Eui64, role: NodeRole, now_ms: u64) -> NeighId {
        if let Some(id) = self.get_id(&eui64) {
            let neigh = self.by_id_mut(id);
            neigh.role = role;
            neigh.last_seen_ms = now_ms;
            return id;
        }
        trace!("neigh add {}", eui64);
        let neigh = Neighbor {
            eui64,
            role,
            fhss_data_unsecured: FhssUcSchedule::default(),
            frame_counter_min: [FrameCounter::default(); GTK_NUM],
            last_seen_ms: now_ms,
        };
        match self.slots.iter().position(|slot| slot.is_none()) {
            Some(free) => {
                self.slots[free] = Some(neigh);
                NeighId(free)
            }
            None => {
                self.slots.push(Some(neigh));
                NeighId(self.slots.len() - 1)
            }
        }
    }

    pub fn refresh(&mut self, id: NeighId, now_ms: u64) {
        self.by_id_mut(id).last_seen_ms = now_ms;
    }

    pub fn remove(&mut self, id: NeighId) {
        if let Some(neigh) = self.slots[id.0].take() {
            trace!("neigh del {}", neigh.eui64);
        }
    }

    /// Drops every entry whose inactivity exceeds the TTL. Called from
    /// the table's periodic timer.
    pub fn expire(&mut self, now_ms: u64) {
        for slot in self.slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|n| now_ms.saturating_sub(n.last_seen_ms) > self.ttl_ms);
            if stale {
                let neigh = slot.take().unwrap();
                trace!("neigh expire {}", neigh.eui64);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NeighId, &Neighbor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NeighId(i), n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eui(last: u8) -> Eui64 {
        Eui64([2, 0, 0, 0, 0, 0, 0, last])
    }

    #[test]
    fn add_lookup_expire() {
        let mut table = NeighborTable::new(10);
        let id = table.add(eui(1), NodeRole::Ffn, 0);
        assert_eq!(table.get_id(&eui(1)), Some(id));
        assert!(table.get(&eui(2)).is_none());

        table.expire(9_000);
        assert_eq!(table.len(), 1);
        table.expire(11_000);
        assert_eq!(table.len(), 0);
        assert!(table.get(&eui(1)).is_none());
    }

    #[test]
    fn refresh_defers_expiry() {
        let mut table = NeighborTable::new(10);
        let id = table.add(eui(1), NodeRole::Ffn, 0);
        table.refresh(id, 8_000);
        table.expire(11_000);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn slot_reuse_after_removal() {
        let mut table = NeighborTable::new(10);
        let a = table.add(eui(1), NodeRole::Ffn, 0);
        table.remove(a);
        let b = table.add(eui(2), NodeRole::Lfn, 0);
        // The freed slot is reused; the EUI-64 keyed lookup still
        // resolves the new owner.
        assert_eq!(a, b);
        assert_eq!(table.by_id(b).eui64, eui(2));
    }

    #[test]
    fn counter_window_resets_on_rekey() {
        let mut table = NeighborTable::new(10);
        let id = table.add(eui(1), NodeRole::Ffn, 0);
        let neigh = table.by_id_mut(id);
        neigh.frame_counter_update(0, &[1; 16], 100);
        neigh.frame_counter_update(0, &[1; 16], 50);
        assert_eq!(neigh.frame_counter_min[0].counter, 100);
        neigh.frame_counter_update(0, &[2; 16], 5);
        assert_eq!(neigh.frame_counter_min[0].counter, 5);
    }
}
