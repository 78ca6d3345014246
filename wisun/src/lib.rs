// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Host-side Wi-SUN FAN 1.1 stack.
//!
//! The radio co-processor performs PHY and lower-MAC timing (channel
//! hopping, CSMA, acknowledgements, frame security); everything above
//! that lives here: the 802.15.4 frame codec, the HIF transport driving
//! the RCP, the neighbor table, the MAC bridge, EAPOL key distribution
//! with its GTK lifecycle, and the timers feeding retry and lifetime
//! logic. The `wsbrd` and `wsrd` daemons assemble these pieces around a
//! single-threaded `poll(2)` loop; every entry point here runs to
//! completion on that thread.

#[macro_use]
pub mod net;

pub mod eapol;
pub mod hif;
pub mod mac;
pub mod neighbor;
pub mod pcapng;
pub mod rcp;
pub mod security;
pub mod timer;
pub mod tun;
