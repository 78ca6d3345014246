// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Wire formats: the serialization substrate and the 802.15.4 frame
//! codec.

#[macro_use]
pub mod stream;
pub mod ieee802154;
