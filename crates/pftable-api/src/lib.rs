// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared by everything that talks to a packet-filter address
//! table: the per-target ABI description, validated table names, table
//! entries and the codec that maps them onto the kernel's fixed-size
//! address records.
//!
//! Nothing in this crate requires privilege or touches a device.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod abi;
pub mod addr;
pub mod codec;
pub mod print;
pub mod table;

pub use abi::*;
pub use addr::*;
pub use codec::*;
pub use table::*;

/// The kernel's account of what a write request did to a table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TableChanges {
    /// Entries that were not present before the request.
    pub added: usize,
    /// Entries that were present before the request and are now gone.
    pub deleted: usize,
    /// Entries whose negation flag was flipped in place.
    pub changed: usize,
}

impl Display for TableChanges {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} added, {} deleted, {} changed",
            self.added, self.deleted, self.changed
        )
    }
}
