// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::Error;
use pftable_api::PlatformAbi;
use pftable_api::RecordBuf;
use pftable_api::TableChanges;
use pftable_api::TableName;

/// The outcome of a single [`Backend::fetch()`].
#[derive(Clone, Debug)]
pub struct Fetched {
    /// The records copied out. Holds exactly `count` records when
    /// `count` fits in the requested capacity, and is otherwise
    /// unspecified.
    pub records: RecordBuf,

    /// How many records the table held when the request ran.
    pub count: usize,
}

/// A privileged channel that can run table address requests.
///
/// Every method is a single blocking round-trip. A backend is not
/// required to tolerate concurrent calls; [`crate::TableSession`]
/// serialises them.
pub trait Backend {
    /// The ABI this backend speaks. Records passed in and out are laid
    /// out according to it.
    fn abi(&self) -> &PlatformAbi;

    /// Return how many addresses `table` holds, without copying any.
    fn query_count(&mut self, table: &TableName) -> Result<usize, Error>;

    /// Copy out up to `capacity` records.
    ///
    /// A single fetch cannot prove it saw the whole table: if the
    /// table grew past `capacity` the returned `count` exceeds it and
    /// the caller must try again with more room.
    fn fetch(
        &mut self,
        table: &TableName,
        capacity: usize,
    ) -> Result<Fetched, Error>;

    /// Atomically replace the whole address set of `table`.
    fn replace(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<TableChanges, Error>;

    /// Add records, returning how many were not already present.
    fn add(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<usize, Error>;

    /// Delete records, returning how many were present.
    fn delete(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<usize, Error>;

    /// Remove every address, returning how many there were.
    fn clear(&mut self, table: &TableName) -> Result<usize, Error>;
}
