// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The table address protocol.
//!
//! A get cannot ask the kernel for "everything": it supplies a buffer
//! and a capacity, and the table may grow between learning its size
//! and fetching it. [`TableSession::get_addresses()`] therefore runs a
//! bounded negotiation:
//!
//! 1. Ask how many entries the table holds.
//! 2. Fetch with that many slots plus some headroom.
//! 3. If the table still fits, decode exactly the returned entries.
//! 4. Otherwise take the count the fetch reported as the new estimate
//!    and go back to step 2, at most [`MAX_ATTEMPTS`] fetches in all.
//!
//! Running out of attempts is reported as [`Error::Exhausted`]; a
//! partial table is never returned.
//!
//! Requests name their table with a [`TableName`], which callers get
//! from [`TableSession::table_name()`].

use super::Error;
use super::MAX_RECORDS;
use super::backend::Backend;
use pftable_api::AddrCodec;
use pftable_api::PlatformAbi;
use pftable_api::TableAddr;
use pftable_api::TableChanges;
use pftable_api::TableName;
use pftable_api::TableNameError;
use slog::Logger;
use slog::debug;
use slog::o;
use slog::warn;
use std::sync::Mutex;
use std::sync::PoisonError;

/// The number of fetches a get makes before giving up on a table that
/// keeps growing.
pub const MAX_ATTEMPTS: u8 = 5;

// Each fetch asks for 1/HEADROOM_DIVISOR more slots than the estimate.
const HEADROOM_DIVISOR: usize = 8;

// Never more than a request can carry.
fn capacity_for(estimate: usize) -> usize {
    estimate.saturating_add(estimate / HEADROOM_DIVISOR).min(MAX_RECORDS)
}

/// Reads and writes table addresses through a [`Backend`].
///
/// A session may be shared between threads. Each round-trip to the
/// backend holds the session's lock, so requests from different
/// threads never interleave inside the backend; a get made of several
/// round-trips may still observe writes made between them, which the
/// negotiation tolerates.
#[derive(Debug)]
pub struct TableSession<B> {
    backend: Mutex<B>,
    abi: PlatformAbi,
    codec: AddrCodec,
    log: Logger,
}

impl<B: Backend> TableSession<B> {
    /// Start a session over `backend`, whose ABI is validated first.
    pub fn new(backend: B, log: &Logger) -> Result<Self, Error> {
        let abi = backend.abi().clone();
        let codec = AddrCodec::new(&abi)?;
        let log = log.new(o!("device" => abi.device.clone()));
        Ok(Self { backend: Mutex::new(backend), abi, codec, log })
    }

    pub fn abi(&self) -> &PlatformAbi {
        &self.abi
    }

    /// Validate a table name against this session's target.
    pub fn table_name(&self, name: &str) -> Result<TableName, Error> {
        Ok(TableName::new(name, &self.abi)?)
    }

    // A name validated for another target may not fit this one.
    fn check_name(&self, table: &TableName) -> Result<(), Error> {
        let max = self.abi.max_table_name_len();
        if table.len() > max {
            let len = table.len();
            return Err(TableNameError::TooLong { len, max }.into());
        }
        Ok(())
    }

    fn with_backend<T>(
        &self,
        f: impl FnOnce(&mut B) -> Result<T, Error>,
    ) -> Result<T, Error> {
        // A panic in another thread cannot leave a backend mid-request:
        // every request is complete once the closure returns.
        let mut backend =
            self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut backend)
    }

    /// Return every address in `table`.
    ///
    /// The result is a consistent snapshot taken by a single fetch.
    pub fn get_addresses(
        &self,
        table: &TableName,
    ) -> Result<Vec<TableAddr>, Error> {
        self.check_name(table)?;
        let mut estimate = self.with_backend(|b| b.query_count(table))?;

        for attempt in 1..=MAX_ATTEMPTS {
            if estimate > MAX_RECORDS {
                return Err(Error::TooLarge(estimate));
            }

            let capacity = capacity_for(estimate);
            let fetched = self.with_backend(|b| b.fetch(table, capacity))?;

            debug!(
                self.log, "fetch table addresses";
                "table" => %table,
                "attempt" => attempt,
                "estimate" => estimate,
                "capacity" => capacity,
                "count" => fetched.count,
            );

            if fetched.count <= capacity {
                let actual = fetched.records.len();
                if actual != fetched.count {
                    return Err(Error::Truncated {
                        table: table.to_string(),
                        expected: fetched.count,
                        actual,
                    });
                }

                return Ok(self.codec.decode_all(&fetched.records)?);
            }

            estimate = fetched.count;
        }

        warn!(
            self.log, "table kept growing";
            "table" => %table,
            "attempts" => MAX_ATTEMPTS,
            "last_count" => estimate,
        );
        Err(Error::Exhausted {
            table: table.to_string(),
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Atomically replace the contents of `table` with `addrs`.
    ///
    /// Addresses are sent in the order given. An empty slice clears the
    /// table.
    pub fn set_addresses(
        &self,
        table: &TableName,
        addrs: &[TableAddr],
    ) -> Result<TableChanges, Error> {
        self.check_name(table)?;
        let records = self.codec.encode_all(addrs);
        let changes = self.with_backend(|b| b.replace(table, &records))?;

        debug!(
            self.log, "replaced table addresses";
            "table" => %table,
            "sent" => addrs.len(),
            "changes" => %changes,
        );
        Ok(changes)
    }

    /// Add `addrs` to `table`, returning how many were new.
    pub fn add_addresses(
        &self,
        table: &TableName,
        addrs: &[TableAddr],
    ) -> Result<usize, Error> {
        self.check_name(table)?;
        let records = self.codec.encode_all(addrs);
        let added = self.with_backend(|b| b.add(table, &records))?;
        debug!(
            self.log, "added table addresses";
            "table" => %table,
            "added" => added,
        );
        Ok(added)
    }

    /// Remove `addrs` from `table`, returning how many were present.
    pub fn delete_addresses(
        &self,
        table: &TableName,
        addrs: &[TableAddr],
    ) -> Result<usize, Error> {
        self.check_name(table)?;
        let records = self.codec.encode_all(addrs);
        let deleted = self.with_backend(|b| b.delete(table, &records))?;
        debug!(
            self.log, "deleted table addresses";
            "table" => %table,
            "deleted" => deleted,
        );
        Ok(deleted)
    }

    /// Remove every address from `table`, returning how many there were.
    pub fn clear_addresses(&self, table: &TableName) -> Result<usize, Error> {
        self.check_name(table)?;
        let deleted = self.with_backend(|b| b.clear(table))?;
        debug!(
            self.log, "cleared table";
            "table" => %table,
            "deleted" => deleted,
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Fetched;
    use pftable_api::AbiError;
    use pftable_api::RecordBuf;

    // A backend whose fetches return a scripted sequence of results.
    #[derive(Debug)]
    struct Scripted {
        abi: PlatformAbi,
        count: usize,
        fetches: Vec<Fetched>,
        capacities: Vec<usize>,
    }

    impl Scripted {
        fn new(count: usize, fetches: Vec<Fetched>) -> Self {
            Self {
                abi: PlatformAbi::openbsd_amd64(),
                count,
                fetches,
                capacities: Vec::new(),
            }
        }
    }

    impl Backend for Scripted {
        fn abi(&self) -> &PlatformAbi {
            &self.abi
        }

        fn query_count(&mut self, _: &TableName) -> Result<usize, Error> {
            Ok(self.count)
        }

        fn fetch(
            &mut self,
            _: &TableName,
            capacity: usize,
        ) -> Result<Fetched, Error> {
            self.capacities.push(capacity);
            Ok(self.fetches.remove(0))
        }

        fn replace(
            &mut self,
            _: &TableName,
            records: &RecordBuf,
        ) -> Result<TableChanges, Error> {
            Ok(TableChanges { added: records.len(), ..Default::default() })
        }

        fn add(
            &mut self,
            _: &TableName,
            r: &RecordBuf,
        ) -> Result<usize, Error> {
            Ok(r.len())
        }

        fn delete(
            &mut self,
            _: &TableName,
            r: &RecordBuf,
        ) -> Result<usize, Error> {
            Ok(r.len())
        }

        fn clear(&mut self, _: &TableName) -> Result<usize, Error> {
            Ok(0)
        }
    }

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn records(addrs: &[&str]) -> RecordBuf {
        let codec = AddrCodec::new(&PlatformAbi::openbsd_amd64()).unwrap();
        let addrs: Vec<TableAddr> =
            addrs.iter().map(|s| s.parse().unwrap()).collect();
        codec.encode_all(&addrs)
    }

    fn empty() -> RecordBuf {
        records(&[])
    }

    fn table() -> TableName {
        TableName::with_max_len("t", 31).unwrap()
    }

    #[test]
    fn headroom() {
        assert_eq!(capacity_for(0), 0);
        assert_eq!(capacity_for(7), 7);
        assert_eq!(capacity_for(8), 9);
        assert_eq!(capacity_for(100), 112);
        assert_eq!(capacity_for(MAX_RECORDS - 1), MAX_RECORDS);
        assert_eq!(capacity_for(MAX_RECORDS), MAX_RECORDS);
        assert_eq!(capacity_for(usize::MAX), MAX_RECORDS);
    }

    #[test]
    fn invalid_abi_is_refused() {
        let mut backend = Scripted::new(0, vec![]);
        backend.abi.record.size = 12;
        let err = TableSession::new(backend, &log()).unwrap_err();
        assert!(matches!(err, Error::Abi(AbiError::RecordSize(12))), "{err}");
    }

    #[test]
    fn oversized_table_is_refused() {
        // Too big to ask for at all: no fetch is made.
        let backend = Scripted::new(MAX_RECORDS + 1, vec![]);
        let session = TableSession::new(backend, &log()).unwrap();
        let err = session.get_addresses(&table()).unwrap_err();
        assert!(
            matches!(err, Error::TooLarge(n) if n == MAX_RECORDS + 1),
            "{err}"
        );
        assert!(session.backend.lock().unwrap().capacities.is_empty());

        // A fetch reporting such a count stops the negotiation too.
        let backend = Scripted::new(
            8,
            vec![Fetched { records: empty(), count: usize::MAX }],
        );
        let session = TableSession::new(backend, &log()).unwrap();
        let err = session.get_addresses(&table()).unwrap_err();
        assert!(matches!(err, Error::TooLarge(usize::MAX)), "{err}");
        assert_eq!(session.backend.into_inner().unwrap().capacities, vec![9]);
    }

    #[test]
    fn retry_uses_reported_count() {
        let backend = Scripted::new(
            8,
            vec![
                Fetched { records: empty(), count: 20 },
                Fetched { records: records(&["10.0.0.1"]), count: 1 },
            ],
        );
        let session = TableSession::new(backend, &log()).unwrap();
        let got = session.get_addresses(&table()).unwrap();
        assert_eq!(got, vec!["10.0.0.1".parse().unwrap()]);

        let backend = session.backend.into_inner().unwrap();
        assert_eq!(backend.capacities, vec![9, 22]);
    }

    #[test]
    fn short_read_is_truncated() {
        let backend = Scripted::new(
            2,
            vec![Fetched { records: records(&["10.0.0.1"]), count: 2 }],
        );
        let session = TableSession::new(backend, &log()).unwrap();
        let err = session.get_addresses(&table()).unwrap_err();
        assert!(
            matches!(err, Error::Truncated { expected: 2, actual: 1, .. }),
            "{err}"
        );
    }

    #[test]
    fn names_are_checked_first() {
        let session =
            TableSession::new(Scripted::new(0, vec![]), &log()).unwrap();
        assert!(matches!(
            session.table_name(""),
            Err(Error::InvalidTableName(TableNameError::Empty))
        ));

        // Valid elsewhere, but too long for this target.
        let wide = TableName::with_max_len(&"x".repeat(32), 64).unwrap();
        assert!(matches!(
            session.set_addresses(&wide, &[]),
            Err(Error::InvalidTableName(TableNameError::TooLong {
                len: 32,
                max: 31
            }))
        ));
        assert!(matches!(
            session.get_addresses(&wide),
            Err(Error::InvalidTableName(_))
        ));
        assert!(session.backend.lock().unwrap().capacities.is_empty());
    }
}
