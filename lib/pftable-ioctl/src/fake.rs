// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! An in-memory packet filter for tests.
//!
//! [`FakeBackend`] answers the same requests as the control device and
//! follows the kernel's rules for them: a get whose buffer is too small
//! copies nothing and reports the true count, records are matched by
//! address and prefix, and a delete only removes an entry whose
//! negation flag also matches. On top of that it can be scripted to
//! grow a table between requests, to refuse access, or to hold records
//! the codec cannot decode.

use super::Error;
use super::Request;
use super::backend::Backend;
use super::backend::Fetched;
use pftable_api::AddrCodec;
use pftable_api::AddrRecord;
use pftable_api::PlatformAbi;
use pftable_api::RecordBuf;
use pftable_api::TableAddr;
use pftable_api::TableChanges;
use pftable_api::TableName;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

// Entries are identified by address and prefix; the negation flag is a
// property of the entry.
type Key = (IpAddr, Option<u8>);

fn key(addr: &TableAddr) -> Key {
    (addr.ip(), addr.prefix_len())
}

#[derive(Debug, Default)]
enum Growth {
    #[default]
    None,

    /// Add one batch before each fetch until the batches run out.
    Batches(VecDeque<Vec<TableAddr>>),

    /// Add `per_fetch` fresh addresses before every fetch.
    Endless { per_fetch: usize, next: u32 },
}

#[derive(Debug, Default)]
struct FakeTable {
    // In table order.
    entries: Vec<TableAddr>,
    // Key of every entry, mapped to its negation flag.
    index: BTreeMap<Key, bool>,
    raw: Vec<AddrRecord>,
    growth: Growth,
}

impl FakeTable {
    fn count(&self) -> usize {
        self.entries.len() + self.raw.len()
    }

    fn contains(&self, k: &Key) -> bool {
        self.index.contains_key(k)
    }

    fn insert(&mut self, addr: TableAddr) -> bool {
        if self.contains(&key(&addr)) {
            return false;
        }

        self.index.insert(key(&addr), addr.is_negated());
        self.entries.push(addr);
        true
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.raw.clear();
    }

    fn grow(&mut self) {
        let fresh = match &mut self.growth {
            Growth::None => return,
            Growth::Batches(batches) => {
                batches.pop_front().unwrap_or_default()
            }
            Growth::Endless { per_fetch, next } => {
                let mut fresh: Vec<TableAddr> =
                    Vec::with_capacity(*per_fetch);
                while fresh.len() < *per_fetch {
                    let bits = 0x0a00_0000 | (*next & 0x00ff_ffff);
                    *next = next.wrapping_add(1);
                    let addr = TableAddr::host(Ipv4Addr::from(bits));
                    let k = key(&addr);
                    if !self.index.contains_key(&k)
                        && !fresh.iter().any(|e| key(e) == k)
                    {
                        fresh.push(addr);
                    }
                }
                fresh
            }
        };

        for addr in fresh {
            self.insert(addr);
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    tables: BTreeMap<String, FakeTable>,
    deny: bool,
    unavailable: bool,
    query_calls: usize,
    fetch_calls: usize,
}

impl FakeState {
    fn check(&mut self, table: &TableName) -> Result<&mut FakeTable, Error> {
        if self.unavailable {
            return Err(Error::DeviceUnavailable("fake device offline".into()));
        }

        if self.deny {
            return Err(Error::PermissionDenied(format!("table {table}")));
        }

        self.tables
            .get_mut(table.as_str())
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }
}

/// A cloneable handle to an in-memory packet filter.
///
/// Clones share state, so a test can keep one handle to script and
/// inspect the tables while a [`crate::TableSession`] owns another.
#[derive(Clone, Debug)]
pub struct FakeBackend {
    abi: PlatformAbi,
    codec: AddrCodec,
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    /// A fake packet filter speaking the OpenBSD amd64 ABI.
    pub fn new() -> Result<Self, Error> {
        Self::with_abi(PlatformAbi::openbsd_amd64())
    }

    /// A fake packet filter speaking `abi`, which must be valid.
    pub fn with_abi(abi: PlatformAbi) -> Result<Self, Error> {
        let codec = AddrCodec::new(&abi)?;
        Ok(Self { abi, codec, state: Arc::default() })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty table, unless it already exists.
    pub fn create_table(&self, name: &str) {
        self.state().tables.entry(name.to_string()).or_default();
    }

    pub fn remove_table(&self, name: &str) {
        self.state().tables.remove(name);
    }

    /// Replace the contents of a table, creating it if needed.
    ///
    /// Duplicate entries are dropped, as the kernel would.
    pub fn seed(&self, name: &str, addrs: &[TableAddr]) {
        let mut state = self.state();
        let t = state.tables.entry(name.to_string()).or_default();
        t.clear();
        for addr in addrs {
            t.insert(*addr);
        }
    }

    /// The decodable entries of a table, in table order.
    pub fn contents(&self, name: &str) -> Option<Vec<TableAddr>> {
        self.state().tables.get(name).map(|t| t.entries.clone())
    }

    /// Append a raw record, returned verbatim after the decodable
    /// entries on every fetch.
    pub fn insert_raw(&self, name: &str, rec: AddrRecord) {
        let mut state = self.state();
        state.tables.entry(name.to_string()).or_default().raw.push(rec);
    }

    /// Before each of the next `batches.len()` fetches, add the next
    /// batch to the table.
    pub fn grow_before_fetch(
        &self,
        name: &str,
        batches: Vec<Vec<TableAddr>>,
    ) {
        let mut state = self.state();
        state.tables.entry(name.to_string()).or_default().growth =
            Growth::Batches(batches.into());
    }

    /// Before every fetch, add `per_fetch` new host entries.
    pub fn grow_on_every_fetch(&self, name: &str, per_fetch: usize) {
        let mut state = self.state();
        state.tables.entry(name.to_string()).or_default().growth =
            Growth::Endless { per_fetch, next: 1 };
    }

    /// Refuse every request as if the caller lacked privilege.
    pub fn deny_permission(&self, deny: bool) {
        self.state().deny = deny;
    }

    /// Fail every request as if the control device were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn query_calls(&self) -> usize {
        self.state().query_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    fn decode(
        &self,
        req: Request,
        records: &RecordBuf,
    ) -> Result<Vec<TableAddr>, Error> {
        if records.record_size() != self.codec.record_size() {
            return Err(Error::RecordSizeRejected {
                req,
                esize: records.record_size(),
            });
        }

        self.codec.decode_all(records).map_err(|_| Error::InvalidArgument(req))
    }
}

impl Backend for FakeBackend {
    fn abi(&self) -> &PlatformAbi {
        &self.abi
    }

    fn query_count(&mut self, table: &TableName) -> Result<usize, Error> {
        let mut state = self.state();
        state.query_calls += 1;
        Ok(state.check(table)?.count())
    }

    fn fetch(
        &mut self,
        table: &TableName,
        capacity: usize,
    ) -> Result<Fetched, Error> {
        let mut state = self.state();
        state.fetch_calls += 1;
        let t = state.check(table)?;
        t.grow();

        let count = t.count();
        let mut records = self.codec.buf();
        if count <= capacity {
            records = self.codec.encode_all(&t.entries);
            for rec in &t.raw {
                records.push(rec)?;
            }
        }

        Ok(Fetched { records, count })
    }

    fn replace(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<TableChanges, Error> {
        let mut state = self.state();
        let t = state.check(table)?;
        let addrs = self.decode(Request::SetAddrs, records)?;

        let mut next = FakeTable::default();
        for addr in addrs {
            next.insert(addr);
        }

        let mut changes = TableChanges::default();
        for addr in &next.entries {
            match t.index.get(&key(addr)) {
                Some(negated) if *negated != addr.is_negated() => {
                    changes.changed += 1;
                }
                Some(_) => {}
                None => changes.added += 1,
            }
        }
        changes.deleted = t
            .entries
            .iter()
            .filter(|e| !next.contains(&key(e)))
            .count()
            + t.raw.len();

        t.entries = next.entries;
        t.index = next.index;
        t.raw.clear();
        Ok(changes)
    }

    fn add(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<usize, Error> {
        let mut state = self.state();
        let t = state.check(table)?;
        let addrs = self.decode(Request::AddAddrs, records)?;
        Ok(addrs.into_iter().filter(|a| t.insert(*a)).count())
    }

    fn delete(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<usize, Error> {
        let mut state = self.state();
        let t = state.check(table)?;
        let gone: BTreeSet<TableAddr> =
            self.decode(Request::DelAddrs, records)?.into_iter().collect();
        let before = t.entries.len();
        t.entries.retain(|e| !gone.contains(e));
        for addr in &gone {
            if t.index.get(&key(addr)) == Some(&addr.is_negated()) {
                t.index.remove(&key(addr));
            }
        }
        Ok(before - t.entries.len())
    }

    fn clear(&mut self, table: &TableName) -> Result<usize, Error> {
        let mut state = self.state();
        let t = state.check(table)?;
        let count = t.count();
        t.clear();
        Ok(count)
    }
}
