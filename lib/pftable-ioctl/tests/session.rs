// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Session tests against the in-memory packet filter.
//!
//! Each test drives a [`TableSession`] that owns one `FakeBackend`
//! handle while the test keeps a clone to script and inspect the
//! tables behind it.

use pftable_api::AbiError;
use pftable_api::AddrCodec;
use pftable_api::AddrRecord;
use pftable_api::PlatformAbi;
use pftable_api::RecordBuf;
use pftable_api::TableAddr;
use pftable_api::TableChanges;
use pftable_api::TableName;
use pftable_api::TableNameError;
use pftable_ioctl::Backend;
use pftable_ioctl::Error;
use pftable_ioctl::Fetched;
use pftable_ioctl::FakeBackend;
use pftable_ioctl::MAX_ATTEMPTS;
use pftable_ioctl::TableSession;
use slog::Logger;
use slog::o;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

fn log() -> Logger {
    Logger::root(slog::Discard, o!())
}

fn session() -> (TableSession<FakeBackend>, FakeBackend) {
    let fake = FakeBackend::new().unwrap();
    (TableSession::new(fake.clone(), &log()).unwrap(), fake)
}

fn name(session: &TableSession<FakeBackend>, name: &str) -> TableName {
    session.table_name(name).unwrap()
}

// A backend that reports an ABI and is never sent a request.
struct AbiOnly(PlatformAbi);

impl Backend for AbiOnly {
    fn abi(&self) -> &PlatformAbi {
        &self.0
    }

    fn query_count(&mut self, _: &TableName) -> Result<usize, Error> {
        unreachable!()
    }

    fn fetch(&mut self, _: &TableName, _: usize) -> Result<Fetched, Error> {
        unreachable!()
    }

    fn replace(
        &mut self,
        _: &TableName,
        _: &RecordBuf,
    ) -> Result<TableChanges, Error> {
        unreachable!()
    }

    fn add(&mut self, _: &TableName, _: &RecordBuf) -> Result<usize, Error> {
        unreachable!()
    }

    fn delete(&mut self, _: &TableName, _: &RecordBuf) -> Result<usize, Error> {
        unreachable!()
    }

    fn clear(&mut self, _: &TableName) -> Result<usize, Error> {
        unreachable!()
    }
}

fn addrs(list: &[&str]) -> Vec<TableAddr> {
    list.iter().map(|s| s.parse().unwrap()).collect()
}

fn hosts(range: std::ops::Range<u32>) -> Vec<TableAddr> {
    range.map(|i| TableAddr::host(Ipv4Addr::from(0xc0a8_0000 + i))).collect()
}

fn as_set(addrs: &[TableAddr]) -> BTreeSet<TableAddr> {
    addrs.iter().copied().collect()
}

#[test]
fn set_then_get_round_trips() {
    let (session, fake) = session();
    fake.create_table("blocklist");
    let t = name(&session, "blocklist");

    let want = addrs(&[
        "10.0.0.1",
        "192.168.0.0/16",
        "!192.168.7.0/24",
        "fd00:1122:3344::/48",
        "::1",
        "0.0.0.0/0",
    ]);
    let changes = session.set_addresses(&t, &want).unwrap();
    assert_eq!(changes.added, want.len());
    assert_eq!(changes.deleted, 0);

    let got = session.get_addresses(&t).unwrap();
    assert_eq!(as_set(&got), as_set(&want));

    // Encode order is preserved all the way into the table.
    assert_eq!(fake.contents("blocklist").unwrap(), want);
}

#[test]
fn replace_is_idempotent() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &addrs(&["10.0.0.1", "10.0.0.2"]));

    let want = addrs(&["10.0.0.2", "10.0.0.3"]);
    let first = session.set_addresses(&t, &want).unwrap();
    assert_eq!((first.added, first.deleted, first.changed), (1, 1, 0));

    let second = session.set_addresses(&t, &want).unwrap();
    assert_eq!(second, TableChanges::default());
    assert_eq!(as_set(&session.get_addresses(&t).unwrap()), as_set(&want));
}

#[test]
fn empty_set_clears() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..10));

    let changes = session.set_addresses(&t, &[]).unwrap();
    assert_eq!(changes.deleted, 10);
    assert!(session.get_addresses(&t).unwrap().is_empty());
}

#[test]
fn empty_table() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.create_table("t");
    assert!(session.get_addresses(&t).unwrap().is_empty());
    assert_eq!(fake.fetch_calls(), 1);
}

#[test]
fn unknown_table() {
    let (session, _fake) = session();
    let t = name(&session, "nope");
    let err = session.get_addresses(&t).unwrap_err();
    assert!(matches!(&err, Error::TableNotFound(n) if n == "nope"));

    let err = session.set_addresses(&t, &hosts(0..1)).unwrap_err();
    assert!(matches!(err, Error::TableNotFound(_)));
}

#[test]
fn removed_table_is_not_found() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..3));
    assert_eq!(session.get_addresses(&t).unwrap().len(), 3);

    fake.remove_table("t");
    assert!(matches!(
        session.get_addresses(&t),
        Err(Error::TableNotFound(_))
    ));
}

#[test]
fn growth_race_is_retried() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..8));

    // Query sees 8 and the first fetch asks for 9. Each of the first two
    // fetches finds 4 more entries than it has room for.
    fake.grow_before_fetch("t", vec![hosts(100..104), hosts(200..204)]);

    let got = session.get_addresses(&t).unwrap();
    let want: Vec<TableAddr> = hosts(0..8)
        .into_iter()
        .chain(hosts(100..104))
        .chain(hosts(200..204))
        .collect();
    assert_eq!(got, want);

    let growth_events = 2;
    assert_eq!(fake.query_calls(), 1);
    assert_eq!(fake.fetch_calls(), growth_events + 1);
}

#[test]
fn growth_within_headroom_needs_no_retry() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..80));
    fake.grow_before_fetch("t", vec![hosts(100..110)]);

    assert_eq!(session.get_addresses(&t).unwrap().len(), 90);
    assert_eq!(fake.fetch_calls(), 1);
}

#[test]
fn shrink_is_fine() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..10));
    assert_eq!(session.get_addresses(&t).unwrap().len(), 10);

    fake.seed("t", &hosts(0..2));
    assert_eq!(session.get_addresses(&t).unwrap(), hosts(0..2));
}

#[test]
fn endless_growth_is_exhausted() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.create_table("t");
    fake.grow_on_every_fetch("t", 100);

    let err = session.get_addresses(&t).unwrap_err();
    assert!(
        matches!(
            &err,
            Error::Exhausted { table, attempts } if table == "t"
                && *attempts == MAX_ATTEMPTS
        ),
        "{err}"
    );
    assert_eq!(fake.fetch_calls(), usize::from(MAX_ATTEMPTS));
    assert_eq!(fake.query_calls(), 1);
}

#[test]
fn invalid_names_never_reach_the_backend() {
    let (session, fake) = session();
    let max = session.abi().max_table_name_len();
    let long = "x".repeat(max + 1);

    for bad in ["", long.as_str(), "a\0b"] {
        let err = session.table_name(bad).unwrap_err();
        assert!(matches!(err, Error::InvalidTableName(_)), "{bad:?}");
    }
    assert!(matches!(
        session.table_name(""),
        Err(Error::InvalidTableName(TableNameError::Empty))
    ));

    // A name checked against a wider limit is still refused here.
    let wide = TableName::with_max_len(&long, 64).unwrap();
    let err = session.get_addresses(&wide).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTableName(TableNameError::TooLong { len, max: m })
            if len == max + 1 && m == max
    ));
    let err = session.set_addresses(&wide, &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidTableName(_)));
    let err = session.add_addresses(&wide, &hosts(0..1)).unwrap_err();
    assert!(matches!(err, Error::InvalidTableName(_)));
    let err = session.delete_addresses(&wide, &hosts(0..1)).unwrap_err();
    assert!(matches!(err, Error::InvalidTableName(_)));
    let err = session.clear_addresses(&wide).unwrap_err();
    assert!(matches!(err, Error::InvalidTableName(_)));

    assert_eq!(fake.query_calls(), 0);
    assert_eq!(fake.fetch_calls(), 0);
}

#[test]
fn longest_name_is_accepted() {
    let (session, fake) = session();
    let longest = "x".repeat(session.abi().max_table_name_len());
    fake.seed(&longest, &hosts(0..1));
    let t = name(&session, &longest);
    assert_eq!(session.get_addresses(&t).unwrap(), hosts(0..1));
}

#[test]
fn invalid_abi_is_refused() {
    let mut abi = PlatformAbi::openbsd_amd64();
    abi.record.size = 12;
    assert!(matches!(
        FakeBackend::with_abi(abi),
        Err(Error::Abi(AbiError::RecordSize(12)))
    ));

    // A backend claiming such an ABI cannot back a session either.
    let mut abi = PlatformAbi::openbsd_amd64();
    abi.record.net_offset = abi.record.size;
    assert!(FakeBackend::with_abi(abi.clone()).is_err());
    assert!(matches!(
        TableSession::new(AbiOnly(abi), &log()),
        Err(Error::Abi(_))
    ));
}

#[test]
fn unknown_family_is_reported() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..2));

    let codec = AddrCodec::new(session.abi()).unwrap();
    let mut raw = codec.encode(&hosts(5..6)[0]).as_bytes().to_vec();
    raw[session.abi().record.af_offset] = 99;
    fake.insert_raw("t", AddrRecord::from_bytes(raw));

    let err = session.get_addresses(&t).unwrap_err();
    assert!(
        matches!(err, Error::UnsupportedAddressFamily(99)),
        "{err}"
    );
}

#[test]
fn permission_and_device_errors_propagate() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &hosts(0..2));

    fake.deny_permission(true);
    assert!(matches!(
        session.get_addresses(&t),
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(
        session.set_addresses(&t, &[]),
        Err(Error::PermissionDenied(_))
    ));
    fake.deny_permission(false);

    fake.set_unavailable(true);
    assert!(matches!(
        session.get_addresses(&t),
        Err(Error::DeviceUnavailable(_))
    ));
    fake.set_unavailable(false);

    // Nothing was changed by the failed writes.
    assert_eq!(session.get_addresses(&t).unwrap(), hosts(0..2));
}

#[test]
fn add_delete_clear() {
    let (session, fake) = session();
    let t = name(&session, "t");
    fake.seed("t", &addrs(&["10.0.0.1", "!10.0.0.2"]));

    let added = session
        .add_addresses(&t, &addrs(&["10.0.0.1", "10.0.0.3", "fd00::/8"]))
        .unwrap();
    assert_eq!(added, 2);

    // A delete must match the negation flag too.
    let deleted = session
        .delete_addresses(&t, &addrs(&["10.0.0.2", "10.0.0.3", "10.9.9.9"]))
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(
        session.get_addresses(&t).unwrap(),
        addrs(&["10.0.0.1", "!10.0.0.2", "fd00::/8"])
    );

    assert_eq!(session.clear_addresses(&t).unwrap(), 3);
    assert!(session.get_addresses(&t).unwrap().is_empty());
}

#[test]
fn shared_between_threads() {
    let (session, fake) = session();
    let t = name(&session, "t");
    let session = Arc::new(session);
    fake.create_table("t");

    let writers: Vec<_> = (0..4u32)
        .map(|n| {
            let session = Arc::clone(&session);
            let t = t.clone();
            std::thread::spawn(move || {
                let batch = hosts(n * 100..n * 100 + 50);
                for chunk in batch.chunks(10) {
                    session.add_addresses(&t, chunk).unwrap();
                    // Every snapshot is whole: whatever a get returns
                    // decodes and holds no duplicates.
                    let got = session.get_addresses(&t).unwrap();
                    assert_eq!(as_set(&got).len(), got.len());
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }

    assert_eq!(session.get_addresses(&t).unwrap().len(), 200);
}
