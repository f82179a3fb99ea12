// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Fixtures shared by the benchmarks.

use pftable_api::TableAddr;
use pftable_api::TableName;
use pftable_ioctl::FakeBackend;
use pftable_ioctl::TableSession;
use slog::Logger;
use slog::o;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

/// Table sizes each benchmark is run at.
pub const TABLE_SIZES: [usize; 3] = [16, 1024, 65536];

/// `count` distinct entries, alternating between IPv4 hosts and IPv6
/// networks.
pub fn table_addrs(count: usize) -> Vec<TableAddr> {
    (0..count as u32)
        .map(|i| {
            if i % 2 == 0 {
                TableAddr::host(Ipv4Addr::from(0x0a00_0000 + i))
            } else {
                let ip = Ipv6Addr::from(
                    0xfd00_0000_0000_0000_0000_0000_0000_0000u128
                        | (u128::from(i) << 64),
                );
                TableAddr::network(ip, 64).unwrap()
            }
        })
        .collect()
}

/// A session over a fake packet filter holding one table, `bench`, of
/// `count` entries, along with the table's name.
pub fn seeded_session(count: usize) -> (TableSession<FakeBackend>, TableName) {
    let fake = FakeBackend::new().unwrap();
    fake.seed("bench", &table_addrs(count));
    let log = Logger::root(slog::Discard, o!());
    let session = TableSession::new(fake, &log).unwrap();
    let table = session.table_name("bench").unwrap();
    (session, table)
}
