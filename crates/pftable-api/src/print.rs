// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print table contents in a human-friendly manner.
//!
//! Shared by pftablectl and the integration tests.

use super::TableChanges;
use super::addr::TableAddr;
use super::table::TableName;
use std::io::Write;
use tabwriter::TabWriter;

/// Print the contents of a table.
pub fn print_table(
    name: &TableName,
    addrs: &[TableAddr],
) -> std::io::Result<()> {
    print_table_into(&mut std::io::stdout(), name, addrs)
}

/// Print the contents of a table into a given writer.
pub fn print_table_into(
    writer: &mut impl Write,
    name: &TableName,
    addrs: &[TableAddr],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Table {name}: {} entries", addrs.len())?;
    write_hr(&mut t)?;
    writeln!(t, "FAMILY\tADDRESS\tPREFIX\tNEGATED")?;
    for addr in addrs {
        let family = if addr.is_ipv4() { "inet" } else { "inet6" };
        let prefix = match addr.prefix_len() {
            Some(len) => len.to_string(),
            None => "host".to_string(),
        };
        writeln!(
            t,
            "{family}\t{}\t{prefix}\t{}",
            addr.ip(),
            if addr.is_negated() { "yes" } else { "no" },
        )?;
    }
    t.flush()
}

/// Print the summary of a write request.
pub fn print_changes(
    name: &TableName,
    changes: &TableChanges,
) -> std::io::Result<()> {
    print_changes_into(&mut std::io::stdout(), name, changes)
}

/// Print the summary of a write request into a given writer.
pub fn print_changes_into(
    writer: &mut impl Write,
    name: &TableName,
    changes: &TableChanges,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "TABLE\tADDED\tDELETED\tCHANGED")?;
    writeln!(
        t,
        "{name}\t{}\t{}\t{}",
        changes.added, changes.deleted, changes.changed
    )?;
    t.flush()
}

/// Output a horizontal rule to the given writer.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
