// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

use pftable_api::TableAddr;
use pftable_api::TableChanges;
use pftable_api::print::print_changes;
use pftable_api::print::print_table;
use pftable_ioctl::DevPf;
use pftable_ioctl::TableSession;

/// Inspect and modify the address tables of the packet filter.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct Target {
    /// Path of the packet-filter control device.
    #[arg(long, global = true)]
    device: Option<PathBuf>,

    /// Load the target ABI from a TOML file instead of using the
    /// built-in description of this platform.
    #[arg(long, global = true)]
    abi: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the addresses in a table.
    Show { table: String },

    /// Replace the contents of a table. With no addresses the table is
    /// emptied.
    Replace {
        table: String,
        /// Entries of the form `[!]addr[/len]`.
        addrs: Vec<TableAddr>,
    },

    /// Add addresses to a table.
    Add {
        table: String,
        #[arg(required = true)]
        addrs: Vec<TableAddr>,
    },

    /// Delete addresses from a table.
    Delete {
        table: String,
        #[arg(required = true)]
        addrs: Vec<TableAddr>,
    },

    /// Remove every address from a table.
    Flush { table: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (log, _guard) = pftablectl::build_logger();
    let abi = pftablectl::resolve_abi(
        cli.target.abi.as_deref(),
        cli.target.device.as_deref(),
    )?;
    let session = TableSession::new(DevPf::open(abi)?, &log)?;

    match cli.cmd {
        Command::Show { table } => {
            let table = session.table_name(&table)?;
            let addrs = session.get_addresses(&table)?;
            print_table(&table, &addrs)?;
        }

        Command::Replace { table, addrs } => {
            let table = session.table_name(&table)?;
            let changes = session.set_addresses(&table, &addrs)?;
            print_changes(&table, &changes)?;
        }

        Command::Add { table, addrs } => {
            let table = session.table_name(&table)?;
            let added = session.add_addresses(&table, &addrs)?;
            let changes = TableChanges { added, ..Default::default() };
            print_changes(&table, &changes)?;
        }

        Command::Delete { table, addrs } => {
            let table = session.table_name(&table)?;
            let deleted = session.delete_addresses(&table, &addrs)?;
            let changes = TableChanges { deleted, ..Default::default() };
            print_changes(&table, &changes)?;
        }

        Command::Flush { table } => {
            let table = session.table_name(&table)?;
            let deleted = session.clear_addresses(&table)?;
            let changes = TableChanges { deleted, ..Default::default() };
            print_changes(&table, &changes)?;
        }
    }

    Ok(())
}
