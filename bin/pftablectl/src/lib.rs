// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Plumbing shared by `pftablectl`'s subcommands.

use anyhow::Context;
use anyhow::anyhow;
use pftable_api::PlatformAbi;
use slog::Drain;
use slog::Logger;
use slog::o;
use std::path::Path;

/// Pick the target ABI: the one described in `abi_file` if given,
/// otherwise the built-in description of the running target. A
/// `device` overrides the control device path either way.
pub fn resolve_abi(
    abi_file: Option<&Path>,
    device: Option<&Path>,
) -> anyhow::Result<PlatformAbi> {
    let mut abi = match abi_file {
        Some(path) => PlatformAbi::from_toml_file(path).with_context(|| {
            format!("failed to load ABI from {}", path.display())
        })?,
        None => PlatformAbi::host().ok_or_else(|| {
            anyhow!("no built-in packet-filter ABI for this target, use --abi")
        })?,
    };

    if let Some(device) = device {
        abi.device = device.display().to_string();
    }

    Ok(abi)
}

/// Build a logger that writes to stderr, filtered by `RUST_LOG`.
///
/// Records are written from a background thread; keep the returned
/// guard alive until the program is done logging.
pub fn build_logger() -> (Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    let log = Logger::root(
        drain.fuse(),
        o!("cmd" => "pftablectl", "version" => env!("CARGO_PKG_VERSION")),
    );
    (log, guard)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn abi_file_and_device_override() {
        let path = Path::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../crates/pftable-api/abi/openbsd-amd64.toml"
        ));
        let abi =
            resolve_abi(Some(path), Some(Path::new("/tmp/pf-test"))).unwrap();
        assert_eq!(abi.device, "/tmp/pf-test");
        assert_eq!(abi.record, PlatformAbi::openbsd_amd64().record);
    }

    #[test]
    fn missing_abi_file() {
        let err = resolve_abi(Some(Path::new("/nonexistent/abi.toml")), None)
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/abi.toml"));
    }
}
