// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Per-target description of the table control ABI.
//!
//! Structure sizes, field offsets, address-family tags and request
//! codes differ between operating systems, and sometimes between
//! architectures of the same operating system. None of them are baked
//! into the codec or the request envelope; both are driven entirely by
//! a [`PlatformAbi`] that is either compiled in for a known target
//! ([`PlatformAbi::host()`]) or loaded from a TOML file at startup.

use cfg_if::cfg_if;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Width of the address storage at the start of every address record.
///
/// The kernel overlays an IPv4 address on the same storage as an IPv6
/// address, so the field is always as wide as the larger of the two.
pub const ADDR_BYTES: usize = 16;

/// The smallest address record that can carry the address storage
/// plus the family, prefix length and negation bytes.
pub const MIN_RECORD_SIZE: usize = ADDR_BYTES + 3;

const IOC_INOUT: u64 = 0xC000_0000;
const IOCPARM_MASK: u64 = 0x1FFF;

/// Compute a BSD `_IOWR(group, num, type)` request code for an argument
/// of `len` bytes.
pub const fn iowr(group: u8, num: u8, len: usize) -> u64 {
    IOC_INOUT
        | ((len as u64 & IOCPARM_MASK) << 16)
        | ((group as u64) << 8)
        | num as u64
}

/// Errors in a platform ABI description.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("table name field must hold a name and a NUL, got width {0}")]
    NameSize(usize),

    #[error("address family tags must differ, both are {0}")]
    FamilyTags(u8),

    #[error("record field {field} at offset {offset} is outside {min}..{size}")]
    RecordField { field: &'static str, offset: usize, min: usize, size: usize },

    #[error("record size {0} is below the minimum of {min}", min = MIN_RECORD_SIZE)]
    RecordSize(usize),

    #[error("envelope field {field} at offset {offset} does not fit in {size}")]
    EnvelopeField { field: &'static str, offset: usize, size: usize },

    #[error("request code {0:#x} is used by more than one request")]
    DuplicateRequestCode(u64),

    #[error("failed to read ABI file {path}: {err}")]
    Read { path: String, err: std::io::Error },

    #[error("failed to parse ABI description: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The two address-family tags the kernel uses in address records.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FamilyTags {
    pub inet: u8,
    pub inet6: u8,
}

/// Layout of one address record (`struct pfr_addr`).
///
/// The address storage always starts at offset zero and spans
/// [`ADDR_BYTES`]. Every byte not named here is written as zero.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecordLayout {
    pub size: usize,
    pub af_offset: usize,
    pub net_offset: usize,
    pub not_offset: usize,
}

/// Layout of the request envelope (`struct pfioc_table`).
///
/// All counters are native-endian 32-bit integers; the buffer field
/// holds a native pointer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvelopeLayout {
    pub size: usize,
    pub table_name_offset: usize,
    pub buffer_offset: usize,
    pub esize_offset: usize,
    pub size_offset: usize,
    pub nadd_offset: usize,
    pub ndel_offset: usize,
    pub nchange_offset: usize,
    pub flags_offset: usize,
}

/// The request codes for each table address operation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RequestCodes {
    pub get_addrs: u64,
    pub set_addrs: u64,
    pub add_addrs: u64,
    pub del_addrs: u64,
    pub clr_addrs: u64,
}

/// Everything target-specific about the table control ABI.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformAbi {
    /// Path of the control device.
    pub device: String,
    /// Width of the NUL-terminated table name field.
    pub table_name_size: usize,
    pub family: FamilyTags,
    pub record: RecordLayout,
    pub envelope: EnvelopeLayout,
    pub ioctl: RequestCodes,
}

cfg_if! {
    if #[cfg(all(target_os = "openbsd", target_arch = "x86_64"))] {
        fn host_abi() -> Option<PlatformAbi> {
            Some(PlatformAbi::openbsd_amd64())
        }
    } else {
        fn host_abi() -> Option<PlatformAbi> {
            None
        }
    }
}

impl PlatformAbi {
    /// OpenBSD on amd64.
    pub fn openbsd_amd64() -> Self {
        // sizeof (struct pfioc_table)
        const PFIOC_TABLE_SIZE: usize = 1104;

        Self {
            device: "/dev/pf".to_string(),
            table_name_size: 32,
            family: FamilyTags { inet: 2, inet6: 24 },
            record: RecordLayout {
                size: 52,
                af_offset: 38,
                net_offset: 39,
                not_offset: 40,
            },
            envelope: EnvelopeLayout {
                size: PFIOC_TABLE_SIZE,
                table_name_offset: 1024,
                buffer_offset: 1064,
                esize_offset: 1072,
                size_offset: 1076,
                nadd_offset: 1084,
                ndel_offset: 1088,
                nchange_offset: 1092,
                flags_offset: 1096,
            },
            ioctl: RequestCodes {
                clr_addrs: iowr(b'D', 66, PFIOC_TABLE_SIZE),
                add_addrs: iowr(b'D', 67, PFIOC_TABLE_SIZE),
                del_addrs: iowr(b'D', 68, PFIOC_TABLE_SIZE),
                set_addrs: iowr(b'D', 69, PFIOC_TABLE_SIZE),
                get_addrs: iowr(b'D', 70, PFIOC_TABLE_SIZE),
            },
        }
    }

    /// The ABI compiled in for the running target, if it is a known
    /// one.
    pub fn host() -> Option<Self> {
        host_abi()
    }

    /// Parse and validate a TOML description.
    pub fn from_toml_str(s: &str) -> Result<Self, AbiError> {
        let abi: Self = toml::from_str(s)?;
        abi.validate()?;
        Ok(abi)
    }

    /// Read, parse and validate a TOML description from `path`.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, AbiError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|err| AbiError::Read {
            path: path.display().to_string(),
            err,
        })?;
        Self::from_toml_str(&s)
    }

    /// The longest table name this target accepts.
    pub fn max_table_name_len(&self) -> usize {
        self.table_name_size.saturating_sub(1)
    }

    /// Check that the description is internally consistent.
    pub fn validate(&self) -> Result<(), AbiError> {
        if self.table_name_size < 2 {
            return Err(AbiError::NameSize(self.table_name_size));
        }

        if self.family.inet == self.family.inet6 {
            return Err(AbiError::FamilyTags(self.family.inet));
        }

        let rec = &self.record;
        if rec.size < MIN_RECORD_SIZE {
            return Err(AbiError::RecordSize(rec.size));
        }

        let mut seen = BTreeSet::new();
        for (field, offset) in [
            ("af", rec.af_offset),
            ("net", rec.net_offset),
            ("not", rec.not_offset),
        ] {
            if offset < ADDR_BYTES || offset >= rec.size || !seen.insert(offset)
            {
                return Err(AbiError::RecordField {
                    field,
                    offset,
                    min: ADDR_BYTES,
                    size: rec.size,
                });
            }
        }

        let env = &self.envelope;
        let ptr_size = size_of::<usize>();
        for (field, offset, width) in [
            ("table_name", env.table_name_offset, self.table_name_size),
            ("buffer", env.buffer_offset, ptr_size),
            ("esize", env.esize_offset, 4),
            ("size", env.size_offset, 4),
            ("nadd", env.nadd_offset, 4),
            ("ndel", env.ndel_offset, 4),
            ("nchange", env.nchange_offset, 4),
            ("flags", env.flags_offset, 4),
        ] {
            if offset + width > env.size {
                return Err(AbiError::EnvelopeField {
                    field,
                    offset,
                    size: env.size,
                });
            }
        }

        let codes = &self.ioctl;
        let mut seen = BTreeSet::new();
        for code in [
            codes.get_addrs,
            codes.set_addrs,
            codes.add_addrs,
            codes.del_addrs,
            codes.clr_addrs,
        ] {
            if !seen.insert(code) {
                return Err(AbiError::DuplicateRequestCode(code));
            }
        }

        Ok(())
    }
}
