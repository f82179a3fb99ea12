// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Read and replace the addresses held by a packet-filter table.
//!
//! A [`TableSession`] drives the table control protocol against a
//! [`Backend`]: either [`DevPf`], which issues ioctl(2) requests on the
//! packet-filter control device, or the in-memory `FakeBackend`
//! (feature `test-help`).
//!
//! The caller must already hold whatever privilege the control device
//! requires; this crate only reports when it is missing.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use pftable_api::AbiError;
use pftable_api::CodecError;
use pftable_api::RequestCodes;
use pftable_api::TableNameError;
use thiserror::Error;

pub mod backend;
pub mod dev;
mod envelope;
#[cfg(any(feature = "test-help", test))]
pub mod fake;
pub mod session;

pub use backend::Backend;
pub use backend::Fetched;
pub use dev::DevPf;
#[cfg(any(feature = "test-help", test))]
pub use fake::FakeBackend;
pub use session::MAX_ATTEMPTS;
pub use session::TableSession;

/// The most records a single request can carry: the envelope's element
/// count is a C `int`.
pub const MAX_RECORDS: usize = i32::MAX as usize;

/// The table address requests understood by the control device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    GetAddrs,
    SetAddrs,
    AddAddrs,
    DelAddrs,
    ClrAddrs,
}

impl Request {
    /// The request code for this request on a given target.
    pub fn code(&self, codes: &RequestCodes) -> u64 {
        match self {
            Self::GetAddrs => codes.get_addrs,
            Self::SetAddrs => codes.set_addrs,
            Self::AddAddrs => codes.add_addrs,
            Self::DelAddrs => codes.del_addrs,
            Self::ClrAddrs => codes.clr_addrs,
        }
    }
}

/// Errors related to reading or writing table addresses.
#[derive(Debug, Error)]
pub enum Error {
    /// The name was rejected before any request was issued.
    #[error("invalid table name: {0}")]
    InvalidTableName(#[from] TableNameError),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("control device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A record carried a family tag that is neither IPv4 nor IPv6 for
    /// this target, which means the ABI description does not match the
    /// kernel.
    #[error("unsupported address family tag {0}")]
    UnsupportedAddressFamily(u8),

    #[error("malformed address record: {0}")]
    Codec(CodecError),

    /// The table changed size on every attempt to read it.
    #[error("table {table} kept growing, gave up after {attempts} attempts")]
    Exhausted { table: String, attempts: u8 },

    /// The backend claimed a complete read but returned fewer records.
    #[error("read of table {table} returned {actual} of {expected} records")]
    Truncated { table: String, expected: usize, actual: usize },

    /// The kernel refused the element size we sent.
    #[error("{req:?} rejected record size {esize}, ABI mismatch")]
    RecordSizeRejected { req: Request, esize: usize },

    #[error("{0:?} rejected as invalid")]
    InvalidArgument(Request),

    #[error("request for {0} records exceeds the envelope's range")]
    TooLarge(usize),

    /// The kernel wrote back a count that cannot be a number of records.
    #[error("kernel returned a negative {field} count: {value}")]
    BadCount { field: &'static str, value: i32 },

    #[error("invalid platform ABI: {0}")]
    Abi(#[from] AbiError),

    #[error("{0:?} failed: {1}")]
    Io(Request, std::io::Error),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnsupportedAddressFamily(af) => {
                Self::UnsupportedAddressFamily(af)
            }
            e => Self::Codec(e),
        }
    }
}
