// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::abi::PlatformAbi;
use core::fmt;
use core::fmt::Display;
use core::ops::Deref;
use serde::Serialize;
use thiserror::Error;

/// Reasons a table name is rejected.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TableNameError {
    #[error("table name is empty")]
    Empty,

    #[error("table name is {len} bytes, the maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("table name contains a NUL byte")]
    InteriorNul,
}

/// The name of a packet-filter table.
///
/// A `TableName` is non-empty, holds no NUL, and fits in the target's
/// name field with room for the terminating NUL. Names that are too
/// long are rejected, never truncated.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct TableName(String);

impl TableName {
    /// Validate `name` against the name field width of `abi`.
    pub fn new(name: &str, abi: &PlatformAbi) -> Result<Self, TableNameError> {
        Self::with_max_len(name, abi.max_table_name_len())
    }

    /// Validate `name` against an explicit maximum length in bytes.
    pub fn with_max_len(
        name: &str,
        max_len: usize,
    ) -> Result<Self, TableNameError> {
        if name.is_empty() {
            return Err(TableNameError::Empty);
        }

        if name.contains('\0') {
            return Err(TableNameError::InteriorNul);
        }

        if name.len() > max_len {
            return Err(TableNameError::TooLong {
                len: name.len(),
                max: max_len,
            });
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Copy the name into a fixed-width, NUL-terminated field.
    ///
    /// The whole of `field` is overwritten. The name was validated
    /// when it was built, but possibly against a different width, so
    /// the width is checked again here.
    pub fn write_field(&self, field: &mut [u8]) -> Result<(), TableNameError> {
        let bytes = self.0.as_bytes();
        if bytes.len() >= field.len() {
            return Err(TableNameError::TooLong {
                len: bytes.len(),
                max: field.len().saturating_sub(1),
            });
        }

        field.fill(0);
        field[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Deref for TableName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
