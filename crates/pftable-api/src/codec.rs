// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Conversion between [`TableAddr`] and the kernel's address record.
//!
//! In the kernel an address record carries a union of an IPv4 and an
//! IPv6 address, disambiguated only by a sibling family tag. Here the
//! tag is checked first and decides how many address bytes are read;
//! a tag that is neither of the two known values is an error, never a
//! guess.

use super::abi::ADDR_BYTES;
use super::abi::AbiError;
use super::abi::FamilyTags;
use super::abi::PlatformAbi;
use super::abi::RecordLayout;
use super::addr::TableAddr;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use thiserror::Error;

/// Errors decoding an address record.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CodecError {
    #[error("unsupported address family: {0}")]
    UnsupportedAddressFamily(u8),

    #[error("bad {family} prefix length in record: {len}")]
    BadPrefixLen { family: &'static str, len: u8 },

    #[error("record is {actual} bytes, expected {expected}")]
    RecordSize { expected: usize, actual: usize },
}

/// One address record in its raw wire form.
///
/// Only [`AddrCodec`] produces or interprets the contents.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AddrRecord(Vec<u8>);

impl AddrRecord {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A contiguous array of address records, as handed to the kernel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordBuf {
    record_size: usize,
    bytes: Vec<u8>,
}

impl RecordBuf {
    /// An empty buffer of records of `record_size` bytes.
    pub fn new(record_size: usize) -> Self {
        Self { record_size, bytes: Vec::new() }
    }

    /// A buffer of `count` zeroed records, for the kernel to fill, or
    /// `None` if its size in bytes overflows.
    pub fn zeroed(record_size: usize, count: usize) -> Option<Self> {
        let len = record_size.checked_mul(count)?;
        Some(Self { record_size, bytes: vec![0; len] })
    }

    /// Append a record.
    pub fn push(&mut self, rec: &AddrRecord) -> Result<(), CodecError> {
        if rec.len() != self.record_size {
            return Err(CodecError::RecordSize {
                expected: self.record_size,
                actual: rec.len(),
            });
        }

        self.bytes.extend_from_slice(rec.as_bytes());
        Ok(())
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// The number of records in the buffer.
    pub fn len(&self) -> usize {
        self.bytes.len().checked_div(self.record_size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Keep only the first `count` records.
    pub fn truncate(&mut self, count: usize) {
        self.bytes.truncate(count.saturating_mul(self.record_size));
    }

    /// Iterate over the raw bytes of each record.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        // A zero-sized record can only ever be pushed as nothing, so
        // the buffer is empty and any nonzero chunk size yields nothing.
        self.bytes.chunks_exact(self.record_size.max(1))
    }

    /// Copy out each record.
    pub fn records(&self) -> Vec<AddrRecord> {
        self.iter().map(|b| AddrRecord(b.to_vec())).collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Encodes and decodes address records for one target.
#[derive(Clone, Copy, Debug)]
pub struct AddrCodec {
    layout: RecordLayout,
    family: FamilyTags,
}

impl AddrCodec {
    /// Build a codec for `abi`, which is validated first: every offset
    /// the codec writes must lie inside the record.
    pub fn new(abi: &PlatformAbi) -> Result<Self, AbiError> {
        abi.validate()?;
        Ok(Self { layout: abi.record, family: abi.family })
    }

    pub fn record_size(&self) -> usize {
        self.layout.size
    }

    /// An empty record buffer sized for this target.
    pub fn buf(&self) -> RecordBuf {
        RecordBuf::new(self.layout.size)
    }

    pub fn encode(&self, addr: &TableAddr) -> AddrRecord {
        let mut rec = vec![0u8; self.layout.size];
        self.encode_into(addr, &mut rec);
        AddrRecord(rec)
    }

    /// Encode every address, in order, into one contiguous buffer.
    pub fn encode_all<'a>(
        &self,
        addrs: impl IntoIterator<Item = &'a TableAddr>,
    ) -> RecordBuf {
        let addrs = addrs.into_iter();
        let mut bytes =
            Vec::with_capacity(addrs.size_hint().0 * self.layout.size);
        for addr in addrs {
            let start = bytes.len();
            bytes.resize(start + self.layout.size, 0);
            self.encode_into(addr, &mut bytes[start..]);
        }

        RecordBuf { record_size: self.layout.size, bytes }
    }

    // `rec` must be exactly one zeroed record.
    fn encode_into(&self, addr: &TableAddr, rec: &mut [u8]) {
        let af = match addr.ip() {
            IpAddr::V4(ip) => {
                rec[..4].copy_from_slice(&ip.octets());
                self.family.inet
            }

            IpAddr::V6(ip) => {
                rec[..ADDR_BYTES].copy_from_slice(&ip.octets());
                self.family.inet6
            }
        };

        rec[self.layout.af_offset] = af;
        rec[self.layout.net_offset] = addr.effective_prefix_len();
        rec[self.layout.not_offset] = u8::from(addr.is_negated());
    }

    pub fn decode(&self, rec: &AddrRecord) -> Result<TableAddr, CodecError> {
        self.decode_bytes(rec.as_bytes())
    }

    /// Decode one record from its raw bytes.
    pub fn decode_bytes(&self, rec: &[u8]) -> Result<TableAddr, CodecError> {
        if rec.len() != self.layout.size {
            return Err(CodecError::RecordSize {
                expected: self.layout.size,
                actual: rec.len(),
            });
        }

        let af = rec[self.layout.af_offset];
        let (ip, family) = if af == self.family.inet {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&rec[..4]);
            (IpAddr::V4(Ipv4Addr::from(octets)), "IPv4")
        } else if af == self.family.inet6 {
            let mut octets = [0u8; ADDR_BYTES];
            octets.copy_from_slice(&rec[..ADDR_BYTES]);
            (IpAddr::V6(Ipv6Addr::from(octets)), "IPv6")
        } else {
            return Err(CodecError::UnsupportedAddressFamily(af));
        };

        let net = rec[self.layout.net_offset];
        let addr = TableAddr::network(ip, net)
            .map_err(|_| CodecError::BadPrefixLen { family, len: net })?;

        Ok(addr.with_negation(rec[self.layout.not_offset] != 0))
    }

    /// Decode every record in `buf`.
    pub fn decode_all(
        &self,
        buf: &RecordBuf,
    ) -> Result<Vec<TableAddr>, CodecError> {
        buf.iter().map(|rec| self.decode_bytes(rec)).collect()
    }
}
