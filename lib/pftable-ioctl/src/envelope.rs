// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The `pfioc_table` argument of a table request.
//!
//! The envelope is built as a byte image laid out by the target's
//! [`EnvelopeLayout`] rather than as a `repr(C)` struct, so that one
//! binary can speak to any target the ABI description covers.

use super::Error;
use pftable_api::EnvelopeLayout;
use pftable_api::PlatformAbi;
use pftable_api::RecordBuf;
use pftable_api::TableName;

/// One request envelope together with the record buffer it points at.
///
/// An envelope is built for a single request and dropped afterwards.
/// It owns its records, and the buffer pointer and element count are
/// written from them immediately before every call, so the kernel
/// never sees a pointer to a buffer that has moved or a count larger
/// than the buffer.
#[derive(Debug)]
pub(crate) struct TableIoc {
    layout: EnvelopeLayout,
    bytes: Vec<u8>,
    records: RecordBuf,
    // `records.len()`, checked to fit the size field.
    count: i32,
}

impl TableIoc {
    pub(crate) fn new(
        abi: &PlatformAbi,
        table: &TableName,
        records: RecordBuf,
    ) -> Result<Self, Error> {
        let layout = abi.envelope;
        let mut bytes = vec![0u8; layout.size];
        let name_start = layout.table_name_offset;
        table.write_field(
            &mut bytes[name_start..name_start + abi.table_name_size],
        )?;

        let esize = i32::try_from(records.record_size())
            .map_err(|_| Error::TooLarge(records.record_size()))?;
        let count = i32::try_from(records.len())
            .map_err(|_| Error::TooLarge(records.len()))?;

        let mut ioc = Self { layout, bytes, records, count };
        ioc.put_i32(layout.esize_offset, esize);
        ioc.put_i32(layout.size_offset, count);
        Ok(ioc)
    }

    fn put_i32(&mut self, offset: usize, val: i32) {
        self.bytes[offset..offset + 4].copy_from_slice(&val.to_ne_bytes());
    }

    fn get_i32(&self, offset: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[offset..offset + 4]);
        i32::from_ne_bytes(raw)
    }

    fn get_count(
        &self,
        field: &'static str,
        offset: usize,
    ) -> Result<usize, Error> {
        let value = self.get_i32(offset);
        usize::try_from(value).map_err(|_| Error::BadCount { field, value })
    }

    /// The element count: the capacity on the way in, the number of
    /// entries in the table on the way out of a get.
    pub(crate) fn size(&self) -> Result<usize, Error> {
        self.get_count("size", self.layout.size_offset)
    }

    pub(crate) fn nadd(&self) -> Result<usize, Error> {
        self.get_count("nadd", self.layout.nadd_offset)
    }

    pub(crate) fn ndel(&self) -> Result<usize, Error> {
        self.get_count("ndel", self.layout.ndel_offset)
    }

    pub(crate) fn nchange(&self) -> Result<usize, Error> {
        self.get_count("nchange", self.layout.nchange_offset)
    }

    pub(crate) fn esize(&self) -> usize {
        self.records.record_size()
    }

    /// Point the envelope at its own record buffer and return the
    /// argument to hand to ioctl(2).
    pub(crate) fn prepare(&mut self) -> *mut u8 {
        self.put_i32(self.layout.size_offset, self.count);

        let buf = if self.records.is_empty() {
            core::ptr::null_mut()
        } else {
            self.records.as_mut_bytes().as_mut_ptr()
        };
        let off = self.layout.buffer_offset;
        self.bytes[off..off + size_of::<usize>()]
            .copy_from_slice(&(buf as usize).to_ne_bytes());

        self.bytes.as_mut_ptr()
    }

    /// Issue the request on `fd`.
    pub(crate) fn fire(
        &mut self,
        fd: libc::c_int,
        code: u64,
    ) -> std::io::Result<()> {
        let arg = self.prepare();

        // Safety: `arg` points at an envelope of `layout.size` bytes
        // whose buffer field points at `records`, which holds exactly
        // as many elements of `esize` bytes as the size field claims.
        // Both stay borrowed through `self` for the whole call.
        let ret = unsafe { ioctl(fd, code, arg) };
        if ret == -1 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    pub(crate) fn into_records(self) -> RecordBuf {
        self.records
    }

    #[cfg(test)]
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

unsafe fn ioctl<T>(fd: libc::c_int, req: u64, arg: *mut T) -> libc::c_int {
    // The request argument is an unsigned long on most systems and an
    // int on others; let the cast follow whatever libc declares.
    unsafe { libc::ioctl(fd, req as _, arg) }
}
