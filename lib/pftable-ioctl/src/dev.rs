// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet-filter control device.

use super::Error;
use super::MAX_RECORDS;
use super::Request;
use super::backend::Backend;
use super::backend::Fetched;
use super::envelope::TableIoc;
use pftable_api::PlatformAbi;
use pftable_api::RecordBuf;
use pftable_api::TableChanges;
use pftable_api::TableName;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// The handle used to send table requests to the packet filter.
#[derive(Debug)]
pub struct DevPf {
    device: File,
    abi: PlatformAbi,
}

impl DevPf {
    /// Open the control device named by `abi`.
    pub fn open(abi: PlatformAbi) -> Result<Self, Error> {
        let path = abi.device.clone();
        Self::open_on(path, abi)
    }

    /// Open a control device on an arbitrary path.
    pub fn open_on(
        path: impl AsRef<Path>,
        abi: PlatformAbi,
    ) -> Result<Self, Error> {
        abi.validate()?;

        let path = path.as_ref();
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                let msg = format!("{}: {e}", path.display());
                match e.kind() {
                    std::io::ErrorKind::PermissionDenied => {
                        Error::PermissionDenied(msg)
                    }
                    _ => Error::DeviceUnavailable(msg),
                }
            })?;

        Ok(Self { device, abi })
    }

    fn run(
        &self,
        req: Request,
        table: &TableName,
        records: RecordBuf,
    ) -> Result<TableIoc, Error> {
        let mut ioc = TableIoc::new(&self.abi, table, records)?;
        let code = req.code(&self.abi.ioctl);
        let esize = ioc.esize();
        ioc.fire(self.device.as_raw_fd(), code)
            .map_err(|e| errno_to_error(req, table, esize, e))?;
        Ok(ioc)
    }

    fn empty(&self) -> RecordBuf {
        RecordBuf::new(self.abi.record.size)
    }
}

// Requests only fail with errno; there is no richer error payload.
fn errno_to_error(
    req: Request,
    table: &TableName,
    esize: usize,
    err: std::io::Error,
) -> Error {
    match err.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EACCES) => {
            Error::PermissionDenied(format!("{req:?} on table {table}"))
        }
        Some(libc::ESRCH) => Error::TableNotFound(table.to_string()),
        Some(libc::ENODEV) => Error::RecordSizeRejected { req, esize },
        Some(libc::ENXIO) => Error::DeviceUnavailable(err.to_string()),
        Some(libc::EINVAL) => Error::InvalidArgument(req),
        _ => Error::Io(req, err),
    }
}

impl Backend for DevPf {
    fn abi(&self) -> &PlatformAbi {
        &self.abi
    }

    fn query_count(&mut self, table: &TableName) -> Result<usize, Error> {
        let ioc = self.run(Request::GetAddrs, table, self.empty())?;
        ioc.size()
    }

    fn fetch(
        &mut self,
        table: &TableName,
        capacity: usize,
    ) -> Result<Fetched, Error> {
        // Refuse before allocating: the kernel could not be told about
        // more records than this anyway.
        let buf = Some(capacity)
            .filter(|c| *c <= MAX_RECORDS)
            .and_then(|c| RecordBuf::zeroed(self.abi.record.size, c))
            .ok_or(Error::TooLarge(capacity))?;
        let ioc = self.run(Request::GetAddrs, table, buf)?;
        let count = ioc.size()?;
        let mut records = ioc.into_records();

        // The kernel copies nothing out when the table outgrew the
        // buffer, so none of the records can be trusted.
        if count <= capacity {
            records.truncate(count);
        } else {
            records.truncate(0);
        }

        Ok(Fetched { records, count })
    }

    fn replace(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<TableChanges, Error> {
        let ioc = self.run(Request::SetAddrs, table, records.clone())?;
        Ok(TableChanges {
            added: ioc.nadd()?,
            deleted: ioc.ndel()?,
            changed: ioc.nchange()?,
        })
    }

    fn add(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<usize, Error> {
        let ioc = self.run(Request::AddAddrs, table, records.clone())?;
        ioc.nadd()
    }

    fn delete(
        &mut self,
        table: &TableName,
        records: &RecordBuf,
    ) -> Result<usize, Error> {
        let ioc = self.run(Request::DelAddrs, table, records.clone())?;
        ioc.ndel()
    }

    fn clear(&mut self, table: &TableName) -> Result<usize, Error> {
        let ioc = self.run(Request::ClrAddrs, table, self.empty())?;
        ioc.ndel()
    }
}
