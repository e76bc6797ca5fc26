// NetSecSim: Containerized BGP lab orchestration written in Rust
// Copyright (C) 2023 The NetSecSim Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Exclusive ownership of a state directory.

use std::{
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::PathBuf,
};

use time::{format_description, OffsetDateTime};

use crate::LabError;

/// Name of the lock file inside the state directory (see [`crate::config::LabConfig::lock_file`]).
pub(crate) const LOCK_FILE: &str = "netsecsim.lock";

/// Lock on a state directory. The lock file is created exclusively, and contains the owner and
/// the time at which the lock was obtained. It is removed when the lock is dropped.
#[derive(Debug)]
pub(crate) struct LabLock {
    path: PathBuf,
}

impl LabLock {
    /// Try to obtain the lock at `path`, creating its directory if necessary. If a different
    /// instance owns the lock, this function returns [`LabError::CannotObtainLock`] with the
    /// content of the lock file.
    pub(crate) fn acquire(path: PathBuf) -> Result<Self, LabError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        log::trace!("Obtaining the lock {}", path.display());
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| String::from("<unknown>"));
                log::error!("Cannot obtain the lock! {owner} is already running a lab!");
                return Err(LabError::CannotObtainLock(owner));
            }
            Err(e) => return Err(e.into()),
        };
        let lock = Self { path };

        let owner = std::env::var("USER").unwrap_or_else(|_| String::from("<unknown>"));
        let since = format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
            .ok()
            .and_then(|fmt| {
                OffsetDateTime::now_local()
                    .unwrap_or_else(|_| OffsetDateTime::now_utc())
                    .format(&fmt)
                    .ok()
            })
            .unwrap_or_default();
        writeln!(file, "{owner} (pid {}, since {since})", std::process::id())?;

        Ok(lock)
    }
}

impl Drop for LabLock {
    fn drop(&mut self) {
        log::debug!("Releasing lock (drop)");
        let _ = std::fs::remove_file(&self.path);
    }
}
