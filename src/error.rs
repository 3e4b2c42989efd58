// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/error.rs - Error types for flash image unpacking.
 *  Copyright (C) 2026  Forest Crossman <cyrozap@gmail.com>
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or unpacking an image.
#[derive(Error, Debug)]
pub enum Error {
    /// A read, skip, or window request ran past the active reader's limit.
    #[error(
        "out of bounds: {requested} bytes requested at offset {offset:#x}, {available} available"
    )]
    OutOfBounds {
        /// Store-absolute offset of the failed request.
        offset: usize,
        requested: usize,
        available: usize,
    },

    /// A magic number, signature, or structural field had an impossible value.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// An on-disk address was smaller than the volume's rebasing base.
    #[error("address {address:#x} lies below volume base {base:#x}")]
    AddressUnderflow { address: u32, base: u32 },

    /// The same `(address, size)` pair was visited twice on one descent.
    #[error("structural cycle: node at {address:#x} (size {size}) visited twice")]
    StructuralCycle { address: u32, size: u32 },

    /// Creating or writing a host file or directory failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A compressed payload could not be inflated.
    #[error("decompression failed: {0}")]
    Decompression(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors that must abort the whole run rather than
    /// only the subtree or table row that raised them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_is_fatal() {
        let io = Error::io(
            "out/file",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(io.is_fatal());
        assert!(!Error::FormatMismatch("bad magic".into()).is_fatal());
        assert!(!Error::StructuralCycle { address: 1, size: 2 }.is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let e = Error::AddressUnderflow {
            address: 0x10,
            base: 0x100,
        };
        assert_eq!(e.to_string(), "address 0x10 lies below volume base 0x100");

        let e = Error::io(
            "out/sys/bin",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(e.to_string(), "I/O error on out/sys/bin: disk full");
    }
}
