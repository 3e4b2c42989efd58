// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/lib.rs - Unpacking library for Symbian flash images and firmware.
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

/*!
 * # `flashdump` Crate
 *
 * A library for unpacking raw device-flash dumps: Symbian read-only
 * filesystem (ROFS) images, flash volume tables, and compressed firmware
 * segments.
 *
 * The crate is organized around a single bounded cursor type:
 *
 * 1. [reader]: [reader::BoundedReader], the bounds-checked cursor every
 *    decoder reads through.
 * 2. [rofs]: Recovers the directory tree of a ROFS image onto the host.
 * 3. [volume]: Splits a flash dump into partitions by its volume table,
 *    following chained tables.
 * 4. [compression]: LZSS and zlib decompressors for segment payloads.
 * 5. [format]: Picks the right decoder for a file by name or signature.
 *
 * ## Usage Example
 *
 * ```no_run
 * use std::path::Path;
 *
 * use flashdump::reader::BoundedReader;
 * use flashdump::rofs;
 *
 * fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     // Load the image
 *     let image = BoundedReader::open("core.rofs")?;
 *
 *     // Unpack the directory tree
 *     let report = rofs::extract(&image, Path::new("rofs"))?;
 *
 *     // Inspect what was written and what was skipped
 *     for entry in report.files() {
 *         println!("{} ({} bytes)", entry.path.display(), entry.size);
 *     }
 *     for warning in &report.warnings {
 *         println!("warning: {}: {}", warning.path.display(), warning.message);
 *     }
 *
 *     Ok(())
 * }
 * ```
 */

pub mod compression;
pub mod error;
pub mod format;
pub mod reader;
pub mod report;
pub mod rofs;
pub mod volume;

pub use error::{Error, Result};

/// Tunables shared by the decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Signature of the vendor flash container that wraps some ROFS images.
    /// An image starting with it has a fixed-size header skipped before
    /// decoding.
    pub flash_header_magic: [u8; 4],
    /// Name of the volume table row whose partition holds a chained table.
    pub toc_partition_name: String,
    /// Whether partitions carrying a ROFS signature are also unpacked into a
    /// directory next to their raw image.
    pub unpack_filesystems: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            flash_header_magic: *b"FPSX",
            toc_partition_name: String::from("TOC"),
            unpack_filesystems: true,
        }
    }
}

/// Checks that a name taken from an image can be used as a single host path
/// component.
pub(crate) fn host_component(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::FormatMismatch(format!(
            "{name:?} is not a usable file name"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_component() {
        assert_eq!(host_component("EKern.exe").unwrap(), "EKern.exe");
        assert_eq!(host_component("My Files").unwrap(), "My Files");
        for bad in ["", ".", "..", "a/b", "..\\x", "nul\0"] {
            assert!(host_component(bad).is_err(), "{bad:?} accepted");
        }
    }
}
