// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/rofs.rs - Symbian read-only filesystem (ROFS) unpacker.
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
 * # `rofs` Module
 *
 * This module recovers the directory tree of a Symbian ROFS image and writes
 * it to the host filesystem.
 *
 * Directory nodes and file blocks refer to each other by absolute flash
 * addresses. Those are turned into image offsets by subtracting a per-volume
 * base derived from the directory tree offset in the image header.
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
 *     let image = BoundedReader::open("core.rofs")?;
 *     let report = rofs::extract(&image, Path::new("rofs"))?;
 *
 *     for failure in &report.failures {
 *         println!("skipped {}: {}", failure.path.display(), failure.error);
 *     }
 *
 *     Ok(())
 * }
 * ```
 */

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tracing::{debug, info};

use crate::ExtractOptions;
use crate::error::{Error, Result};
use crate::host_component;
use crate::reader::BoundedReader;
use crate::report::{EntryKind, ExtractionReport};

/// Signature of a plain ROFS image.
pub const ROFS_MAGIC: [u8; 4] = *b"ROFS";
/// Signature of a ROFS extension image.
pub const ROFX_MAGIC: [u8; 4] = *b"ROFx";
/// Size of the vendor flash header some images are wrapped in.
pub const COMMON_FLASH_HEADER_SIZE: usize = 1024;

// On-disk addresses are biased by this much relative to the tree offset.
const REBASE_BIAS: u32 = 0x30;
const EXPECTED_FIRST_ENTRY_OFFSET: u8 = 12;
// Magic, header size, and reserved byte precede the header window.
const HEADER_PREAMBLE_LEN: usize = 6;
const ENTRY_RESERVED_LEN: usize = 16 + 2;

/// Version of the software the image was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

/// The ROFS image header.
///
/// Only the directory tree location drives decoding. The file entry block is
/// reached through the directory nodes, and the remaining fields are kept for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RofsHeader {
    pub header_size: u8,
    pub format_version: u16,
    /// Absolute address of the root directory node.
    pub directory_tree_offset: u32,
    /// Size of the root directory node.
    pub directory_tree_size: u32,
    pub file_entries_offset: u32,
    pub file_entries_size: u32,
    /// Build time in microseconds since midnight, January 1st, 0 AD.
    pub timestamp: i64,
    pub version: ImageVersion,
    pub image_size: u32,
    pub checksum: u32,
    pub max_image_size: u32,
}

impl RofsHeader {
    /// Parses the header fields following the 4-byte magic.
    pub fn parse(reader: &mut BoundedReader) -> Result<Self> {
        let header_size = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let window_len = usize::from(header_size)
            .checked_sub(HEADER_PREAMBLE_LEN)
            .ok_or_else(|| {
                Error::FormatMismatch(format!("ROFS header size {header_size} is too small"))
            })?;
        let mut wis = reader.window(window_len)?;

        Ok(Self {
            header_size,
            format_version: wis.read_u16_be()?,
            directory_tree_offset: wis.read_u32_le()?,
            directory_tree_size: wis.read_u32_le()?,
            file_entries_offset: wis.read_u32_le()?,
            file_entries_size: wis.read_u32_le()?,
            timestamp: wis.read_i64_le()?,
            version: ImageVersion {
                major: wis.read_u8()?,
                minor: wis.read_u8()?,
                build: wis.read_u16_be()?,
            },
            image_size: wis.read_u32_be()?,
            checksum: wis.read_u32_be()?,
            max_image_size: wis.read_u32_be()?,
        })
    }

    /// The value subtracted from every on-disk address of this volume.
    pub fn base(&self) -> Result<u32> {
        self.directory_tree_offset
            .checked_sub(REBASE_BIAS)
            .ok_or(Error::AddressUnderflow {
                address: self.directory_tree_offset,
                base: REBASE_BIAS,
            })
    }

    /// The build time as a calendar date, if it is representable.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let epoch = NaiveDate::from_ymd_opt(0, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let time = epoch.checked_add_signed(TimeDelta::microseconds(self.timestamp))?;
        Some(time.and_utc())
    }
}

/// One child of a directory node, either a subdirectory or a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Length of the whole record, including its 2-byte length prefix.
    pub encoded_size: u16,
    pub raw_size: u32,
    /// Absolute address, to be rebased before use.
    pub address: u32,
    pub extended_attributes: u8,
    pub name: String,
}

impl DirectoryEntry {
    /// Decodes one length-prefixed entry record and advances past it.
    pub fn read(reader: &mut BoundedReader) -> Result<Self> {
        let encoded_size = reader.read_u16_le()?;
        let body_len = usize::from(encoded_size).checked_sub(2).ok_or_else(|| {
            Error::FormatMismatch(format!(
                "directory entry length {encoded_size} is shorter than its prefix"
            ))
        })?;
        let mut eis = reader.window(body_len)?;

        eis.skip(ENTRY_RESERVED_LEN)?;
        let raw_size = eis.read_u32_le()?;
        let address = eis.read_u32_le()?;
        let extended_attributes = eis.read_u8()?;
        let name = eis.read_length_prefixed_wide_string()?;

        Ok(Self {
            encoded_size,
            raw_size,
            address,
            extended_attributes,
            name,
        })
    }
}

/// Where a walk is writing to and how its addresses are rebased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseContext {
    output_path: PathBuf,
    base: u32,
}

impl RebaseContext {
    pub fn new(output_path: impl Into<PathBuf>, base: u32) -> Self {
        Self {
            output_path: output_path.into(),
            base,
        }
    }

    /// The context for a subdirectory named `name`.
    pub fn child(&self, name: &str) -> Self {
        Self {
            output_path: self.output_path.join(name),
            base: self.base,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Converts an on-disk address into an offset into the image.
    pub fn rebase(&self, address: u32) -> Result<u32> {
        address.checked_sub(self.base).ok_or(Error::AddressUnderflow {
            address,
            base: self.base,
        })
    }
}

/// Returns `true` if `image` starts with a ROFS signature or with the
/// configured flash header signature.
pub fn has_signature(image: &BoundedReader, options: &ExtractOptions) -> bool {
    match image.window_at(0, 4).and_then(|mut r| r.read_array::<4>()) {
        Ok(magic) => {
            magic == ROFS_MAGIC || magic == ROFX_MAGIC || magic == options.flash_header_magic
        }
        Err(_) => false,
    }
}

/// Unpacks the ROFS image in `image` into `output_dir` with default options.
pub fn extract(image: &BoundedReader, output_dir: &Path) -> Result<ExtractionReport> {
    extract_with(image, output_dir, &ExtractOptions::default())
}

/// Unpacks the ROFS image in `image` into `output_dir`.
///
/// # Arguments
///
/// * `image` - A reader whose region is the whole image. Node addresses are
///   resolved against the start of this region.
/// * `output_dir` - The host directory receiving the root of the tree.
/// * `options` - Decoder tunables.
///
/// # Returns
///
/// A report of what was written. Errors in the header or root directory
/// node, and any host I/O error, are returned as `Err`; failures deeper in
/// the tree are listed in the report instead.
pub fn extract_with(
    image: &BoundedReader,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractionReport> {
    let mut is = image.clone();
    is.seek(0)?;

    let magic = is.read_array::<4>()?;
    if magic == options.flash_header_magic {
        info!(
            offset = is.base_offset(),
            "skipping {COMMON_FLASH_HEADER_SIZE}-byte flash header"
        );
        is.seek(COMMON_FLASH_HEADER_SIZE)?;
        let inner = is.remainder();
        return extract_with(&inner, output_dir, options);
    }
    if magic != ROFS_MAGIC && magic != ROFX_MAGIC {
        return Err(Error::FormatMismatch(format!(
            "expected ROFS signature, found {magic:02x?}"
        )));
    }

    let header = RofsHeader::parse(&mut is)?;
    info!(
        header_size = header.header_size,
        format_version = header.format_version,
        version = %format_args!(
            "{}.{}.{}",
            header.version.major, header.version.minor, header.version.build
        ),
        built = ?header.timestamp_utc(),
        tree = %format_args!(
            "{:#x}/{}",
            header.directory_tree_offset, header.directory_tree_size
        ),
        file_entries = %format_args!(
            "{:#x}/{}",
            header.file_entries_offset, header.file_entries_size
        ),
        "ROFS header"
    );

    let context = RebaseContext::new(output_dir, header.base()?);
    let mut walker = TreeWalker {
        image,
        chain: Vec::new(),
        report: ExtractionReport::new(),
    };
    walker.extract_dir(
        &context,
        header.directory_tree_offset,
        header.directory_tree_size,
    )?;

    Ok(walker.report)
}

struct TreeWalker<'a> {
    image: &'a BoundedReader,
    // (address, size) of every directory node between the root and here.
    chain: Vec<(u32, u32)>,
    report: ExtractionReport,
}

impl TreeWalker<'_> {
    /// Reads the directory node at `address` and, once its fixed fields have
    /// been read, creates its host directory and walks its children.
    fn extract_dir(&mut self, dc: &RebaseContext, address: u32, size: u32) -> Result<()> {
        if self.chain.contains(&(address, size)) {
            return Err(Error::StructuralCycle { address, size });
        }
        let offset = dc.rebase(address)? as usize;
        let path = dc.output_path();

        // The declared size leaves out the node's own 2-byte length field.
        // The stored length wins when the two disagree.
        let size2 = self.image.window_at(offset, 2)?.read_u16_le()?;
        if u32::from(size2) != size {
            self.report.warn(
                path,
                format!("directory node declared as {size} bytes but stores {size2}"),
            );
        }
        let mut br = self.image.window_at(offset + 2, size2.into())?;
        br.skip(1)?;
        let first_entry_offset = br.read_u8()?;
        let file_block_address = br.read_u32_le()?;
        let file_block_size = br.read_u32_le()?;

        if first_entry_offset != EXPECTED_FIRST_ENTRY_OFFSET {
            self.report.warn(
                path,
                format!("unexpected first entry offset {first_entry_offset}"),
            );
        }

        debug!(
            path = %path.display(),
            file_block = %format_args!("{file_block_address:#x}/{file_block_size}"),
            "directory"
        );
        fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
        self.report.record(
            EntryKind::Directory,
            path,
            self.image.base_offset() + offset,
            0,
        );

        self.chain.push((address, size));
        let result = self.walk_node(dc, br, (file_block_address, file_block_size));
        self.chain.pop();
        result
    }

    fn walk_node(
        &mut self,
        dc: &RebaseContext,
        mut br: BoundedReader,
        (file_block_address, file_block_size): (u32, u32),
    ) -> Result<()> {
        let path = dc.output_path();

        while !br.at_end(2) {
            let entry = DirectoryEntry::read(&mut br)?;
            debug!(
                name = %entry.name,
                size = entry.raw_size,
                address = %format_args!("{:#x}", entry.address),
                "subdirectory"
            );

            let dc0 = match host_component(&entry.name) {
                Ok(name) => dc.child(name),
                Err(e) => {
                    self.report.fail(path, e);
                    continue;
                }
            };
            if let Err(e) = self.extract_dir(&dc0, entry.address, entry.raw_size) {
                if e.is_fatal() {
                    return Err(e);
                }
                self.report.fail(dc0.output_path(), e);
            }
        }

        if file_block_address != 0 {
            self.extract_files(dc, file_block_address, file_block_size)?;
        }

        Ok(())
    }

    fn extract_files(&mut self, dc: &RebaseContext, address: u32, size: u32) -> Result<()> {
        let path = dc.output_path();
        let offset = dc.rebase(address)?;
        let mut fbis = self.image.window_at(offset as usize, size as usize + 2)?;

        while !fbis.at_end(2) {
            let entry = DirectoryEntry::read(&mut fbis)?;
            debug!(
                name = %entry.name,
                size = entry.raw_size,
                address = %format_args!("{:#x}", entry.address),
                "file"
            );

            let file_path = match host_component(&entry.name) {
                Ok(name) => path.join(name),
                Err(e) => {
                    self.report.fail(path, e);
                    continue;
                }
            };
            let Ok(real_address) = dc.rebase(entry.address) else {
                self.report.warn(
                    &file_path,
                    format!(
                        "skipped: address {:#x} lies outside the image",
                        entry.address
                    ),
                );
                continue;
            };

            let real_offset = real_address as usize;
            let length = entry.raw_size as usize;
            match self.image.extract_range_to(&file_path, real_offset, length) {
                Ok(()) => self.report.record(
                    EntryKind::File,
                    &file_path,
                    self.image.base_offset() + real_offset,
                    length,
                ),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.report.fail(&file_path, e),
            }
        }

        Ok(())
    }
}
