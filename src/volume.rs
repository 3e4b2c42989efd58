// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/volume.rs - Flash volume table walker.
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
 * # `volume` Module
 *
 * Splits a multi-partition flash dump into one raw image per partition.
 *
 * The partition table is a run of 32-byte rows, preceded by zero padding and
 * ended by a sentinel row. A row named like the table-of-contents partition
 * points at another table, whose offsets are relative to that partition.
 */

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::ExtractOptions;
use crate::error::{Error, Result};
use crate::host_component;
use crate::reader::BoundedReader;
use crate::report::{EntryKind, ExtractionReport};
use crate::rofs;

/// Size of one partition table row.
pub const ROW_SIZE: usize = 32;
/// Offset and size value of the row that ends a table.
pub const END_OF_TABLE: u32 = 0xFFFF_FFFF;

const NAME_LEN: usize = 12;

/// One row of a volume table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    /// Start of the partition, relative to the start of the table's region.
    pub offset: u32,
    pub size: u32,
    pub unknown: [u32; 3],
    pub name: String,
}

impl VolumeDescriptor {
    /// Decodes one 32-byte row.
    pub fn read(reader: &mut BoundedReader) -> Result<Self> {
        let mut row = reader.window(ROW_SIZE)?;
        Ok(Self {
            offset: row.read_u32_le()?,
            size: row.read_u32_le()?,
            unknown: [row.read_u32_le()?, row.read_u32_le()?, row.read_u32_le()?],
            name: row.read_padded_string(NAME_LEN)?,
        })
    }

    /// Returns `true` for the row that ends a table.
    pub fn is_sentinel(&self) -> bool {
        self.offset == END_OF_TABLE && self.size == END_OF_TABLE
    }
}

/// Extracts every partition listed in the volume table at the start of
/// `flash` into `output_dir`, with default options.
pub fn extract(flash: &BoundedReader, output_dir: &Path) -> Result<ExtractionReport> {
    extract_with(flash, output_dir, &ExtractOptions::default())
}

/// Extracts every partition listed in the volume table at the start of
/// `flash` into `output_dir`.
///
/// Each partition is written to `<name>.img`, including the
/// table-of-contents partition itself: its image is written first and the
/// table it holds is then walked, so its rows add their own images on top.
/// Rows that cannot be extracted are listed in the report's failures and the
/// scan moves on to the next row; only host I/O errors end the run early.
pub fn extract_with(
    flash: &BoundedReader,
    output_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractionReport> {
    fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;

    let mut walker = TableWalker {
        output_dir,
        options,
        chain: Vec::new(),
        report: ExtractionReport::new(),
    };
    walker.walk_table(flash)?;

    Ok(walker.report)
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

struct TableWalker<'a> {
    output_dir: &'a Path,
    options: &'a ExtractOptions,
    // Store-absolute (start, length) of every region on the current TOC chain.
    chain: Vec<(usize, usize)>,
    report: ExtractionReport,
}

impl TableWalker<'_> {
    fn walk_table(&mut self, region: &BoundedReader) -> Result<()> {
        let key = (region.base_offset(), region.len());
        if self.chain.contains(&key) {
            return Err(Error::StructuralCycle {
                address: saturating_u32(key.0),
                size: saturating_u32(key.1),
            });
        }

        self.chain.push(key);
        let result = self.walk_rows(region);
        self.chain.pop();
        result
    }

    fn walk_rows(&mut self, region: &BoundedReader) -> Result<()> {
        let mut table = region.clone();
        table.seek(0)?;

        loop {
            if table.available() < ROW_SIZE {
                self.report.warn(
                    self.output_dir,
                    format!(
                        "no volume table found in region at {:#x}",
                        region.base_offset()
                    ),
                );
                return Ok(());
            }
            let row = table.window_at(table.position(), ROW_SIZE)?.read_all();
            if row.iter().any(|&b| b != 0) {
                break;
            }
            table.skip(ROW_SIZE)?;
        }
        info!(offset = table.absolute_position(), "volume table");

        loop {
            if table.available() < ROW_SIZE {
                self.report
                    .warn(self.output_dir, "volume table ends without a sentinel row");
                break;
            }
            let descriptor = VolumeDescriptor::read(&mut table)?;
            if descriptor.is_sentinel() {
                break;
            }
            debug!(
                name = %descriptor.name,
                offset = %format_args!("{:#x}", descriptor.offset),
                size = descriptor.size,
                unknown = ?descriptor.unknown,
                "volume"
            );
            if descriptor.offset == END_OF_TABLE {
                continue;
            }

            if let Err(e) = self.extract_partition(region, &descriptor) {
                if e.is_fatal() {
                    return Err(e);
                }
                let path = self.output_dir.join(format!("{}.img", descriptor.name));
                self.report.fail(&path, e);
            }
        }

        Ok(())
    }

    fn extract_partition(
        &mut self,
        region: &BoundedReader,
        descriptor: &VolumeDescriptor,
    ) -> Result<()> {
        let name = host_component(&descriptor.name)?;
        let image_path = self.output_dir.join(format!("{name}.img"));

        let offset = descriptor.offset as usize;
        let mut size = descriptor.size as usize;
        let available = region.len().checked_sub(offset).ok_or(Error::OutOfBounds {
            offset: region.base_offset() + offset,
            requested: size,
            available: 0,
        })?;
        if size > available {
            self.report.warn(
                &image_path,
                format!("partition truncated from {size} to {available} bytes"),
            );
            size = available;
        }

        let partition = region.window_at(offset, size)?;
        partition.extract_range_to(&image_path, 0, size)?;
        self.report.record(
            EntryKind::Partition,
            &image_path,
            partition.base_offset(),
            size,
        );
        info!(path = %image_path.display(), offset = partition.base_offset(), size, "partition");

        if descriptor.name == self.options.toc_partition_name {
            self.walk_table(&partition)?;
        } else if self.options.unpack_filesystems && rofs::has_signature(&partition, self.options) {
            let fs_dir = self.output_dir.join(name);
            match rofs::extract_with(&partition, &fs_dir, self.options) {
                Ok(report) => self.report.merge(report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.report.fail(&fs_dir, e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::rofs::tests::{place, sample_image};

    fn row(offset: u32, size: u32, name: &str) -> Vec<u8> {
        let mut r = Vec::new();
        r.extend(offset.to_le_bytes());
        r.extend(size.to_le_bytes());
        r.extend([0x11u8; 12]);
        let mut n = name.as_bytes().to_vec();
        n.resize(NAME_LEN, 0);
        r.extend(n);
        assert_eq!(r.len(), ROW_SIZE);
        r
    }

    fn sentinel() -> Vec<u8> {
        row(END_OF_TABLE, END_OF_TABLE, "")
    }

    fn img_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".img"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_descriptor_decode() {
        let mut r = BoundedReader::new([row(0x400, 0x80, "CORE"), sentinel()].concat());
        let d = VolumeDescriptor::read(&mut r).unwrap();
        assert_eq!(d.offset, 0x400);
        assert_eq!(d.size, 0x80);
        assert_eq!(d.unknown, [0x11111111; 3]);
        assert_eq!(d.name, "CORE");
        assert!(!d.is_sentinel());
        assert!(VolumeDescriptor::read(&mut r).unwrap().is_sentinel());
        assert!(VolumeDescriptor::read(&mut r).is_err());
    }

    #[test]
    fn test_table_after_padding() {
        let mut flash = vec![0u8; 0x60];
        place(&mut flash, 0x60, &row(0x200, 0x10, "CORE"));
        place(&mut flash, 0x80, &row(0x210, 0x20, "ROFS1"));
        place(&mut flash, 0xA0, &sentinel());
        place(&mut flash, 0x200, &[0xAB; 0x10]);
        place(&mut flash, 0x210, &[0xCD; 0x20]);

        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(flash), tmp.path()).unwrap();

        assert!(report.is_clean(), "{report:?}");
        assert_eq!(img_files(tmp.path()), ["CORE.img", "ROFS1.img"]);
        assert_eq!(fs::read(tmp.path().join("CORE.img")).unwrap(), [0xAB; 0x10]);
        assert_eq!(fs::read(tmp.path().join("ROFS1.img")).unwrap(), [0xCD; 0x20]);
    }

    #[test]
    fn test_chained_toc_table() {
        // Outer table: BOOT, TOC, UDA. The TOC partition at 0x200 holds its
        // own table whose offsets are relative to 0x200.
        let mut toc = vec![0u8; 0x20];
        place(&mut toc, 0x20, &row(0x80, 0x10, "CORE"));
        place(&mut toc, 0x40, &row(0x90, 0x08, "ROFS"));
        place(&mut toc, 0x60, &sentinel());
        place(&mut toc, 0x80, &[0x01; 0x10]);
        place(&mut toc, 0x90, &[0x02; 0x08]);

        let mut flash = Vec::new();
        place(&mut flash, 0, &row(0x100, 0x10, "BOOT"));
        place(&mut flash, 0x20, &row(0x200, toc.len() as u32, "TOC"));
        place(&mut flash, 0x40, &row(0x180, 0x04, "UDA"));
        place(&mut flash, 0x60, &sentinel());
        place(&mut flash, 0x100, &[0xBB; 0x10]);
        place(&mut flash, 0x180, &[0xDD; 0x04]);
        place(&mut flash, 0x200, &toc);

        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(flash), tmp.path()).unwrap();

        assert!(report.is_clean(), "{report:?}");
        assert_eq!(
            img_files(tmp.path()),
            ["BOOT.img", "CORE.img", "ROFS.img", "TOC.img", "UDA.img"]
        );
        assert_eq!(fs::read(tmp.path().join("CORE.img")).unwrap(), [0x01; 0x10]);
        assert_eq!(fs::read(tmp.path().join("ROFS.img")).unwrap(), [0x02; 0x08]);
        assert_eq!(fs::read(tmp.path().join("TOC.img")).unwrap(), toc);

        let core = report
            .files()
            .find(|e| e.path.ends_with("CORE.img"))
            .unwrap();
        assert_eq!(core.offset, 0x280);
    }

    #[test]
    fn test_oversized_partition_is_clamped() {
        let mut flash = Vec::new();
        place(&mut flash, 0, &row(0x40, 0x1000, "USER"));
        place(&mut flash, 0x20, &sentinel());
        place(&mut flash, 0x40, &[0x5A; 0x30]);

        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(flash), tmp.path()).unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("truncated"));
        assert_eq!(fs::read(tmp.path().join("USER.img")).unwrap(), [0x5A; 0x30]);
    }

    #[test]
    fn test_bad_rows_do_not_stop_the_scan() {
        let mut flash = Vec::new();
        place(&mut flash, 0, &row(0x10_0000, 0x10, "GONE"));
        place(&mut flash, 0x20, &row(0xC0, 0x10, "../x"));
        place(&mut flash, 0x40, &row(END_OF_TABLE, 0x10, "EMPTY"));
        place(&mut flash, 0x60, &row(0xC0, 0x10, "KEEP"));
        place(&mut flash, 0x80, &sentinel());
        place(&mut flash, 0xC0, &[0x77; 0x10]);

        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(flash), tmp.path()).unwrap();

        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            report.failures[0].error,
            Error::OutOfBounds { .. }
        ));
        assert!(matches!(
            report.failures[1].error,
            Error::FormatMismatch(_)
        ));
        assert_eq!(img_files(tmp.path()), ["KEEP.img"]);
    }

    #[test]
    fn test_self_referencing_toc_is_a_cycle() {
        let mut flash = Vec::new();
        place(&mut flash, 0, &row(0, 0x60, "TOC"));
        place(&mut flash, 0x20, &row(0x40, 0x20, "DATA"));
        place(&mut flash, 0x40, &sentinel());

        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(flash), tmp.path()).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            Error::StructuralCycle { address: 0, size: 0x60 }
        ));
        assert_eq!(img_files(tmp.path()), ["DATA.img", "TOC.img"]);
    }

    #[test]
    fn test_cycle_offsets_saturate() {
        assert_eq!(saturating_u32(0x60), 0x60);
        assert_eq!(saturating_u32(u32::MAX as usize), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(saturating_u32(0x1_0000_0040), u32::MAX);
    }

    #[test]
    fn test_missing_table_and_sentinel_are_warnings() {
        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(vec![0u8; 0x80]), tmp.path()).unwrap();
        assert!(report.entries.is_empty());
        assert_eq!(report.warnings.len(), 1);

        let flash = [vec![0u8; 0x20], row(0x100, 0x10, "LAST")].concat();
        let report = extract(&BoundedReader::new(flash), tmp.path()).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("sentinel"));
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_rofs_partition_is_unpacked() {
        let rofs_image = sample_image();
        let mut flash = Vec::new();
        place(&mut flash, 0, &row(0x100, rofs_image.len() as u32, "ROFS1"));
        place(&mut flash, 0x20, &sentinel());
        place(&mut flash, 0x100, &rofs_image);

        let tmp = TempDir::new().unwrap();
        let report = extract(&BoundedReader::new(flash.clone()), tmp.path()).unwrap();

        assert!(report.is_clean(), "{report:?}");
        assert_eq!(
            fs::read(tmp.path().join("ROFS1/sys/a.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(report.files().count(), 3);

        let options = ExtractOptions {
            unpack_filesystems: false,
            ..ExtractOptions::default()
        };
        let tmp = TempDir::new().unwrap();
        let report = extract_with(&BoundedReader::new(flash), tmp.path(), &options).unwrap();
        assert_eq!(report.files().count(), 1);
        assert!(!tmp.path().join("ROFS1").exists());
    }
}
