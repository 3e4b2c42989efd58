// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/report.rs - Extraction results, warnings, and manifests.
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
 * # `report` Module
 *
 * Every walk returns an [ExtractionReport]: what was written to the host,
 * what looked odd but was tolerated, and which subtrees or table rows had to
 * be abandoned.
 */

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Error;

/// The kind of host object an entry produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Partition,
}

impl EntryKind {
    fn name(&self) -> &'static str {
        match self {
            EntryKind::Directory => "directory",
            EntryKind::File => "file",
            EntryKind::Partition => "partition",
        }
    }
}

/// One object written to the host filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    pub kind: EntryKind,
    /// Host path of the written object.
    pub path: PathBuf,
    /// Store-absolute offset the contents were taken from.
    pub offset: usize,
    /// Number of bytes written. Zero for directories.
    pub size: usize,
}

/// A non-fatal irregularity noticed while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Host path the irregularity relates to.
    pub path: PathBuf,
    pub message: String,
}

/// A subtree, file, or table row that was abandoned.
#[derive(Debug)]
pub struct Failure {
    pub path: PathBuf,
    pub error: Error,
}

/// The outcome of one extraction run.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Objects written, in walk order.
    pub entries: Vec<ExtractedEntry>,
    /// Irregularities that did not stop decoding.
    pub warnings: Vec<Warning>,
    /// Parts of the image that could not be extracted.
    pub failures: Vec<Failure>,
}

impl ExtractionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, kind: EntryKind, path: &Path, offset: usize, size: usize) {
        self.entries.push(ExtractedEntry {
            kind,
            path: path.to_path_buf(),
            offset,
            size,
        });
    }

    pub(crate) fn warn(&mut self, path: &Path, message: impl Into<String>) {
        let message = message.into();
        warn!(path = %path.display(), "{message}");
        self.warnings.push(Warning {
            path: path.to_path_buf(),
            message,
        });
    }

    pub(crate) fn fail(&mut self, path: &Path, error: Error) {
        warn!(path = %path.display(), %error, "abandoning entry");
        self.failures.push(Failure {
            path: path.to_path_buf(),
            error,
        });
    }

    /// Appends everything from `other` to this report.
    pub fn merge(&mut self, other: ExtractionReport) {
        self.entries.extend(other.entries);
        self.warnings.extend(other.warnings);
        self.failures.extend(other.failures);
    }

    /// Returns `true` if nothing was tolerated or abandoned.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.failures.is_empty()
    }

    /// Files and partitions written, excluding directories.
    pub fn files(&self) -> impl Iterator<Item = &ExtractedEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind != EntryKind::Directory)
    }

    /// Writes the extracted entries as CSV with a `kind,path,offset,size`
    /// header row.
    ///
    /// # Arguments
    ///
    /// * `writer` - The destination of the CSV text.
    ///
    /// # Returns
    ///
    /// A `Result` indicating whether the manifest was fully written.
    pub fn write_manifest<W: Write>(&self, writer: W) -> Result<(), Box<dyn std::error::Error>> {
        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);

        csv_writer.write_record(["kind", "path", "offset", "size"])?;
        for entry in &self.entries {
            let path = entry.path.to_string_lossy();
            let offset = format!("{:#x}", entry.offset);
            let size = entry.size.to_string();
            csv_writer.write_record([entry.kind.name(), &*path, offset.as_str(), size.as_str()])?;
        }
        csv_writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_clean() {
        let mut report = ExtractionReport::new();
        report.record(EntryKind::Directory, Path::new("out"), 0, 0);
        assert!(report.is_clean());

        let mut nested = ExtractionReport::new();
        nested.record(EntryKind::File, Path::new("out/a.txt"), 0x40, 3);
        nested.warn(Path::new("out"), "size mismatch");
        nested.fail(
            Path::new("out/b"),
            Error::StructuralCycle {
                address: 0x100,
                size: 8,
            },
        );

        report.merge(nested);
        assert!(!report.is_clean());
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.files().count(), 1);
        assert_eq!(report.warnings[0].message, "size mismatch");
        assert_eq!(report.failures[0].path, Path::new("out/b"));
    }

    #[test]
    fn test_manifest_csv() {
        let mut report = ExtractionReport::new();
        report.record(EntryKind::Directory, Path::new("rofs"), 0x30, 0);
        report.record(EntryKind::File, Path::new("rofs/a, b.txt"), 0x1f0, 12);
        report.record(EntryKind::Partition, Path::new("flash/CORE.img"), 0x400, 4096);

        let mut out = Vec::new();
        report.write_manifest(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(String::from)
            .collect();
        assert_eq!(headers, ["kind", "path", "offset", "size"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][1], "rofs/a, b.txt");
        assert_eq!(&rows[2][0], "partition");
        assert_eq!(&rows[2][2], "0x400");
        assert_eq!(&rows[2][3], "4096");
    }
}
