// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/reader.rs - Bounded binary cursor over an in-memory flash image.
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
 * # `reader` Module
 *
 * [BoundedReader] is a cursor over a contiguous region of an immutable byte
 * store. Every decoder in this crate reads through one, and hands
 * sub-regions to nested decoders as windows: independent readers that can
 * never see past their own limit and never move their parent's cursor.
 *
 * ## Usage Example
 *
 * ```
 * use flashdump::reader::BoundedReader;
 *
 * fn main() -> Result<(), flashdump::Error> {
 *     let mut reader = BoundedReader::new(vec![0x02, 0x00, 0xAA, 0xBB, 0xCC]);
 *
 *     let length = reader.read_u16_le()?;
 *     let mut body = reader.window(length.into())?;
 *
 *     assert_eq!(body.read_u8()?, 0xAA);
 *     assert_eq!(reader.read_u8()?, 0xCC);
 *     assert!(body.read_u16_le().is_err());
 *
 *     Ok(())
 * }
 * ```
 */

use std::fs::File;
use std::io::BufReader;
use std::io::prelude::*;
use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};

/// A bounds-checked cursor over a region of a shared byte store.
///
/// Offsets passed to and returned from a reader are relative to the start of
/// its own region. Cloning a reader copies its cursor; the clone and the
/// original move independently afterwards.
#[derive(Clone)]
pub struct BoundedReader {
    store: Arc<[u8]>,
    base: usize,
    cursor: usize,
    limit: usize,
}

impl std::fmt::Debug for BoundedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedReader")
            .field("base", &self.base)
            .field("cursor", &self.cursor)
            .field("limit", &self.limit)
            .finish()
    }
}

impl BoundedReader {
    /// Creates a reader spanning all of `data`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let store = data.into();
        let limit = store.len();
        Self {
            store,
            base: 0,
            cursor: 0,
            limit,
        }
    }

    /// Loads the file at `path` into memory and returns a reader spanning it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut reader = BufReader::new(file);

        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .map_err(|e| Error::io(path, e))?;

        trace!(path = %path.display(), size = buffer.len(), "loaded backing store");
        Ok(Self::new(buffer))
    }

    /// The declared size of this reader's region.
    pub fn len(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    /// Current cursor, relative to the start of this reader's region.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Offset into the backing store that this reader's offset 0 maps to.
    pub fn base_offset(&self) -> usize {
        self.base
    }

    /// Current cursor as an offset into the backing store. Only meant for
    /// diagnostics.
    pub fn absolute_position(&self) -> usize {
        self.base + self.cursor
    }

    /// Number of bytes between the cursor and the limit.
    pub fn available(&self) -> usize {
        self.limit - self.cursor
    }

    /// Returns `true` if fewer than `margin` bytes (or none at all, for a
    /// margin of zero) are left before the limit.
    pub fn at_end(&self, margin: usize) -> bool {
        self.cursor.saturating_add(margin) >= self.limit
    }

    fn check(&self, length: usize) -> Result<()> {
        match self.cursor.checked_add(length) {
            Some(end) if end <= self.limit => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset: self.absolute_position(),
                requested: length,
                available: self.available(),
            }),
        }
    }

    fn take(&mut self, length: usize) -> Result<&[u8]> {
        self.check(length)?;
        let start = self.base + self.cursor;
        self.cursor += length;
        Ok(&self.store[start..start + length])
    }

    /// Advances the cursor by `length` bytes.
    pub fn skip(&mut self, length: usize) -> Result<()> {
        self.check(length)?;
        self.cursor += length;
        Ok(())
    }

    /// Moves the cursor to `position`, which may equal the limit.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::OutOfBounds {
                offset: self.base + position,
                requested: 0,
                available: 0,
            });
        }
        self.cursor = position;
        Ok(())
    }

    /// Advances the cursor to the next multiple of `alignment`, measured from
    /// the start of this reader's region.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        if alignment == 0 {
            return Ok(());
        }
        let padding = (alignment - self.cursor % alignment) % alignment;
        self.skip(padding)
    }

    /// Splits the next `length` bytes off into a new reader and advances past
    /// them.
    ///
    /// # Arguments
    ///
    /// * `length` - The size of the window.
    ///
    /// # Returns
    ///
    /// A reader whose offset 0 is this reader's current cursor and whose limit
    /// is `length`, or [Error::OutOfBounds] if fewer than `length` bytes
    /// remain. The returned reader is independent of `self`.
    pub fn window(&mut self, length: usize) -> Result<BoundedReader> {
        self.check(length)?;
        let window = BoundedReader {
            store: Arc::clone(&self.store),
            base: self.base + self.cursor,
            cursor: 0,
            limit: length,
        };
        self.cursor += length;
        Ok(window)
    }

    /// Returns a reader over `[offset, offset + length)` of this reader's
    /// region without touching this reader's cursor.
    pub fn window_at(&self, offset: usize, length: usize) -> Result<BoundedReader> {
        match offset.checked_add(length) {
            Some(end) if end <= self.limit => Ok(BoundedReader {
                store: Arc::clone(&self.store),
                base: self.base + offset,
                cursor: 0,
                limit: length,
            }),
            _ => Err(Error::OutOfBounds {
                offset: self.base.saturating_add(offset),
                requested: length,
                available: self.limit.saturating_sub(offset),
            }),
        }
    }

    /// Splits everything from the cursor to the limit off into a new reader.
    pub fn remainder(&mut self) -> BoundedReader {
        let window = BoundedReader {
            store: Arc::clone(&self.store),
            base: self.base + self.cursor,
            cursor: 0,
            limit: self.available(),
        };
        self.cursor = self.limit;
        window
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_be_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        self.read_array().map(i64::from_le_bytes)
    }

    /// Reads exactly `length` bytes into an owned buffer.
    pub fn read_n(&mut self, length: usize) -> Result<Vec<u8>> {
        Ok(self.take(length)?.to_vec())
    }

    /// Reads everything from the cursor to the limit.
    pub fn read_all(&mut self) -> Vec<u8> {
        let start = self.base + self.cursor;
        let end = self.base + self.limit;
        self.cursor = self.limit;
        self.store[start..end].to_vec()
    }

    /// Reads `length` bytes as an 8-bit string. Each byte becomes the
    /// character with the same code point.
    pub fn read_string(&mut self, length: usize) -> Result<String> {
        Ok(self.take(length)?.iter().map(|&b| char::from(b)).collect())
    }

    /// Reads a one-byte length followed by that many 8-bit characters.
    pub fn read_length_prefixed_string(&mut self) -> Result<String> {
        let start = self.cursor;
        let length = self.read_u8()?;
        self.read_string(length.into()).inspect_err(|_| {
            self.cursor = start;
        })
    }

    /// Reads a fixed-width 8-bit string field and trims trailing NULs.
    pub fn read_padded_string(&mut self, length: usize) -> Result<String> {
        let mut s = self.read_string(length)?;
        let trimmed = s.trim_end_matches('\0').len();
        s.truncate(trimmed);
        Ok(s)
    }

    /// Reads `length` two-byte characters, keeping only the first byte of
    /// each. Names on disk were written this way, so non-Latin-1 characters
    /// are lost exactly as the producing tools lost them.
    pub fn read_wide_string(&mut self, length: usize) -> Result<String> {
        let bytes = self.take(length.checked_mul(2).unwrap_or(usize::MAX))?;
        Ok(bytes.chunks_exact(2).map(|c| char::from(c[0])).collect())
    }

    /// Reads a one-byte character count followed by that many two-byte
    /// characters. See [BoundedReader::read_wide_string].
    pub fn read_length_prefixed_wide_string(&mut self) -> Result<String> {
        let start = self.cursor;
        let length = self.read_u8()?;
        self.read_wide_string(length.into()).inspect_err(|_| {
            self.cursor = start;
        })
    }

    /// Writes everything from the cursor to the limit into a new file at
    /// `path`, replacing any existing file, and moves the cursor to the limit.
    pub fn extract_to(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let position = self.cursor;
        let length = self.available();
        self.extract_range_to(path, position, length)?;
        self.cursor = self.limit;
        Ok(())
    }

    /// Writes `[offset, offset + length)` of this reader's region into a new
    /// file at `path`, replacing any existing file. The cursor is not moved.
    pub fn extract_range_to(
        &self,
        path: impl AsRef<Path>,
        offset: usize,
        length: usize,
    ) -> Result<()> {
        let path = path.as_ref();
        let mut range = self.window_at(offset, length)?;
        let data = range.take(length)?;

        let mut out = File::create(path).map_err(|e| Error::io(path, e))?;
        out.write_all(data).map_err(|e| Error::io(path, e))?;

        trace!(
            path = %path.display(),
            offset = self.base + offset,
            length,
            "extracted byte range"
        );
        Ok(())
    }
}
