// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/compression.rs - Decompressors for firmware segment payloads.
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
 * # `compression` Module
 *
 * Decompressors for payloads that container dissectors have already located
 * and length-delimited. The container decides which scheme applies and calls
 * [decompress_lzss], [decompress_zlib], or [Compression::decompress].
 *
 * ## Usage Example
 *
 * ```
 * use flashdump::compression::decompress_lzss;
 *
 * // One flag byte marking three literals.
 * let data = decompress_lzss(&[0x07, b'a', b'b', b'c']);
 * assert_eq!(data, b"abc");
 * ```
 */

use std::io::prelude::*;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};

const MIN_MATCH: usize = 3;

/// Compression schemes a segment payload may be stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Stored as-is.
    Stored,
    /// Byte-oriented LZSS with 12-bit distances.
    Lzss,
    /// A zlib stream.
    Zlib,
}

impl Compression {
    /// Decompresses `data` with this scheme.
    ///
    /// # Arguments
    ///
    /// * `data` - The compressed payload.
    /// * `expected_len` - The decompressed size recorded by the container,
    ///   if it records one. Only zlib payloads are checked against it.
    pub fn decompress(self, data: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>> {
        match self {
            Compression::Stored => Ok(data.to_vec()),
            Compression::Lzss => Ok(decompress_lzss(data)),
            Compression::Zlib => decompress_zlib(data, expected_len),
        }
    }
}

/// Inflates an LZSS stream.
///
/// The stream is a sequence of flag bytes, each governing the next eight
/// tokens from its least significant bit up. A set bit is a literal byte; a
/// clear bit is a two-byte back-reference `(x, low)` copying
/// `(x >> 4) + 3` bytes from `((x & 0x0F) << 8) | low` bytes back in the
/// output. References reaching before the start of the output yield zero
/// bytes. Decoding ends when the input runs out, even mid-token.
pub fn decompress_lzss(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut src = input.iter().copied();
    let mut flags: u16 = 0;

    loop {
        flags >>= 1;
        if flags & 0x100 == 0 {
            let Some(c) = src.next() else { break };
            flags = u16::from(c) | 0xFF00;
        }

        if flags & 1 != 0 {
            let Some(c) = src.next() else { break };
            output.push(c);
        } else {
            let Some(x) = src.next() else { break };
            let Some(low) = src.next() else { break };
            let count = usize::from(x >> 4) + MIN_MATCH;
            let distance = (usize::from(x & 0x0F) << 8) | usize::from(low);

            for _ in 0..count {
                let c = if distance != 0 && distance <= output.len() {
                    output[output.len() - distance]
                } else {
                    0
                };
                output.push(c);
            }
        }
    }

    output
}

/// Inflates a zlib stream, optionally checking the decompressed size.
pub fn decompress_zlib(data: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut buffer = Vec::with_capacity(expected_len.unwrap_or(data.len() * 2));
    let s = decoder
        .read_to_end(&mut buffer)
        .map_err(|e| Error::Decompression(e.to_string()))?;
    if let Some(expected) = expected_len {
        if s != expected {
            return Err(Error::Decompression(format!(
                "decompressed size mismatch: expected {expected}, got {s}"
            )));
        }
    }
    Ok(buffer)
}

/// Greedy encoder producing streams [decompress_lzss] accepts.
#[cfg(test)]
pub(crate) fn compress_lzss(data: &[u8]) -> Vec<u8> {
    const MAX_MATCH: usize = 0x0F + MIN_MATCH;
    const MAX_DISTANCE: usize = 0x0FFF;

    let mut out = Vec::new();
    let mut flag_pos = 0;
    let mut bit = 8;
    let mut pos = 0;

    while pos < data.len() {
        if bit == 8 {
            flag_pos = out.len();
            out.push(0u8);
            bit = 0;
        }

        let mut best_len = 0;
        let mut best_distance = 0;
        for distance in 1..=pos.min(MAX_DISTANCE) {
            let mut len = 0;
            while len < MAX_MATCH
                && pos + len < data.len()
                && data[pos + len - distance] == data[pos + len]
            {
                len += 1;
            }
            if len > best_len {
                best_len = len;
                best_distance = distance;
            }
        }

        if best_len >= MIN_MATCH {
            let x = (((best_len - MIN_MATCH) as u8) << 4) | (best_distance >> 8) as u8;
            out.push(x);
            out.push((best_distance & 0xFF) as u8);
            pos += best_len;
        } else {
            out[flag_pos] |= 1 << bit;
            out.push(data[pos]);
            pos += 1;
        }
        bit += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use flate2::Compression as Level;
    use flate2::write::ZlibEncoder;

    #[test]
    fn test_literals_only() {
        let stream = [0xFF, 1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(decompress_lzss(&stream), &stream[1..]);
        assert!(decompress_lzss(&[]).is_empty());
    }

    #[test]
    fn test_back_reference_overlaps_output() {
        // Literal 'a', then copy 5 bytes from distance 1.
        let stream = [0b0000_0001, b'a', 0x20, 0x01];
        assert_eq!(decompress_lzss(&stream), b"aaaaaa");
    }

    #[test]
    fn test_reference_before_output_start_yields_zeros() {
        // First token is a back-reference of 3 bytes at distance 5, nothing
        // decoded yet.
        let stream = [0b0000_0010, 0x00, 0x05, b'z'];
        assert_eq!(decompress_lzss(&stream), vec![0, 0, 0, b'z']);
    }

    #[test]
    fn test_partially_reaching_reference() {
        // "ab" then 4 bytes from distance 3: one zero, then bytes of output.
        let stream = [0b0000_0011, b'a', b'b', 0x10, 0x03];
        assert_eq!(decompress_lzss(&stream), vec![b'a', b'b', 0, b'a', b'b', 0]);
    }

    #[test]
    fn test_truncated_stream_stops_cleanly() {
        // Back-reference missing its second byte.
        assert_eq!(decompress_lzss(&[0b0000_0001, b'q', 0x30]), b"q");
        // Flag byte promising a literal that never arrives.
        assert!(decompress_lzss(&[0xFF]).is_empty());
    }

    #[test]
    fn test_flag_register_refills_after_eight_tokens() {
        let mut stream = vec![0xFF];
        stream.extend(b"01234567");
        stream.push(0x01);
        stream.push(b'8');
        assert_eq!(decompress_lzss(&stream), b"012345678");
    }

    #[test]
    fn test_round_trip_with_reference_encoder() {
        let mut text = Vec::new();
        for i in 0..100u32 {
            text.extend(format!("segment {} of firmware image; ", i % 17).as_bytes());
        }
        text.extend((0..=255u8).cycle().take(2000));
        text.extend(std::iter::repeat_n(0xA5, 300));

        let inputs: [&[u8]; 4] = [&text, b"", b"x", b"xyxyxyxyxyxy"];
        for data in inputs {
            let compressed = compress_lzss(data);
            assert_eq!(decompress_lzss(&compressed), data);
        }
        assert!(compress_lzss(&text).len() < text.len());
    }

    #[test]
    fn test_zlib_round_trip_and_size_check() {
        let data = b"Qt resource payload ".repeat(32);
        let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decompress_zlib(&compressed, Some(data.len())).unwrap(), data);
        assert_eq!(
            Compression::Zlib.decompress(&compressed, None).unwrap(),
            data
        );
        assert!(matches!(
            decompress_zlib(&compressed, Some(data.len() + 1)),
            Err(Error::Decompression(_))
        ));
        assert!(decompress_zlib(b"not zlib", None).is_err());
    }

    #[test]
    fn test_compression_selector() {
        let stream = [0b0000_0001, b'a', 0x20, 0x01];
        assert_eq!(
            Compression::Lzss.decompress(&stream, None).unwrap(),
            b"aaaaaa"
        );
        assert_eq!(
            Compression::Stored.decompress(&stream, None).unwrap(),
            stream
        );
    }
}
