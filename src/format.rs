// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  src/format.rs - Selection of a decoder for an input file.
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
 * # `format` Module
 *
 * A [Registry] holds one [FormatHandler] per supported input format. Handlers
 * are tried in registration order, and the first whose `detect` function
 * accepts the input is used.
 */

use std::path::Path;

use tracing::debug;

use crate::ExtractOptions;
use crate::error::{Error, Result};
use crate::reader::BoundedReader;
use crate::report::ExtractionReport;
use crate::{rofs, volume};

pub type DetectFn = fn(&BoundedReader, &Path, &ExtractOptions) -> bool;
pub type ExtractFn = fn(&BoundedReader, &Path, &ExtractOptions) -> Result<ExtractionReport>;

/// A decoder for one input format.
#[derive(Debug, Clone, Copy)]
pub struct FormatHandler {
    /// Short identifier, used to pick the handler by hand.
    pub name: &'static str,
    /// Name of the output directory used when none is given.
    pub default_output: &'static str,
    /// Decides from the input's file name and contents whether this handler
    /// applies.
    pub detect: DetectFn,
    /// Unpacks the input into the given output directory.
    pub extract: ExtractFn,
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(suffix))
}

fn detect_rofs(image: &BoundedReader, path: &Path, options: &ExtractOptions) -> bool {
    has_suffix(path, "rofs") || rofs::has_signature(image, options)
}

fn detect_volume(_flash: &BoundedReader, path: &Path, _options: &ExtractOptions) -> bool {
    has_suffix(path, "img")
}

/// The ordered set of known formats.
#[derive(Debug, Clone)]
pub struct Registry {
    handlers: Vec<FormatHandler>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a registry with the ROFS and flash volume table handlers.
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: Vec::new(),
        };
        registry.register(FormatHandler {
            name: "rofs",
            default_output: "rofs",
            detect: detect_rofs,
            extract: rofs::extract_with,
        });
        registry.register(FormatHandler {
            name: "volume",
            default_output: "flash",
            detect: detect_volume,
            extract: volume::extract_with,
        });
        registry
    }

    /// Adds `handler` after every handler already registered.
    pub fn register(&mut self, handler: FormatHandler) {
        self.handlers.push(handler);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|h| h.name)
    }

    pub fn get(&self, name: &str) -> Option<&FormatHandler> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Returns the first handler that accepts the input.
    ///
    /// # Arguments
    ///
    /// * `input` - A reader over the whole input file.
    /// * `path` - The input's path on the host. Only its name is inspected.
    /// * `options` - Decoder tunables, which may affect signature checks.
    ///
    /// # Returns
    ///
    /// The matching handler, or [Error::FormatMismatch] if none applies.
    pub fn resolve(
        &self,
        input: &BoundedReader,
        path: &Path,
        options: &ExtractOptions,
    ) -> Result<&FormatHandler> {
        for handler in &self.handlers {
            if (handler.detect)(input, path, options) {
                debug!(format = handler.name, path = %path.display(), "format detected");
                return Ok(handler);
            }
        }
        Err(Error::FormatMismatch(format!(
            "no decoder recognizes {}",
            path.display()
        )))
    }
}
