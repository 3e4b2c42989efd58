// SPDX-License-Identifier: GPL-3.0-or-later

/*
 *  rofsextract.rs - Unpacking demo for ROFS images and flash dumps.
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

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use flashdump::ExtractOptions;
use flashdump::format::Registry;
use flashdump::reader::BoundedReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The file to read.
    file: Option<PathBuf>,

    /// Directory to unpack into. Defaults to a directory next to the input,
    /// named after the detected format.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a CSV listing of everything extracted to this file.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Skip detection and use the named format.
    #[arg(long)]
    format: Option<String>,

    /// Name of the partition holding a chained volume table.
    #[arg(long, default_value = "TOC")]
    toc_name: String,

    /// Four-character signature of the flash container header.
    #[arg(long, default_value = "FPSX")]
    flash_magic: String,

    /// Only write raw partition images; do not unpack filesystems inside them.
    #[arg(long)]
    no_unpack: bool,

    /// List the known formats and exit.
    #[arg(long)]
    list_formats: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() {
    init_tracing();
    let args = Args::parse();
    let registry = Registry::new();

    if args.list_formats {
        for name in registry.names() {
            println!("{}", name);
        }
        return;
    }

    let Some(file) = args.file else {
        eprintln!("No input file given");
        return;
    };

    let flash_header_magic: [u8; 4] = match args.flash_magic.as_bytes().try_into() {
        Ok(magic) => magic,
        Err(_) => {
            eprintln!(
                "Flash header signature must be 4 bytes long, got {:?}",
                args.flash_magic
            );
            return;
        }
    };
    let options = ExtractOptions {
        flash_header_magic,
        toc_partition_name: args.toc_name,
        unpack_filesystems: !args.no_unpack,
    };

    let input = match BoundedReader::open(&file) {
        Ok(r) => r,
        Err(error) => {
            eprintln!("Error opening file {:?}: {}", &file, error);
            return;
        }
    };

    let handler = match &args.format {
        Some(name) => match registry.get(name) {
            Some(h) => h,
            None => {
                eprintln!("Unknown format {:?}", name);
                return;
            }
        },
        None => match registry.resolve(&input, &file, &options) {
            Ok(h) => h,
            Err(error) => {
                eprintln!("Error detecting format of {:?}: {}", &file, error);
                return;
            }
        },
    };

    let output_dir = args.output.unwrap_or_else(|| {
        file.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(handler.default_output)
    });

    let report = match (handler.extract)(&input, &output_dir, &options) {
        Ok(r) => r,
        Err(error) => {
            eprintln!("Error extracting {:?}: {}", &file, error);
            return;
        }
    };

    for warning in &report.warnings {
        eprintln!("Warning: {}: {}", warning.path.display(), warning.message);
    }
    for failure in &report.failures {
        eprintln!("Skipped {}: {}", failure.path.display(), failure.error);
    }
    println!(
        "Extracted {} files from {} into {}",
        report.files().count(),
        file.display(),
        output_dir.display()
    );

    if let Some(manifest) = args.manifest {
        let result = File::create(&manifest)
            .map_err(Box::<dyn std::error::Error>::from)
            .and_then(|f| report.write_manifest(BufWriter::new(f)));
        if let Err(e) = result {
            eprintln!("Failed to write manifest {}: {}", manifest.display(), e);
        }
    }
}
