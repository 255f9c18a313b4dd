//! Packs a resource directory into a single asset archive.
//!
//! Walks the directory recursively, recognizing `.ttf`, `.wav`, `.png` and
//! `.spv` files; everything else is skipped with a warning. Entry names are
//! the file names without their extension.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use log::*;

use kestrel::assets::archive::{write_archive, AssetType, PendingEntry};

fn gather_entries(directory: &Path, entries: &mut Vec<PendingEntry>) -> Result<()> {
    for dir_entry in fs::read_dir(directory)? {
        let path = dir_entry?.path();

        if path.is_dir() {
            gather_entries(&path, entries)?;
            continue;
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let asset_type = AssetType::from_extension(extension);
        if asset_type == AssetType::Invalid {
            warn!("Skipping '{}': unrecognized extension.", path.display());
            continue;
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Non-UTF-8 file name: '{}'.", path.display()))?
            .to_string();

        let data = fs::read(&path)?;
        if data.is_empty() {
            warn!("Skipping '{}': empty file.", path.display());
            continue;
        }

        info!("Adding asset entry '{}' ({:?}).", name, asset_type);
        entries.push(PendingEntry {
            name,
            asset_type,
            data,
        });
    }

    Ok(())
}

fn run(resource_dir: &Path, output_path: &Path) -> Result<()> {
    let mut entries = Vec::new();
    gather_entries(resource_dir, &mut entries)?;

    let file = File::create(output_path)?;
    let mut writer = BufWriter::new(file);
    write_archive(&mut writer, &entries)?;

    info!(
        "Wrote {} entries to '{}'.",
        entries.len(),
        output_path.display()
    );

    Ok(())
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let args = std::env::args().collect::<Vec<_>>();
    if args.len() != 3 {
        eprintln!("Usage: jfd-packer <resource_dir> <output_file>");
        return ExitCode::FAILURE;
    }

    match run(Path::new(&args[1]), Path::new(&args[2])) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("Packing failed: {}", error);
            ExitCode::FAILURE
        }
    }
}
