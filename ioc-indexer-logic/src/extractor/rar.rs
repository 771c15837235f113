use std::{fs, path::Path};

use unrar::{error::Code, Archive};

use super::{sanitize_member_path, ExtractError, ExtractedMember, ExtractionLimits};

pub(super) fn extract(
    archive_path: &Path,
    destination: &Path,
    limits: &ExtractionLimits,
) -> Result<Vec<ExtractedMember>, ExtractError> {
    // RAR headers carry no per-member packed size, so the ratio guard is
    // checked against the whole container's compressed size instead.
    let compressed_total = fs::metadata(archive_path)?.len().max(1);

    let mut archive = Archive::new(archive_path)
        .open_for_processing()
        .map_err(map_unrar)?;

    let mut members = Vec::new();
    let mut consumed = 0u64;
    while let Some(header) = archive.read_header().map_err(map_unrar)? {
        let entry = header.entry();
        let is_file = entry.is_file();
        let raw_name = entry.filename.to_string_lossy().into_owned();
        let size_bytes = entry.unpacked_size as u64;

        archive = if is_file {
            let (relative_path, disk_path) = sanitize_member_path(&raw_name, destination)?;

            consumed += size_bytes;
            if consumed > limits.max_decompressed_bytes {
                return Err(ExtractError::BombCeiling {
                    limit_bytes: limits.max_decompressed_bytes,
                });
            }
            if consumed / compressed_total > limits.max_decompression_ratio {
                return Err(ExtractError::BombRatio {
                    path: raw_name,
                    limit: limits.max_decompression_ratio,
                });
            }

            if let Some(parent) = disk_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let next = header.extract_to(&disk_path).map_err(map_unrar)?;
            members.push(ExtractedMember {
                relative_path,
                disk_path,
                size_bytes,
            });
            next
        } else {
            header.skip().map_err(map_unrar)?
        };
    }
    Ok(members)
}

fn map_unrar(err: unrar::error::UnrarError) -> ExtractError {
    match err.code {
        Code::MissingPassword => ExtractError::PasswordRequired,
        _ => ExtractError::Corrupt(err.to_string()),
    }
}
