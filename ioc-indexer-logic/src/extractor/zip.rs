use std::{fs, path::Path};

use zip::{result::ZipError, ZipArchive};

use super::{
    copy_with_budget, sanitize_member_path, ExtractError, ExtractedMember, ExtractionLimits,
};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

pub(super) fn extract(
    archive_path: &Path,
    destination: &Path,
    limits: &ExtractionLimits,
) -> Result<Vec<ExtractedMember>, ExtractError> {
    let file = fs::File::open(archive_path)?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| ExtractError::Corrupt(err.to_string()))?;

    let mut members = Vec::new();
    let mut consumed = 0u64;
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(ZipError::UnsupportedArchive(message)) if message.contains("Password") => {
                return Err(ExtractError::PasswordRequired)
            }
            Err(ZipError::Io(err)) => return Err(ExtractError::Io(err)),
            Err(err) => return Err(ExtractError::Corrupt(err.to_string())),
        };
        if entry.is_dir() {
            continue;
        }
        if entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
        {
            continue;
        }

        let raw_name = entry.name().to_string();
        let (relative_path, disk_path) = sanitize_member_path(&raw_name, destination)?;

        // declared sizes are checked up front, the copy budget below catches
        // archives that lie in their headers
        let declared = entry.size();
        let compressed = entry.compressed_size();
        if declared / compressed.max(1) > limits.max_decompression_ratio {
            return Err(ExtractError::BombRatio {
                path: raw_name,
                limit: limits.max_decompression_ratio,
            });
        }
        if consumed + declared > limits.max_decompressed_bytes {
            return Err(ExtractError::BombCeiling {
                limit_bytes: limits.max_decompressed_bytes,
            });
        }

        if let Some(parent) = disk_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = fs::File::create(&disk_path)?;
        let size_bytes = copy_with_budget(
            &mut entry,
            &mut output,
            &mut consumed,
            limits.max_decompressed_bytes,
        )?;

        members.push(ExtractedMember {
            relative_path,
            disk_path,
            size_bytes,
        });
    }
    Ok(members)
}
