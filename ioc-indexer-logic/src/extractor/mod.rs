mod rar;
mod zip;

use std::path::{Component, Path, PathBuf};

/// Archive containers the pipeline knows how to unpack. Dispatch is by
/// filename suffix, decided once when the job is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

impl ArchiveFormat {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".rar") {
            Some(Self::Rar)
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("password_required")]
    PasswordRequired,
    #[error("member path escapes the extraction root: {path}")]
    UnsafeMember { path: String },
    #[error("cumulative decompressed size exceeds {limit_bytes} bytes")]
    BombCeiling { limit_bytes: u64 },
    #[error("member {path} exceeds the decompression ratio limit of {limit}")]
    BombRatio { path: String, limit: u64 },
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A regular file streamed out of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMember {
    /// Path of the member inside the archive, normalized.
    pub relative_path: String,
    pub disk_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_decompressed_bytes: u64,
    pub max_decompression_ratio: u64,
}

/// Streams members of ZIP/RAR containers into a caller-owned directory.
///
/// All guards are fatal for the job: traversal outside the root, the
/// cumulative decompressed-bytes ceiling, the per-member compression ratio,
/// and encrypted members. Symlinks and other special members are skipped.
#[derive(Debug, Clone)]
pub struct Extractor {
    limits: ExtractionLimits,
}

impl Extractor {
    pub fn new(limits: ExtractionLimits) -> Self {
        Self { limits }
    }

    pub fn extract(
        &self,
        archive_path: &Path,
        format: ArchiveFormat,
        destination: &Path,
    ) -> Result<Vec<ExtractedMember>, ExtractError> {
        match format {
            ArchiveFormat::Zip => zip::extract(archive_path, destination, &self.limits),
            ArchiveFormat::Rar => rar::extract(archive_path, destination, &self.limits),
        }
    }
}

/// Normalizes a member path and anchors it under `destination`. Absolute
/// paths, drive prefixes and any `..` component are rejected outright.
fn sanitize_member_path(raw: &str, destination: &Path) -> Result<(String, PathBuf), ExtractError> {
    let unsafe_member = || ExtractError::UnsafeMember {
        path: raw.to_string(),
    };
    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_member())
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(unsafe_member());
    }
    let relative = clean.to_string_lossy().into_owned();
    Ok((relative, destination.join(clean)))
}

/// Copies `reader` into `writer` charging every byte against the shared
/// budget; aborts as soon as the ceiling is crossed.
fn copy_with_budget<R: std::io::Read, W: std::io::Write>(
    reader: &mut R,
    writer: &mut W,
    consumed: &mut u64,
    limit_bytes: u64,
) -> Result<u64, ExtractError> {
    let mut buffer = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            return Ok(written);
        }
        *consumed += read as u64;
        if *consumed > limit_bytes {
            return Err(ExtractError::BombCeiling { limit_bytes });
        }
        writer.write_all(&buffer[..read])?;
        written += read as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use ::zip::{write::FileOptions, ZipWriter};

    fn limits() -> ExtractionLimits {
        ExtractionLimits {
            max_decompressed_bytes: 1024 * 1024,
            max_decompression_ratio: 100,
        }
    }

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, content) in members {
            writer
                .start_file(*name, FileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn format_dispatch_by_suffix() {
        assert_eq!(ArchiveFormat::from_filename("dump.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_filename("DUMP.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_filename("leak.Rar"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::from_filename("readme.txt"), None);
        assert_eq!(ArchiveFormat::from_filename("zip"), None);
    }

    #[test]
    fn extracts_regular_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("sample.zip");
        write_zip(
            &archive,
            &[("a.txt", b"alpha".as_slice()), ("nested/b.txt", b"beta")],
        );

        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let members = Extractor::new(limits())
            .extract(&archive, ArchiveFormat::Zip, &out)
            .unwrap();

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].relative_path, "a.txt");
        assert_eq!(std::fs::read(&members[0].disk_path).unwrap(), b"alpha");
        assert_eq!(members[1].relative_path, "nested/b.txt");
        assert!(members[1].disk_path.starts_with(&out));
    }

    #[test]
    fn rejects_traversal_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../../etc/passwd", b"root".as_slice())]);

        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let err = Extractor::new(limits())
            .extract(&archive, ArchiveFormat::Zip, &out)
            .unwrap_err();

        assert!(matches!(err, ExtractError::UnsafeMember { .. }));
        // nothing may land outside the extraction root
        assert!(!dir.path().join("etc/passwd").exists());
    }

    #[test]
    fn aborts_on_cumulative_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bomb.zip");
        // stored members keep a 1:1 ratio so only the ceiling can trip
        let blob = vec![0u8; 512 * 1024];
        let file = std::fs::File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(file);
        let stored = FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
        for name in ["1.bin", "2.bin", "3.bin"] {
            writer.start_file(name, stored).unwrap();
            writer.write_all(&blob).unwrap();
        }
        writer.finish().unwrap();

        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let err = Extractor::new(limits())
            .extract(&archive, ArchiveFormat::Zip, &out)
            .unwrap_err();
        assert!(matches!(err, ExtractError::BombCeiling { .. }));
        // partial output of the aborted member is cleaned by the caller
        // removing the whole extraction directory, never left outside it
        assert!(out.exists());
    }

    #[test]
    fn aborts_on_member_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ratio.zip");
        // a highly compressible member blows past the 100x per-member ratio
        let blob = vec![0u8; 900 * 1024];
        write_zip(&archive, &[("zeros.bin", blob.as_slice())]);

        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let err = Extractor::new(limits())
            .extract(&archive, ArchiveFormat::Zip, &out)
            .unwrap_err();
        assert!(matches!(err, ExtractError::BombRatio { .. }));
    }

    #[test]
    fn skips_symlink_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("links.zip");
        let file = std::fs::File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(file);
        writer
            .add_symlink("link", "/etc/passwd", FileOptions::default())
            .unwrap();
        writer.start_file("real.txt", FileOptions::default()).unwrap();
        writer.write_all(b"data").unwrap();
        writer.finish().unwrap();

        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let members = Extractor::new(limits())
            .extract(&archive, ArchiveFormat::Zip, &out)
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].relative_path, "real.txt");
        assert!(!out.join("link").exists());
    }

    #[test]
    fn sanitize_rejects_absolute_and_empty() {
        let dest = Path::new("/work");
        assert!(sanitize_member_path("/etc/passwd", dest).is_err());
        assert!(sanitize_member_path("", dest).is_err());
        assert!(sanitize_member_path("a/../../b", dest).is_err());
        let (relative, full) = sanitize_member_path("./a/./b.txt", dest).unwrap();
        assert_eq!(relative, "a/b.txt");
        assert_eq!(full, Path::new("/work/a/b.txt"));
    }
}
