use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use uuid::Uuid;

use crate::hasher::{self, StreamingHasher};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;
const TMP_DIR: &str = "tmp";

/// Result of placing bytes into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub hash: String,
    pub relative_path: String,
    pub size_bytes: u64,
    /// The bytes were already present under this hash; nothing was written.
    pub deduplicated: bool,
}

/// Content-addressed file store with a two-level hash-prefix fan-out:
/// `<root>/<hh>/<hh>/<hash>`. The relative path is a pure function of the
/// hash, so no lookup is needed to locate bytes.
///
/// Writes stream through a temporary file on the same filesystem and are
/// atomically renamed into place; concurrent puts of identical bytes are
/// safe, the loser unlinks its temporary.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub async fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let tmp_dir = root.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir).await?;
        // writes interrupted by a crash or cancellation leave orphans here;
        // they are invisible to readers and safe to unlink at boot
        let mut stale = fs::read_dir(&tmp_dir).await?;
        while let Some(entry) = stale.next_entry().await? {
            tracing::debug!(path = %entry.path().display(), "removing stale temp file");
            let _ = fs::remove_file(entry.path()).await;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative_path(hash: &str) -> String {
        format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash)
    }

    pub fn absolute_path(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    pub async fn exists(&self, hash: &str) -> bool {
        fs::try_exists(self.absolute_path(&Self::relative_path(hash)))
            .await
            .unwrap_or(false)
    }

    /// Consumes the reader to EOF, hashing while writing, then renames the
    /// temporary into its content-addressed location.
    pub async fn put_stream<R: AsyncRead + Unpin>(&self, mut reader: R) -> io::Result<StoredObject> {
        let tmp_path = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        let mut tmp = fs::File::create(&tmp_path).await?;

        let mut hasher = StreamingHasher::new();
        let mut size_bytes = 0u64;
        let mut buffer = vec![0u8; WRITE_BUFFER_SIZE];
        let written = loop {
            let read = match reader.read(&mut buffer).await {
                Ok(read) => read,
                Err(err) => break Err(err),
            };
            if read == 0 {
                break Ok(());
            }
            hasher.update(&buffer[..read]);
            size_bytes += read as u64;
            if let Err(err) = tmp.write_all(&buffer[..read]).await {
                break Err(err);
            }
        };
        if let Err(err) = written {
            drop(tmp);
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        tmp.sync_all().await?;
        drop(tmp);

        let hash = hasher.finalize();
        self.commit(tmp_path, hash, size_bytes).await
    }

    /// Fast path for bytes already on the store's filesystem: hash the file
    /// in place and hardlink it into the layout, falling back to a copy when
    /// linking is not possible.
    pub async fn put_file(&self, path: &Path) -> io::Result<StoredObject> {
        let mut file = fs::File::open(path).await?;
        let hash = hasher::hash_reader(&mut file).await?;
        let size_bytes = file.metadata().await?.len();

        let relative_path = Self::relative_path(&hash);
        let final_path = self.absolute_path(&relative_path);
        if fs::try_exists(&final_path).await? {
            return Ok(StoredObject {
                hash,
                relative_path,
                size_bytes,
                deduplicated: true,
            });
        }
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::hard_link(path, &final_path).await.is_err() {
            let reopened = fs::File::open(path).await?;
            return self.put_stream(reopened).await;
        }
        Ok(StoredObject {
            hash,
            relative_path,
            size_bytes,
            deduplicated: false,
        })
    }

    pub async fn open(&self, relative_path: &str) -> io::Result<fs::File> {
        fs::File::open(self.absolute_path(relative_path)).await
    }

    async fn commit(
        &self,
        tmp_path: PathBuf,
        hash: String,
        size_bytes: u64,
    ) -> io::Result<StoredObject> {
        let relative_path = Self::relative_path(&hash);
        let final_path = self.absolute_path(&relative_path);

        if fs::try_exists(&final_path).await? {
            fs::remove_file(&tmp_path).await?;
            return Ok(StoredObject {
                hash,
                relative_path,
                size_bytes,
                deduplicated: true,
            });
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&tmp_path, &final_path).await?;
        Ok(StoredObject {
            hash,
            relative_path,
            size_bytes,
            deduplicated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;

    async fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("objects")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_open_recovers_bytes() {
        let (_dir, store) = store().await;
        let payload = b"leaked credentials dump".to_vec();

        let stored = store.put_stream(payload.as_slice()).await.unwrap();
        assert_eq!(stored.hash, hash_bytes(&payload));
        assert_eq!(stored.size_bytes, payload.len() as u64);
        assert!(!stored.deduplicated);

        let mut reader = store.open(&stored.relative_path).await.unwrap();
        let mut read_back = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut read_back)
            .await
            .unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn fan_out_layout() {
        let (_dir, store) = store().await;
        let stored = store.put_stream(&b"x"[..]).await.unwrap();
        assert_eq!(
            stored.relative_path,
            format!(
                "{}/{}/{}",
                &stored.hash[0..2],
                &stored.hash[2..4],
                stored.hash
            )
        );
        assert!(store.exists(&stored.hash).await);
    }

    #[tokio::test]
    async fn identical_bytes_stored_once() {
        let (_dir, store) = store().await;
        let first = store.put_stream(&b"same bytes"[..]).await.unwrap();
        let second = store.put_stream(&b"same bytes"[..]).await.unwrap();
        assert_eq!(first.relative_path, second.relative_path);
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
    }

    #[tokio::test]
    async fn zero_length_input() {
        let (_dir, store) = store().await;
        let stored = store.put_stream(&b""[..]).await.unwrap();
        assert_eq!(
            stored.hash,
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
        assert_eq!(stored.size_bytes, 0);
    }

    #[tokio::test]
    async fn put_file_matches_put_stream() {
        let (dir, store) = store().await;
        let source = dir.path().join("incoming.bin");
        tokio::fs::write(&source, b"hardlinkable").await.unwrap();

        let stored = store.put_file(&source).await.unwrap();
        assert_eq!(stored.hash, hash_bytes(b"hardlinkable"));
        assert!(store.exists(&stored.hash).await);
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let (_dir, store) = store().await;
        store.put_stream(&b"a"[..]).await.unwrap();
        store.put_stream(&b"a"[..]).await.unwrap();
        let mut entries = fs::read_dir(store.root().join(TMP_DIR)).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
