use blake2::{digest::consts::U32, Blake2b, Digest};
use tokio::io::{AsyncRead, AsyncReadExt};

/// BLAKE2b with a 256-bit output, the digest every content hash in the
/// system is derived from.
pub type Blake2b256 = Blake2b<U32>;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental BLAKE2b-256 over a sequence of chunks.
pub struct StreamingHasher {
    inner: Blake2b256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self {
            inner: Blake2b256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Lowercase hex digest, 64 characters.
    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Blake2b256::digest(bytes))
}

pub async fn hash_reader<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut hasher = StreamingHasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}
