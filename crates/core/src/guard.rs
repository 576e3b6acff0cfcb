//! Streaming forbidden-keyword guard for uploaded SQL.
//!
//! The guard reads the payload in fixed-size chunks so memory stays bounded
//! regardless of file size. Content and keywords are compared ASCII
//! upper-cased. The last `max_keyword_len - 1` bytes of each window are
//! carried into the next one, so a keyword straddling a chunk boundary is
//! still detected.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Default read size for each scanned chunk.
pub const GUARD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Forbidden SQL keyword detected: {0}")]
    Forbidden(String),

    #[error("Failed to read schema content: {0}")]
    Io(#[from] std::io::Error),
}

/// Forbidden-keyword policy.
#[derive(Debug, Clone)]
pub struct ContentGuard {
    enabled: bool,
    keywords: Vec<String>,
    chunk_size: usize,
}

impl ContentGuard {
    /// Build a guard. Keywords are trimmed and upper-cased; blanks are dropped.
    pub fn new<I, S>(enabled: bool, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_ascii_uppercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            enabled,
            keywords,
            chunk_size: GUARD_CHUNK_SIZE,
        }
    }

    /// A guard that accepts everything without reading.
    pub fn disabled() -> Self {
        Self::new(false, Vec::<String>::new())
    }

    /// Override the chunk size (minimum one byte).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Whether validation will actually read anything.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.keywords.is_empty()
    }

    /// Scan a file. An inactive guard does not open it.
    pub async fn validate_file(&self, path: &Path) -> Result<(), GuardError> {
        if !self.is_active() {
            return Ok(());
        }
        let file = tokio::fs::File::open(path).await?;
        self.validate(file).await
    }

    /// Scan a byte stream, stopping at the first forbidden keyword.
    pub async fn validate<R>(&self, mut reader: R) -> Result<(), GuardError>
    where
        R: AsyncRead + Unpin,
    {
        if !self.is_active() {
            return Ok(());
        }

        let overlap = self
            .keywords
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(1)
            .saturating_sub(1);

        let mut buf = vec![0u8; self.chunk_size];
        let mut window: Vec<u8> = Vec::with_capacity(self.chunk_size + overlap);

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            window.extend(buf[..n].iter().map(u8::to_ascii_uppercase));

            if let Some(keyword) = self.first_match(&window) {
                return Err(GuardError::Forbidden(keyword.to_string()));
            }

            let keep = overlap.min(window.len());
            window.drain(..window.len() - keep);
        }
    }

    fn first_match(&self, haystack: &[u8]) -> Option<&str> {
        self.keywords
            .iter()
            .find(|k| contains(haystack, k.as_bytes()))
            .map(String::as_str)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}
