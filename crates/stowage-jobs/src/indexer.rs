//! Plain-text indexer - indexes text files, skips binary content.

use std::path::Path;

use async_trait::async_trait;

use stowage_core::{Error, Extraction, Indexer, Result};

/// Upper bound on the indexed text, in bytes.
pub const MAX_INDEX_BYTES: usize = 1024 * 1024;

/// Indexer for plain text files.
///
/// Content with recognizable magic bytes is treated as binary and yields no
/// text, only its media type. Everything else is read as UTF-8 (with lossy
/// conversion for invalid sequences) and truncated to [`MAX_INDEX_BYTES`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextIndexer;

impl PlainTextIndexer {
    pub fn new() -> Self {
        Self
    }
}

/// Media type of a text file from its extension.
fn text_media_type(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match ext.as_deref() {
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("md") | Some("markdown") => "text/markdown",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("yaml") | Some("yml") => "application/yaml",
        _ => "text/plain",
    }
}

fn truncate_utf8(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[async_trait]
impl Indexer for PlainTextIndexer {
    async fn extract(
        &self,
        filename: &str,
        media_type_hint: Option<&str>,
        path: &Path,
    ) -> Result<Extraction> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::StorageRead(format!("{}: {}", path.display(), e)))?;

        let detected = infer::get(&data);
        let binary = detected
            .as_ref()
            .filter(|k| k.matcher_type() != infer::MatcherType::Text);
        if let Some(kind) = binary {
            return Ok(Extraction {
                media_type: Some(kind.mime_type().to_string()),
                text: String::new(),
            });
        }

        if data.contains(&0) {
            return Ok(Extraction {
                media_type: Some("application/octet-stream".to_string()),
                text: String::new(),
            });
        }

        let mut text = String::from_utf8_lossy(&data).into_owned();
        truncate_utf8(&mut text, MAX_INDEX_BYTES);

        let media_type = media_type_hint
            .or_else(|| detected.as_ref().map(|k| k.mime_type()))
            .unwrap_or_else(|| text_media_type(filename))
            .to_string();

        Ok(Extraction {
            media_type: Some(media_type),
            text,
        })
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn extract(name: &str, data: &[u8]) -> Extraction {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, data).unwrap();
        PlainTextIndexer.extract(name, None, &path).await.unwrap()
    }

    #[tokio::test]
    async fn test_text_extraction() {
        let result = extract("notes.md", b"Hello, world!\nLine two.").await;
        assert_eq!(result.text, "Hello, world!\nLine two.");
        assert_eq!(result.media_type.as_deref(), Some("text/markdown"));
    }

    #[tokio::test]
    async fn test_binary_yields_no_text() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        let result = extract("image.png", &png).await;
        assert!(result.text.is_empty());
        assert_eq!(result.media_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_nul_bytes_are_binary() {
        let result = extract("data.bin", &[1, 2, 0, 3]).await;
        assert!(result.text.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy() {
        let result = extract("latin1.txt", &[b'c', b'a', b'f', 0xE9]).await;
        assert!(result.text.starts_with("caf"));
        assert_eq!(result.media_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = PlainTextIndexer
            .extract("gone.txt", None, &dir.path().join("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageRead(_)));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let mut text = "aé".to_string();
        truncate_utf8(&mut text, 2);
        assert_eq!(text, "a");
    }
}
