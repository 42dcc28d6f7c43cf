use serde::{Deserialize, Serialize};

/// A source document from the corpus, immutable once ingested.
///
/// Documents are created at index-build time and superseded wholesale by
/// re-indexing; they are never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub path: String,
    pub text: String,
    /// Content checksum, for detecting corpus changes between builds.
    pub checksum: String,
    pub created_at: String,
}

impl SourceDocument {
    /// Derive a stable document id from the source path.
    pub fn generate_id(path: &str) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(path.as_bytes());
        hex::encode(&hash[..16])
    }

    pub fn new(path: impl Into<String>, text: String) -> Self {
        let path = path.into();
        let id = Self::generate_id(&path);
        let checksum = crate::utils::file::calculate_checksum(&text);
        Self {
            id,
            path,
            text,
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A bounded span of source text, the unit of retrieval.
///
/// Chunk boundaries never split inside a word. `start_offset`/`end_offset`
/// are byte offsets into the source text, so consecutive chunks from the
/// same document can reconstruct it exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source: String,
    pub text: String,
    pub sequence_index: u32,
    pub word_count: u32,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl Chunk {
    /// Stable chunk id within an index build: UUIDv5 of document id and
    /// sequence index, so rebuilding the same corpus yields the same ids.
    pub fn generate_id(document_id: &str, sequence_index: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", document_id, sequence_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn from_document(
        document: &SourceDocument,
        text: String,
        sequence_index: u32,
        word_count: u32,
        start_offset: u64,
        end_offset: u64,
    ) -> Self {
        let id = Self::generate_id(&document.id, sequence_index);
        Self {
            id,
            document_id: document.id.clone(),
            source: document.path.clone(),
            text,
            sequence_index,
            word_count,
            start_offset,
            end_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_generate_id() {
        let id = SourceDocument::generate_id("corpus/nahw/lesson-01.txt");
        assert_eq!(id.len(), 32);
        assert_eq!(id, SourceDocument::generate_id("corpus/nahw/lesson-01.txt"));
    }

    #[test]
    fn test_chunk_generate_id_stable() {
        let id = Chunk::generate_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id, Chunk::generate_id("abc123", 5));
        assert_ne!(id, Chunk::generate_id("abc123", 6));
    }

    #[test]
    fn test_document_new() {
        let doc = SourceDocument::new("/corpus/a.txt", "النحو علم".to_string());
        assert!(!doc.id.is_empty());
        assert!(!doc.created_at.is_empty());
        assert_eq!(doc.checksum.len(), 64);
        assert_eq!(doc.path, "/corpus/a.txt");
    }
}
