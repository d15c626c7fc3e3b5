use std::{collections::BTreeSet, ops::RangeBounds, path::Path};

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};

use crate::{chunking::Chunk, error::Result};

/// Chunk metadata and text as JSON, keyed by chunk id.
const CHUNKS: TableDefinition<&str, &str> = TableDefinition::new("chunks");

/// Raw embedding blobs keyed by chunk id.
const EMBEDDINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("embeddings");

/// A chunk together with the embedding computed for its text.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub chunk: Chunk,
    /// Empty when the stored blob was missing or malformed.
    pub embedding: Vec<f32>,
}

impl StoredChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn text(&self) -> &str {
        &self.chunk.text
    }
}

/// Encode an embedding as a blob of native-endian `f32` values.
///
/// The blob is a plain reinterpretation of the slice, so a database is
/// only portable between machines of the same byte order.
pub fn encode_embedding(embedding: &[f32]) -> &[u8] {
    bytemuck::cast_slice(embedding)
}

/// Decode an embedding blob. Returns `None` when the length is not a whole
/// number of `f32` values.
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % size_of::<f32>() != 0 {
        return None;
    }
    let mut data = vec![0f32; bytes.len() / size_of::<f32>()];
    bytemuck::cast_slice_mut::<f32, u8>(&mut data).copy_from_slice(bytes);
    Some(data)
}

/// Persistence for chunks and their embeddings.
///
/// Stored chunks are immutable; re-ingesting a document replaces its
/// chunks wholesale.
pub trait ChunkStore: Send + Sync {
    /// All chunks, ordered by document id and then chunk index.
    fn get_all(&self) -> Result<Vec<StoredChunk>>;

    /// Chunks belonging to any of `document_ids`, in the same order as
    /// [`ChunkStore::get_all`]. Unknown ids are ignored.
    fn get_by_document_ids(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<StoredChunk>>;

    /// Insert chunks, replacing any with the same id.
    fn insert_all(&self, chunks: &[StoredChunk]) -> Result<()>;

    /// Delete every chunk of a document. Returns how many were removed.
    fn delete_by_document_id(&self, document_id: &str) -> Result<usize>;

    /// Swap a document's chunks for `chunks`. Returns how many old chunks
    /// were removed.
    ///
    /// The default implementation deletes and then inserts. Stores that
    /// can do both atomically should override it.
    fn replace_document(
        &self,
        document_id: &str,
        chunks: &[StoredChunk],
    ) -> Result<usize> {
        let removed = self.delete_by_document_id(document_id)?;
        self.insert_all(chunks)?;
        Ok(removed)
    }

    /// Delete every chunk in the store.
    fn delete_all(&self) -> Result<()>;
}

/// Chunk store backed by a redb database.
///
/// Two tables share the chunk id as key:
/// - `chunks`: JSON-encoded [`Chunk`]
/// - `embeddings`: `dimension * 4` bytes of `f32` values
pub struct ChunkDb {
    db: Database,
}

impl ChunkDb {
    /// Open or create a chunk database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use pocketrag::chunk_db::{ChunkDb, ChunkStore};
    ///
    /// let db = ChunkDb::open(&tmp.path().join("chunks.redb")).unwrap();
    /// assert!(db.get_all().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Number of stored chunks.
    pub fn count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        Ok(table.len()?)
    }

    /// Number of stored chunks per document id.
    pub fn count_by_document(&self) -> Result<Vec<(String, usize)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;

        let mut counts: Vec<(String, usize)> = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            let document_id =
                k.value().rsplit_once('/').map_or(k.value(), |(d, _)| d);
            match counts.last_mut() {
                Some((last, n)) if last == document_id => *n += 1,
                _ => counts.push((document_id.to_string(), 1)),
            }
        }
        Ok(counts)
    }

    fn read_range<'a>(
        chunks: &redb::ReadOnlyTable<&'static str, &'static str>,
        embeddings: &redb::ReadOnlyTable<&'static str, &'static [u8]>,
        range: impl RangeBounds<&'a str> + 'a,
        out: &mut Vec<StoredChunk>,
    ) -> Result<()> {
        for entry in chunks.range(range)? {
            let (k, v) = entry?;
            let chunk: Chunk = serde_json::from_str(v.value())?;

            let embedding = match embeddings.get(k.value())? {
                Some(blob) => {
                    decode_embedding(blob.value()).unwrap_or_else(|| {
                        tracing::warn!(
                            chunk = k.value(),
                            bytes = blob.value().len(),
                            "malformed embedding blob, chunk will not be scored"
                        );
                        Vec::new()
                    })
                }
                None => Vec::new(),
            };

            out.push(StoredChunk { chunk, embedding });
        }
        Ok(())
    }
}

type ChunkTable<'txn> = redb::Table<'txn, &'static str, &'static str>;
type BlobTable<'txn> = redb::Table<'txn, &'static str, &'static [u8]>;

fn write_chunks(
    records: &mut ChunkTable<'_>,
    blobs: &mut BlobTable<'_>,
    chunks: &[StoredChunk],
) -> Result<()> {
    for stored in chunks {
        let record = serde_json::to_string(&stored.chunk)?;
        records.insert(stored.id(), record.as_str())?;

        let bytes = encode_embedding(&stored.embedding);
        let mut guard = blobs.insert_reserve(stored.id(), bytes.len())?;
        guard.as_mut().copy_from_slice(bytes);
    }
    Ok(())
}

fn remove_document_chunks(
    records: &mut ChunkTable<'_>,
    blobs: &mut BlobTable<'_>,
    document_id: &str,
) -> Result<usize> {
    let (start, end) = document_range(document_id);

    let mut keys = Vec::new();
    for entry in records.range(start.as_str()..end.as_str())? {
        let (k, _) = entry?;
        keys.push(k.value().to_string());
    }

    for key in &keys {
        records.remove(key.as_str())?;
        blobs.remove(key.as_str())?;
    }
    Ok(keys.len())
}

/// Key range covering every chunk of `document_id`.
///
/// `'0'` is the character right after `'/'`, so the half-open range
/// `"{id}/".."{id}0"` holds exactly the keys with the `"{id}/"` prefix.
fn document_range(document_id: &str) -> (String, String) {
    (format!("{document_id}/"), format!("{document_id}0"))
}

impl ChunkStore for ChunkDb {
    fn get_all(&self) -> Result<Vec<StoredChunk>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let embeddings = txn.open_table(EMBEDDINGS)?;

        let mut result = Vec::new();
        Self::read_range(&chunks, &embeddings, .., &mut result)?;
        Ok(result)
    }

    fn get_by_document_ids(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<StoredChunk>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let embeddings = txn.open_table(EMBEDDINGS)?;

        let unique: BTreeSet<&str> =
            document_ids.iter().map(String::as_str).collect();

        let mut result = Vec::new();
        for document_id in unique {
            let (start, end) = document_range(document_id);
            Self::read_range(
                &chunks,
                &embeddings,
                start.as_str()..end.as_str(),
                &mut result,
            )?;
        }

        Ok(result)
    }

    fn insert_all(&self, chunks: &[StoredChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        {
            let mut records = txn.open_table(CHUNKS)?;
            let mut blobs = txn.open_table(EMBEDDINGS)?;
            write_chunks(&mut records, &mut blobs, chunks)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_by_document_id(&self, document_id: &str) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut records = txn.open_table(CHUNKS)?;
            let mut blobs = txn.open_table(EMBEDDINGS)?;
            remove_document_chunks(&mut records, &mut blobs, document_id)?
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Deletes and inserts in one write transaction, so a failure leaves
    /// the previous chunks in place.
    fn replace_document(
        &self,
        document_id: &str,
        chunks: &[StoredChunk],
    ) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut records = txn.open_table(CHUNKS)?;
            let mut blobs = txn.open_table(EMBEDDINGS)?;
            let removed =
                remove_document_chunks(&mut records, &mut blobs, document_id)?;
            write_chunks(&mut records, &mut blobs, chunks)?;
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    fn delete_all(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(CHUNKS)?;
        txn.delete_table(EMBEDDINGS)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for ChunkDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk_id;

    fn test_db() -> (tempfile::TempDir, ChunkDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ChunkDb::open(&tmp.path().join("chunks.redb")).unwrap();
        (tmp, db)
    }

    fn stored(doc: &str, index: u32, page: u32, embedding: &[f32]) -> StoredChunk {
        StoredChunk::new(
            Chunk {
                id: chunk_id(doc, index),
                document_id: doc.to_string(),
                page_number: page,
                chunk_index: index,
                text: format!("{doc} chunk {index}"),
            },
            embedding.to_vec(),
        )
    }

    #[test]
    fn insert_and_get_all() {
        let (_tmp, db) = test_db();

        let chunks = vec![
            stored("doc1", 0, 1, &[1.0, 0.0, 0.0]),
            stored("doc1", 1, 2, &[0.0, 1.0, 0.0]),
        ];
        db.insert_all(&chunks).unwrap();

        let all = db.get_all().unwrap();
        assert_eq!(all, chunks);
        assert_eq!(db.count().unwrap(), 2);
    }

    #[test]
    fn get_all_orders_by_document_then_index() {
        let (_tmp, db) = test_db();

        db.insert_all(&[
            stored("b", 1, 1, &[1.0]),
            stored("a", 10, 3, &[1.0]),
            stored("b", 0, 1, &[1.0]),
            stored("a", 2, 1, &[1.0]),
        ])
        .unwrap();

        let ids: Vec<String> =
            db.get_all().unwrap().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["a/000002", "a/000010", "b/000000", "b/000001"]);
    }

    #[test]
    fn get_by_document_ids_filters() {
        let (_tmp, db) = test_db();

        db.insert_all(&[
            stored("doc1", 0, 1, &[1.0]),
            stored("doc10", 0, 1, &[1.0]),
            stored("doc2", 0, 1, &[1.0]),
        ])
        .unwrap();

        let found = db
            .get_by_document_ids(&["doc1".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chunk.document_id, "doc1");

        let both = db
            .get_by_document_ids(&[
                "doc2".to_string(),
                "doc1".to_string(),
                "doc2".to_string(),
            ])
            .unwrap();
        assert_eq!(both.len(), 2);

        assert!(db.get_by_document_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn insert_replaces_existing_ids() {
        let (_tmp, db) = test_db();

        db.insert_all(&[stored("doc", 0, 1, &[1.0, 2.0])]).unwrap();
        let mut updated = stored("doc", 0, 4, &[3.0, 4.0]);
        updated.chunk.text = "replaced".to_string();
        db.insert_all(&[updated.clone()]).unwrap();

        let all = db.get_all().unwrap();
        assert_eq!(all, vec![updated]);
    }

    #[test]
    fn delete_by_document_id_only_touches_that_document() {
        let (_tmp, db) = test_db();

        db.insert_all(&[
            stored("doc1", 0, 1, &[1.0]),
            stored("doc1", 1, 1, &[1.0]),
            stored("doc10", 0, 1, &[1.0]),
        ])
        .unwrap();

        assert_eq!(db.delete_by_document_id("doc1").unwrap(), 2);
        assert_eq!(db.delete_by_document_id("doc1").unwrap(), 0);

        let remaining = db.get_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].chunk.document_id, "doc10");
    }

    #[test]
    fn replace_document_swaps_only_that_document() {
        let (_tmp, db) = test_db();

        db.insert_all(&[
            stored("doc1", 0, 1, &[1.0]),
            stored("doc1", 1, 1, &[1.0]),
            stored("doc1", 2, 2, &[1.0]),
            stored("doc10", 0, 1, &[1.0]),
        ])
        .unwrap();

        let fresh = vec![stored("doc1", 0, 5, &[0.5, 0.5])];
        assert_eq!(db.replace_document("doc1", &fresh).unwrap(), 3);

        let doc1 = db.get_by_document_ids(&["doc1".to_string()]).unwrap();
        assert_eq!(doc1, fresh);
        let doc10 = db.get_by_document_ids(&["doc10".to_string()]).unwrap();
        assert_eq!(doc10.len(), 1);

        assert_eq!(db.replace_document("doc1", &[]).unwrap(), 1);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn embedding_blob_is_little_endian_on_little_endian_hosts() {
        let bytes = encode_embedding(&[1.0, -2.5]);
        let mut expected = 1.0f32.to_le_bytes().to_vec();
        expected.extend_from_slice(&(-2.5f32).to_le_bytes());
        assert_eq!(bytes, expected.as_slice());
        assert_eq!(decode_embedding(bytes), Some(vec![1.0, -2.5]));
    }

    #[test]
    fn delete_all_empties_store() {
        let (_tmp, db) = test_db();

        db.insert_all(&[stored("a", 0, 1, &[1.0]), stored("b", 0, 1, &[1.0])])
            .unwrap();
        db.delete_all().unwrap();

        assert!(db.get_all().unwrap().is_empty());
        assert_eq!(db.count().unwrap(), 0);

        db.insert_all(&[stored("c", 0, 1, &[1.0])]).unwrap();
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn malformed_blob_keeps_chunk_without_embedding() {
        let (_tmp, db) = test_db();

        db.insert_all(&[stored("doc", 0, 1, &[1.0, 2.0])]).unwrap();

        let txn = db.db.begin_write().unwrap();
        {
            let mut blobs = txn.open_table(EMBEDDINGS).unwrap();
            blobs.insert("doc/000000", [1u8, 2, 3, 4, 5, 6].as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let all = db.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].embedding.is_empty());
        assert_eq!(all[0].text(), "doc chunk 0");
    }

    #[test]
    fn count_by_document_groups_keys() {
        let (_tmp, db) = test_db();

        db.insert_all(&[
            stored("a", 0, 1, &[1.0]),
            stored("a", 1, 1, &[1.0]),
            stored("b", 0, 1, &[1.0]),
        ])
        .unwrap();

        assert_eq!(
            db.count_by_document().unwrap(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let data = [0.5f32, -1.25, 3.0];
        let bytes = encode_embedding(&data);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(bytes).unwrap(), data.to_vec());
        assert!(decode_embedding(&bytes[..7]).is_none());
        assert_eq!(decode_embedding(&[]).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunks.redb");

        {
            let db = ChunkDb::open(&path).unwrap();
            db.insert_all(&[stored("doc", 0, 1, &[1.0, 2.0])]).unwrap();
        }

        {
            let db = ChunkDb::open(&path).unwrap();
            let all = db.get_all().unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].embedding, vec![1.0, 2.0]);
        }
    }
}
