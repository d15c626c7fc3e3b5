use std::sync::{Arc, Mutex};

use pocketrag::{
    Chunk,
    ChunkDb,
    ChunkStore,
    ConfigDb,
    RagService,
    StoredChunk,
    chunking::chunk_id,
    embedding::{
        Embedder,
        EmbeddingInput,
        EmbeddingService,
        HashingEmbedder,
        InputKind,
    },
    generation::Generator,
    ingestion::IngestOptions,
    rag::{AskOptions, NO_INFORMATION_ANSWER},
    search::SearchMode,
};

const TEXTS: [&str; 3] = [
    "Pumps move water through the cooling loop.",
    "The capacitor needs 1.21 gigawatts to charge.",
    "Bread grows with yeast and warm air.",
];
const PAGES: [u32; 3] = [1, 4, 7];

/// Returns the same vector for every input; closest to the second chunk.
struct QueryEmbedder;

impl Embedder for QueryEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Text
    }

    fn encode(
        &mut self,
        _input: EmbeddingInput<'_>,
    ) -> pocketrag::Result<Vec<f32>> {
        Ok(vec![0.3, 0.9, 0.1])
    }
}

/// Answers with a fixed sentence and records every prompt it receives.
struct RecordingGenerator {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Generator for RecordingGenerator {
    fn generate(&mut self, prompt: &str) -> pocketrag::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("It needs 1.21 gigawatts.".to_string())
    }
}

fn seeded_store(path: &std::path::Path) -> ChunkDb {
    let store = ChunkDb::open(path).unwrap();
    let embeddings = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    let chunks: Vec<StoredChunk> = (0..3)
        .map(|i| {
            StoredChunk::new(
                Chunk {
                    id: chunk_id("doc1", i as u32),
                    document_id: "doc1".to_string(),
                    page_number: PAGES[i],
                    chunk_index: i as u32,
                    text: TEXTS[i].to_string(),
                },
                embeddings[i].to_vec(),
            )
        })
        .collect();
    store.insert_all(&chunks).unwrap();
    store
}

fn options() -> AskOptions {
    AskOptions {
        min_similarity: 0.0,
        ..AskOptions::default()
    }
    .with_top_k(2)
}

#[test]
fn ask_ranks_the_closest_chunk_first() {
    let tmp = tempfile::tempdir().unwrap();
    let store = seeded_store(&tmp.path().join("chunks.redb"));
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let mut rag =
        RagService::new(store, EmbeddingService::new(Box::new(QueryEmbedder)))
            .with_generator(Box::new(RecordingGenerator {
                prompts: Arc::clone(&prompts),
            }));

    let result = rag.ask("what is X?", &options()).unwrap();

    assert_eq!(result.answer, "It needs 1.21 gigawatts.");
    assert!(!result.degraded_embedding);
    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.sources[0].document_id, "doc1");
    assert_eq!(result.sources[0].page_number, 4);
    assert_eq!(result.sources[1].page_number, 1);
    assert!(result.context.starts_with(TEXTS[1]));
    assert!(result.context.contains(TEXTS[0]));
    assert!(!result.context.contains(TEXTS[2]));

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(TEXTS[1]));
    assert!(prompts[0].contains("what is X?"));
}

#[test]
fn chunks_survive_reopening_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("chunks.redb");
    drop(seeded_store(&path));

    let store = ChunkDb::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 3);

    let mut rag =
        RagService::new(store, EmbeddingService::new(Box::new(QueryEmbedder)));
    let retrieval = rag.retrieve("what is X?", &options()).unwrap();
    assert_eq!(retrieval.chunks.len(), 2);
    assert_eq!(retrieval.chunks[0].chunk.chunk.page_number, 4);
}

#[test]
fn filtering_to_an_unknown_document_finds_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let store = seeded_store(&tmp.path().join("chunks.redb"));
    let mut rag =
        RagService::new(store, EmbeddingService::new(Box::new(QueryEmbedder)));

    let result = rag
        .ask(
            "what is X?",
            &options().with_document_ids(vec!["doc2".to_string()]),
        )
        .unwrap();

    assert_eq!(result.answer, NO_INFORMATION_ANSWER);
    assert!(result.sources.is_empty());
}

#[test]
fn ingested_text_file_is_searchable_by_keyword() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
    let store = ChunkDb::open(&tmp.path().join("chunks.redb")).unwrap();
    let mut rag = RagService::new(
        store,
        EmbeddingService::new(Box::new(HashingEmbedder::default())),
    );

    let file = tmp.path().join("garden.txt");
    std::fs::write(
        &file,
        "Tomatoes need full sun.\u{c}Water the basil every morning.",
    )
    .unwrap();

    let options = IngestOptions {
        progress: false,
        ..IngestOptions::default()
    };
    let record = rag.ingest(&file, &registry, &options).unwrap();
    assert_eq!(record.record().page_count, 2);
    assert_eq!(registry.list_documents().unwrap().len(), 1);

    let ask = AskOptions {
        mode: SearchMode::Keyword,
        ..AskOptions::default()
    };
    let retrieval = rag.retrieve("basil", &ask).unwrap();
    assert_eq!(retrieval.chunks.len(), 1);
    assert_eq!(retrieval.chunks[0].chunk.chunk.page_number, 2);
    assert_eq!(retrieval.chunks[0].chunk.chunk.document_id, record.record().id);
}
