use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{self, IndexRecordOption, Schema, Value as TantivyValue, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use super::chunker::TextChunker;
use crate::config::RetrievalConfig;
use crate::retrieval::{Passage, VectorStore};

const KIND_SCHEME: &str = "scheme";
const KIND_CONVERSATION: &str = "conversation";

/// Read side of the index. Cheap to clone, so searches can move onto the
/// blocking pool.
#[derive(Clone)]
struct PassageSearcher {
    index: Index,
    reader: IndexReader,
    text_field: schema::Field,
    title_field: schema::Field,
    kind_field: schema::Field,
}

impl PassageSearcher {
    fn kind_query(&self, kind: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(self.kind_field, kind),
            IndexRecordOption::Basic,
        ))
    }

    fn count(&self, kind: &str) -> usize {
        self.reader
            .searcher()
            .search(self.kind_query(kind).as_ref(), &Count)
            .unwrap_or(0)
    }

    /// BM25 search restricted to scheme passages.
    fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        // Free text from users is not valid query syntax; reduce it to bare terms.
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field, self.title_field]);
        let text_query = parser.parse_query(&terms.join(" "))?;
        let scoped = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, self.kind_query(KIND_SCHEME)),
        ]);
        let top_docs = searcher.search(&scoped, &TopDocs::with_limit(k))?;

        let mut passages = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(address)?;
            let text = doc
                .get_first(self.text_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let title = doc
                .get_first(self.title_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            passages.push(Passage { title, text, score });
        }
        Ok(passages)
    }
}

/// In-memory BM25 index over chunked scheme documents. Archived conversation
/// turns share the index under their own kind and never come back from
/// [`VectorStore::search`].
pub struct PassageIndex {
    searcher: PassageSearcher,
    writer: parking_lot::Mutex<IndexWriter>,
    id_field: schema::Field,
    chunker: TextChunker,
}

impl PassageIndex {
    fn build_schema() -> (Schema, [schema::Field; 4]) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        let title_field = sb.add_text_field("title", TEXT | STORED);
        let kind_field = sb.add_text_field("kind", STRING);
        (sb.build(), [id_field, text_field, title_field, kind_field])
    }

    pub fn in_memory(config: &RetrievalConfig) -> Result<Self> {
        let (schema, [id_field, text_field, title_field, kind_field]) = Self::build_schema();
        let index = Index::create_in_ram(schema);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create Tantivy reader")?;

        let writer = index
            .writer_with_num_threads(1, 20_000_000)
            .context("Failed to create Tantivy writer")?;

        Ok(Self {
            searcher: PassageSearcher {
                index,
                reader,
                text_field,
                title_field,
                kind_field,
            },
            writer: parking_lot::Mutex::new(writer),
            id_field,
            chunker: TextChunker::new(config.chunk_size, config.chunk_overlap, config.min_chunk_size),
        })
    }

    /// Chunk, index and commit one scheme document. Returns the number of chunks added.
    pub fn add_document(&self, title: &str, text: &str) -> Result<usize> {
        let chunks = self.add_chunks(KIND_SCHEME, title, text)?;
        tracing::info!(title = %title, chunks = chunks, "Indexed scheme document");
        Ok(chunks)
    }

    /// Store archived conversation text. It is kept apart from the evidence
    /// that retrieval serves.
    pub fn add_conversation(&self, title: &str, text: &str) -> Result<usize> {
        let chunks = self.add_chunks(KIND_CONVERSATION, title, text)?;
        tracing::debug!(title = %title, chunks = chunks, "Archived conversation");
        Ok(chunks)
    }

    fn add_chunks(&self, kind: &str, title: &str, text: &str) -> Result<usize> {
        let doc_id = uuid::Uuid::new_v4();
        let chunks = self.chunker.chunk(text);
        let searcher = &self.searcher;
        let mut writer = self.writer.lock();
        for chunk in &chunks {
            writer.add_document(doc!(
                self.id_field => format!("{}#{}", doc_id, chunk.index),
                searcher.text_field => chunk.text.as_str(),
                searcher.title_field => title,
                searcher.kind_field => kind,
            ))?;
        }
        writer.commit().context("Tantivy commit failed")?;
        searcher.reader.reload()?;
        Ok(chunks.len())
    }

    /// Scheme passages available to retrieval.
    pub fn count(&self) -> usize {
        self.searcher.count(KIND_SCHEME)
    }

    pub fn archived_count(&self) -> usize {
        self.searcher.count(KIND_CONVERSATION)
    }
}

#[async_trait]
impl VectorStore for PassageIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let searcher = self.searcher.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || searcher.search(&query, k))
            .await
            .map_err(|e| anyhow!("Passage search task panicked: {}", e))?
    }

    fn is_ready(&self) -> bool {
        self.count() > 0
    }
}
