//! Per-session passage store queried by term-frequency cosine similarity.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

const MAX_CHUNK_WORDS: usize = 120;
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "with",
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedPassage {
    pub document_id: String,
    pub chunk_index: usize,
    pub score: f64,
    pub text: String,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Adds a document to one session's memory and returns its id. Adding the
    /// same text twice is a no-op that returns the existing id.
    async fn add_document(&self, session_id: &str, text: &str) -> String;

    async fn query(&self, session_id: &str, text: &str, top_k: usize) -> Vec<RankedPassage>;

    async fn clear_session(&self, session_id: &str);
}

#[derive(Clone, Debug)]
struct Chunk {
    text: String,
    terms: HashMap<String, f64>,
    norm: f64,
}

#[derive(Clone, Debug)]
struct StoredDocument {
    id: String,
    chunks: Vec<Chunk>,
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    sessions: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document_count(&self, session_id: &str) -> usize {
        self.sessions.read().await.get(session_id).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn add_document(&self, session_id: &str, text: &str) -> String {
        let id = format!("doc-{}", &format!("{:x}", Sha256::digest(text.trim().as_bytes()))[..16]);
        let mut sessions = self.sessions.write().await;
        let documents = sessions.entry(session_id.to_string()).or_default();
        if !documents.iter().any(|document| document.id == id) {
            let chunks = chunk_text(text)
                .into_iter()
                .map(|chunk| {
                    let terms = term_frequencies(&chunk);
                    let norm = vector_norm(&terms);
                    Chunk { text: chunk, terms, norm }
                })
                .collect();
            documents.push(StoredDocument { id: id.clone(), chunks });
        }
        id
    }

    async fn query(&self, session_id: &str, text: &str, top_k: usize) -> Vec<RankedPassage> {
        let query_terms = term_frequencies(text);
        let query_norm = vector_norm(&query_terms);
        if top_k == 0 || query_norm == 0.0 {
            return Vec::new();
        }

        let sessions = self.sessions.read().await;
        let Some(documents) = sessions.get(session_id) else {
            return Vec::new();
        };

        let mut ranked: Vec<RankedPassage> = documents
            .iter()
            .flat_map(|document| {
                document
                    .chunks
                    .iter()
                    .enumerate()
                    .map(move |(index, chunk)| (document, index, chunk))
            })
            .filter_map(|(document, index, chunk)| {
                if chunk.norm == 0.0 {
                    return None;
                }
                let dot: f64 = query_terms
                    .iter()
                    .filter_map(|(term, weight)| chunk.terms.get(term).map(|other| weight * other))
                    .sum();
                let score = dot / (query_norm * chunk.norm);
                (score > 0.0).then(|| RankedPassage {
                    document_id: document.id.clone(),
                    chunk_index: index,
                    score: (score * 10_000.0).round() / 10_000.0,
                    text: chunk.text.clone(),
                })
            })
            .collect();

        // stable sort keeps insertion order for equal scores
        ranked.sort_by(|left, right| right.score.total_cmp(&left.score));
        ranked.truncate(top_k);
        ranked
    }

    async fn clear_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|paragraph| !paragraph.is_empty()) {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        for window in words.chunks(MAX_CHUNK_WORDS) {
            chunks.push(window.join(" "));
        }
    }
    chunks
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for token in text
        .to_lowercase()
        .split(|character: char| !character.is_alphanumeric() && character != '-')
        .map(|token| token.trim_matches('-'))
        .filter(|token| token.len() > 1 && !STOPWORDS.contains(token))
    {
        *terms.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    terms
}

fn vector_norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|weight| weight * weight).sum::<f64>().sqrt()
}
