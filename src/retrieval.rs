//! Retrieval and context budget assembly.
//!
//! [`Retriever::retrieve`] embeds a query, searches the vector index scoped
//! to a project, and returns top-k chunks ordered by similarity score with
//! ties broken by most-recent artifact ingestion time (freshness), then by
//! chunk ID so the order is fully deterministic. Index hits whose chunk or
//! artifact rows are missing (an ingest rolled back between the index and
//! store writes) are skipped, not fatal.
//!
//! [`assemble`] is the budget allocator: greedy admission in descending
//! priority order, skipping any item whose cost would exceed the remaining
//! capacity. Greedy rather than knapsack because the admitted items must
//! stay in priority order for the downstream reasoning step. Items are
//! never partially included, with one exception: if nothing fits at all,
//! the single highest-priority item is truncated to the largest prefix
//! that fits and flagged, so a reasoning step never runs on empty context.

use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::{with_timeout, Capabilities};
use crate::error::{EngineError, Result};
use crate::index::{IndexHit, VectorIndex};
use crate::models::Chunk;
use crate::store::Store;

/// Cost estimate divisor: roughly four characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// One retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// Ingestion time of the owning artifact, used for the freshness
    /// tie-break.
    pub ingested_at: i64,
}

/// One candidate offered to the budget allocator.
#[derive(Debug, Clone)]
pub struct BudgetItem {
    pub id: String,
    pub text: String,
    pub cost: u32,
    pub priority: f64,
}

/// One admitted context item.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub id: String,
    pub text: String,
    pub cost: u32,
    pub truncated: bool,
}

/// The assembled, bounded context for one reasoning step. Ephemeral;
/// recomputed per step and never persisted.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    pub capacity: u32,
    pub consumed: u32,
    pub items: Vec<ContextItem>,
}

impl ContextBudget {
    /// Admitted item texts joined for the generation prompt.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|i| i.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Estimated token cost of a text.
pub fn estimate_cost(text: &str) -> u32 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u32
}

/// Greedy budget packing over `candidates`.
///
/// Candidates are ranked by priority descending; ties keep their input
/// order (stable sort), which makes the admitted set deterministic for
/// identical inputs.
pub fn assemble(capacity: u32, candidates: Vec<BudgetItem>) -> ContextBudget {
    let mut ranked = candidates;
    ranked.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut consumed = 0u32;
    let mut items = Vec::new();
    for candidate in &ranked {
        if candidate.cost <= capacity - consumed {
            consumed += candidate.cost;
            items.push(ContextItem {
                id: candidate.id.clone(),
                text: candidate.text.clone(),
                cost: candidate.cost,
                truncated: false,
            });
        }
    }

    // Overflow policy: nothing fit, so truncate the top candidate to the
    // largest prefix within capacity.
    if items.is_empty() {
        if let Some(top) = ranked.first() {
            let max_chars = capacity as usize * CHARS_PER_TOKEN;
            let text: String = top.text.chars().take(max_chars).collect();
            let cost = estimate_cost(&text);
            consumed = cost;
            items.push(ContextItem {
                id: top.id.clone(),
                text,
                cost,
                truncated: true,
            });
        }
    }

    ContextBudget {
        capacity,
        consumed,
        items,
    }
}

pub struct Retriever {
    store: Arc<dyn Store>,
    index: Arc<dyn VectorIndex>,
    capabilities: Capabilities,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        index: Arc<dyn VectorIndex>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            store,
            index,
            capabilities,
        }
    }

    /// Top-k chunks for a query within a project.
    pub async fn retrieve(
        &self,
        query_text: &str,
        project_id: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let timeout = self.capabilities.timeout_secs;
        let vectors = with_timeout(
            "embed_query",
            timeout,
            self.capabilities.embedder.embed(&[query_text.to_string()]),
        )
        .await?;
        let query = vectors.into_iter().next().unwrap_or_default();

        // The index scans the project partition either way, so rank the
        // full candidate set here and apply the freshness tie-break before
        // the cut to k; a bounded over-fetch could evict fresher chunks
        // when many candidates tie at the cut score.
        let hits = with_timeout(
            "index_search",
            timeout,
            self.index.search(&query, project_id, usize::MAX),
        )
        .await?;

        // Freshness per artifact, with a lookup cache: chunks of the same
        // artifact share one ingestion time.
        let mut freshness: HashMap<String, Option<i64>> = HashMap::new();
        let mut ranked: Vec<(IndexHit, i64)> = Vec::new();
        for hit in hits {
            let ingested_at = match freshness.get(&hit.artifact_id) {
                Some(cached) => *cached,
                None => {
                    let looked_up = match self.store.get_artifact(&hit.artifact_id).await {
                        Ok(artifact) => Some(artifact.ingested_at.unwrap_or(0)),
                        Err(EngineError::NotFound { .. }) => {
                            tracing::debug!(
                                artifact_id = %hit.artifact_id,
                                "index hit for unknown artifact, skipping"
                            );
                            None
                        }
                        Err(err) => return Err(err),
                    };
                    freshness.insert(hit.artifact_id.clone(), looked_up);
                    looked_up
                }
            };
            if let Some(at) = ingested_at {
                ranked.push((hit, at));
            }
        }

        ranked.sort_by(|(a, a_at), (b, b_at)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_at.cmp(a_at))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        ranked.truncate(k);

        let mut results = Vec::with_capacity(ranked.len());
        for (hit, ingested_at) in ranked {
            let chunk = match self.store.get_chunk(&hit.chunk_id).await {
                Ok(chunk) => chunk,
                Err(EngineError::NotFound { .. }) => {
                    tracing::debug!(
                        chunk_id = %hit.chunk_id,
                        "index hit without a stored chunk, skipping"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            results.push(RetrievedChunk {
                chunk,
                score: hit.score,
                ingested_at,
            });
        }
        tracing::debug!(project_id, k, hits = results.len(), "retrieval complete");
        Ok(results)
    }

    /// Retrieve and pack a [`ContextBudget`] for one reasoning step.
    /// Similarity scores become allocator priorities.
    pub async fn assemble_for_query(
        &self,
        query_text: &str,
        project_id: &str,
        k: usize,
        capacity: u32,
    ) -> Result<ContextBudget> {
        let retrieved = self.retrieve(query_text, project_id, k).await?;
        let candidates = retrieved
            .into_iter()
            .map(|r| BudgetItem {
                id: r.chunk.id,
                cost: estimate_cost(&r.chunk.text),
                text: r.chunk.text,
                priority: r.score as f64,
            })
            .collect();
        Ok(assemble(capacity, candidates))
    }
}
