//! Point-in-time pagination.
//!
//! A [`PitCursor`] streams every hit of a query from a consistent snapshot:
//! it opens a point-in-time handle, requests fixed-size batches resuming
//! after the previous batch's last sort key, and stops when a batch comes
//! back short. Documents written after the handle was opened are never
//! visited.
//!
//! Advancing is strictly sequential; each batch depends on the last one.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backend::{Backend, Hit};
use crate::error::{Result, StoreError};

pub struct PitCursor {
    backend: Arc<dyn Backend>,
    pit_id: String,
    keep_alive: String,
    body: Value,
    /// Hits still wanted; `None` means all of them.
    remaining: Option<usize>,
    batch_size: usize,
    search_after: Option<Vec<Value>>,
    done: bool,
}

impl PitCursor {
    /// Open a snapshot of `index` for the query in `body`.
    ///
    /// `body` must carry a total sort order; the builder guarantees one by
    /// appending a tie-break for every multi-page query. `limit == 0` means
    /// every matching document.
    pub async fn open(
        backend: Arc<dyn Backend>,
        index: &str,
        body: Value,
        limit: usize,
        batch_size: usize,
        keep_alive: &str,
    ) -> Result<Self> {
        let pit_id = backend.open_point_in_time(index, keep_alive).await?;
        debug!(index, pit_id = %pit_id, "opened point in time");
        Ok(Self {
            backend,
            pit_id,
            keep_alive: keep_alive.to_string(),
            body,
            remaining: (limit > 0).then_some(limit),
            batch_size: batch_size.max(1),
            search_after: None,
            done: false,
        })
    }

    /// Fetch the next batch, or `None` once the snapshot is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Hit>>> {
        if self.done {
            return Ok(None);
        }
        let size = match self.remaining {
            Some(0) => {
                self.finish().await;
                return Ok(None);
            }
            Some(remaining) => remaining.min(self.batch_size),
            None => self.batch_size,
        };

        let mut body = self.body.clone();
        if let Value::Object(map) = &mut body {
            map.insert("size".into(), json!(size));
            map.insert(
                "pit".into(),
                json!({ "id": self.pit_id, "keep_alive": self.keep_alive }),
            );
            match &self.search_after {
                Some(after) => {
                    map.insert("search_after".into(), json!(after));
                }
                None => {
                    map.remove("search_after");
                }
            }
        }

        let response = match self.backend.search(None, &body).await {
            Ok(response) => response,
            Err(e) => {
                self.finish().await;
                return Err(e);
            }
        };
        if let Some(pit_id) = response.pit_id {
            self.pit_id = pit_id;
        }

        let hits = response.hits.hits;
        if let Some(remaining) = &mut self.remaining {
            *remaining = remaining.saturating_sub(hits.len());
        }
        if hits.len() < size || self.remaining == Some(0) {
            self.finish().await;
        } else {
            match hits.last().and_then(|hit| hit.sort.clone()) {
                Some(sort) => self.search_after = Some(sort),
                None => {
                    self.finish().await;
                    return Err(StoreError::Malformed(
                        "paginated hit carries no sort values".to_string(),
                    ));
                }
            }
        }

        debug!(hits = hits.len(), done = self.done, "fetched batch");
        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(hits))
    }

    /// Drain the cursor into a single list.
    pub async fn collect(mut self) -> Result<Vec<Hit>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }

    /// Release the snapshot early. Safe to call after exhaustion.
    pub async fn close(mut self) {
        self.finish().await;
    }

    async fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Err(e) = self.backend.close_point_in_time(&self.pit_id).await {
            warn!(pit_id = %self.pit_id, error = %e, "failed to close point in time");
        }
    }
}
