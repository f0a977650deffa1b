//! A range scan as a lazy row sequence with read-ahead.
//!
//! The iterator buffers rows from successive get-range calls. Whenever the
//! buffer drops to the watermark and the scan is not exhausted, one
//! background request is issued for the page at the server-returned next
//! start; concurrent triggers coalesce into that single outstanding request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio::sync::Semaphore;

use crate::client::Client;
use crate::request::{GetRangeRequest, RangeQueryCriterion};
use crate::values::{PrimaryKey, Row};
use crate::{Result, TableStoreError};

struct IterState {
    buffered: VecDeque<Row>,
    /// Cursor for the next page; `None` once the server stops paginating.
    next_start: Option<PrimaryKey>,
    error: Option<TableStoreError>,
}

struct Shared {
    state: Mutex<IterState>,
    /// Posted once per completed background request, success or failure.
    arrivals: Semaphore,
    /// Number of in-flight background requests, at most one.
    ongoing: AtomicI64,
}

/// Single-reader streaming cursor over a range scan.
///
/// Freshly constructed, the iterator sits before the first row: the first
/// `move_next` makes the first row current instead of discarding one.
/// `valid` is false only when the scan is exhausted and the buffer is empty;
/// a failed read is surfaced by `move_next` after buffered rows drain.
pub struct RangeIterator {
    client: Client,
    criterion: RangeQueryCriterion,
    watermark: usize,
    first_move: bool,
    shared: Arc<Shared>,
}

impl RangeIterator {
    pub(crate) fn new(client: Client, criterion: RangeQueryCriterion, watermark: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(IterState {
                buffered: VecDeque::new(),
                next_start: Some(criterion.inclusive_start.clone()),
                error: None,
            }),
            arrivals: Semaphore::new(0),
            ongoing: AtomicI64::new(0),
        });
        let iterator = RangeIterator {
            client,
            criterion,
            watermark,
            first_move: true,
            shared,
        };
        iterator.issue();
        iterator
    }

    /// True while a current row is available.
    pub fn valid(&self) -> bool {
        !self.shared.state.lock().expect("iterator lock").buffered.is_empty()
    }

    /// Moves the current row out. The slot keeps a defaulted row until the
    /// next `move_next`; single reader only.
    pub fn get(&mut self) -> Option<Row> {
        let mut state = self.shared.state.lock().expect("iterator lock");
        state.buffered.front_mut().map(std::mem::take)
    }

    /// Advances past the current row (or, on the very first call, onto the
    /// first row), waiting for pages as needed.
    pub async fn move_next(&mut self) -> Result<()> {
        // One advance per call: rows arriving while this call waits must
        // become current, not be discarded.
        let mut advanced = false;
        loop {
            let buffered_len;
            {
                let mut state = self.shared.state.lock().expect("iterator lock");
                if !advanced && !state.buffered.is_empty() {
                    if self.first_move {
                        self.first_move = false;
                    } else {
                        state.buffered.pop_front();
                    }
                    advanced = true;
                }
                buffered_len = state.buffered.len();
                if !state.buffered.is_empty() {
                    if buffered_len <= self.watermark && state.next_start.is_some() {
                        drop(state);
                        self.issue();
                    }
                    return Ok(());
                }
                if let Some(error) = state.error.take() {
                    state.next_start = None;
                    return Err(error);
                }
                if state.next_start.is_none() {
                    return Ok(());
                }
            }
            if buffered_len <= self.watermark {
                self.issue();
            }
            let permit = self
                .shared
                .arrivals
                .acquire()
                .await
                .expect("iterator semaphore closed");
            permit.forget();
        }
    }

    /// Fires one background get-range unless one is already outstanding.
    fn issue(&self) {
        let shared = self.shared.clone();
        if shared.ongoing.fetch_add(1, Ordering::AcqRel) > 0 {
            shared.ongoing.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let start = {
            let state = shared.state.lock().expect("iterator lock");
            match &state.next_start {
                Some(start) => start.clone(),
                None => {
                    shared.ongoing.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            }
        };

        let client = self.client.clone();
        let mut criterion = self.criterion.clone();
        criterion.inclusive_start = start;
        tokio::spawn(async move {
            let request = GetRangeRequest::new(criterion);
            match client.get_range(&request).await {
                Ok(response) => {
                    let mut state = shared.state.lock().expect("iterator lock");
                    state.buffered.extend(response.rows);
                    state.next_start = response.next_start;
                }
                Err(error) => {
                    let mut state = shared.state.lock().expect("iterator lock");
                    state.error = Some(error);
                }
            }
            shared.arrivals.add_permits(1);
            shared.ongoing.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Adapts the cursor into a `Stream` of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> {
        futures_util::stream::try_unfold(self, |mut iterator| async move {
            iterator.move_next().await?;
            if iterator.valid() {
                let row = iterator.get().unwrap_or_default();
                Ok(Some((row, iterator)))
            } else {
                Ok(None)
            }
        })
    }
}
