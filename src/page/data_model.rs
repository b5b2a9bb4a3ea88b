//! The windowed page cache.

use crate::db::{ConnectionFactory, Record, Transaction};
use crate::error::{DbError, DbResult};
use crate::models::IsolationLevel;
use crate::page::builder::QueryBuilder;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct WindowState<T> {
    /// Offset of the first cached record, `None` before the first refresh.
    window_start: Option<usize>,
    cursor: Option<usize>,
    records: Arc<Vec<T>>,
    total: usize,
}

impl<T> WindowState<T> {
    fn needs_refresh(&self, index: usize, page_size: usize) -> bool {
        match self.window_start {
            Some(start) => index < start || index >= start.saturating_add(page_size),
            None => true,
        }
    }

    /// Position of the cursor inside the cached records, if it is in range.
    fn offset(&self, page_size: usize) -> Option<usize> {
        let cursor = self.cursor?;
        let start = self.window_start?;
        if self.needs_refresh(cursor, page_size) {
            return None;
        }
        let offset = cursor.checked_sub(start)?;
        (offset < self.records.len()).then_some(offset)
    }
}

/// Index-addressable view over a query result that caches one page.
///
/// Moving the cursor outside the cached window refreshes the window starting
/// at the new index. Every method takes the same lock, so a refresh blocks
/// readers until its database round trip completes.
pub struct PageDataModel<T, F, B> {
    factory: F,
    builder: B,
    isolation: IsolationLevel,
    page_size: usize,
    state: Mutex<WindowState<T>>,
}

impl<T, F, B> PageDataModel<T, F, B>
where
    T: Record + Clone,
    F: ConnectionFactory,
    B: QueryBuilder,
{
    /// Create an empty model. `page_size` must be positive.
    pub fn new(factory: F, builder: B, page_size: usize) -> DbResult<Self> {
        if page_size == 0 {
            return Err(DbError::invalid_input("page_size must be greater than 0"));
        }
        Ok(Self {
            factory,
            builder,
            isolation: IsolationLevel::default(),
            page_size,
            state: Mutex::new(WindowState {
                window_start: None,
                cursor: None,
                records: Arc::new(Vec::new()),
                total: 0,
            }),
        })
    }

    /// Isolation level of the transactions opened by refreshes.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Move the cursor, refreshing the window when `index` falls outside it.
    ///
    /// `None` clears the cursor. If the refresh fails the window and cursor
    /// are left as they were.
    pub async fn set_cursor(&self, index: Option<usize>) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let Some(index) = index else {
            state.cursor = None;
            return Ok(());
        };

        if state.needs_refresh(index, self.page_size) {
            self.populate_locked(&mut state, index).await?;
        }
        state.cursor = Some(index);
        Ok(())
    }

    /// Load the window starting at `index`. Does nothing when the window
    /// already starts there.
    pub async fn populate(&self, index: usize) -> DbResult<()> {
        let mut state = self.state.lock().await;
        self.populate_locked(&mut state, index).await
    }

    /// Total row count captured by the last refresh.
    pub async fn row_count(&self) -> usize {
        self.state.lock().await.total
    }

    pub async fn row_index(&self) -> Option<usize> {
        self.state.lock().await.cursor
    }

    /// Offset of the first cached record.
    pub async fn window_start(&self) -> Option<usize> {
        self.state.lock().await.window_start
    }

    /// The record under the cursor, if it is cached.
    pub async fn current_record(&self) -> Option<T> {
        let state = self.state.lock().await;
        let offset = state.offset(self.page_size)?;
        state.records.get(offset).cloned()
    }

    /// Whether the record under the cursor is cached.
    pub async fn is_row_available(&self) -> bool {
        let state = self.state.lock().await;
        state.offset(self.page_size).is_some()
    }

    /// The cached window.
    pub async fn current_page(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.state.lock().await.records)
    }

    /// A fresh iterator over the window cached at call time.
    pub async fn current_page_iter(&self) -> PageIter<T> {
        PageIter::new(self.current_page().await)
    }

    async fn populate_locked(&self, state: &mut WindowState<T>, index: usize) -> DbResult<()> {
        if state.window_start == Some(index) {
            debug!(index, "Window already anchored, skipping refresh");
            return Ok(());
        }

        let transaction = self.factory.new_transaction(false, self.isolation).await?;
        let loaded = self.load_window(&transaction, index).await;
        transaction.close().await;
        let (records, total) = loaded?;

        info!(
            index,
            rows = records.len(),
            total,
            page_size = self.page_size,
            "Window refreshed"
        );
        state.records = records;
        state.total = total;
        state.window_start = Some(index);
        Ok(())
    }

    async fn load_window(
        &self,
        transaction: &Transaction,
        index: usize,
    ) -> DbResult<(Arc<Vec<T>>, usize)> {
        let query = self.builder.build(transaction).await?;
        query
            .set_first_result(index)
            .set_max_results(Some(self.page_size));
        let records = query.result_list::<T>().await?;
        let total = query.result_count().await?;
        Ok((records, total))
    }
}

/// Iterator over a snapshot of the cached window.
#[derive(Debug, Clone)]
pub struct PageIter<T> {
    records: Arc<Vec<T>>,
    next: usize,
}

impl<T> PageIter<T> {
    fn new(records: Arc<Vec<T>>) -> Self {
        Self { records, next: 0 }
    }
}

impl<T: Clone> Iterator for PageIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let record = self.records.get(self.next)?.clone();
        self.next += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.records.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<T: Clone> ExactSizeIterator for PageIter<T> {}
