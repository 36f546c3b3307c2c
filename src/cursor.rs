//! Cursor implementation for iterating over query results.

use crate::backend::DocumentStream;
use crate::error::{Result, StoreError};
use bson::Document;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A lazy, forward-only cursor over query results.
///
/// Cursors implement `Stream`; each poll may wait on the server for the next
/// batch. The first error (transport or decode) is yielded once and ends the
/// iteration. Items produced before it stay valid. A cursor cannot be
/// restarted.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut cursor = store.find::<Employee>("hr", "employees", doc! {}, None).await?;
/// while let Some(employee) = cursor.next().await {
///     println!("{:?}", employee?);
/// }
/// ```
pub struct ResultCursor<T> {
    namespace: String,
    stream: Option<DocumentStream>,
    produced: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResultCursor<T> {
    /// Wrap a raw document stream.
    pub fn new(namespace: String, stream: DocumentStream) -> Self {
        Self {
            namespace,
            stream: Some(stream),
            produced: 0,
            _marker: PhantomData,
        }
    }

    /// A cursor over documents already in memory.
    pub fn from_documents(namespace: String, documents: Vec<Document>) -> Self {
        let stream = futures::stream::iter(documents.into_iter().map(Ok::<_, StoreError>));
        Self::new(namespace, stream.boxed())
    }

    /// Create an empty cursor.
    pub fn empty(namespace: String) -> Self {
        Self {
            namespace,
            stream: None,
            produced: 0,
            _marker: PhantomData,
        }
    }

    /// The `db.collection` this cursor reads from.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check if the cursor is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.stream.is_none()
    }

    /// Number of items yielded so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Close the cursor, releasing the server-side state.
    pub fn close(&mut self) {
        self.stream = None;
    }
}

impl<T: DeserializeOwned> ResultCursor<T> {
    /// Try to get the next document.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        self.next().await.transpose()
    }

    /// Collect all remaining documents into a vector.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut results = Vec::new();
        while let Some(doc) = self.try_next().await? {
            results.push(doc);
        }
        Ok(results)
    }
}

impl<T: DeserializeOwned> Stream for ResultCursor<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(None);
        };

        match stream.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.stream = None;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.stream = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Ok(document))) => match bson::from_document(document) {
                Ok(item) => {
                    this.produced += 1;
                    Poll::Ready(Some(Ok(item)))
                }
                Err(e) => {
                    this.stream = None;
                    Poll::Ready(Some(Err(StoreError::decode(format!(
                        "{} document #{}: {}",
                        this.namespace,
                        this.produced + 1,
                        e
                    )))))
                }
            },
        }
    }
}

impl<T> std::fmt::Debug for ResultCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("namespace", &self.namespace)
            .field("exhausted", &self.is_exhausted())
            .field("produced", &self.produced)
            .finish()
    }
}
