use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use super::types::{ProgressCallback, ProgressEvent};

const CHUNK_SIZE: usize = 64 * 1024;

pin_project! {
    /// Wraps a body stream and reports cumulative bytes after every chunk.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        callback: ProgressCallback,
        loaded: u64,
        total: u64,
    }
}

impl<S> ProgressStream<S> {
    /// `loaded` is the amount already sent by earlier requests of the same batch.
    pub fn new(inner: S, callback: ProgressCallback, loaded: u64, total: u64) -> Self {
        Self {
            inner,
            callback,
            loaded,
            total,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.loaded += chunk.len() as u64;
                    (this.callback)(ProgressEvent { loaded: *this.loaded, total: *this.total });
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Splits an in-memory file into body chunks without copying.
pub fn chunked(data: Bytes) -> impl Stream<Item = std::io::Result<Bytes>> {
    let mut chunks = Vec::with_capacity(data.len() / CHUNK_SIZE + 1);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + CHUNK_SIZE).min(data.len());
        chunks.push(Ok(data.slice(offset..end)));
        offset = end;
    }
    futures_util::stream::iter(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_reports_cumulative_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: ProgressCallback = {
            let seen = seen.clone();
            Arc::new(move |event: ProgressEvent| seen.lock().unwrap().push(event))
        };

        let data = Bytes::from(vec![7u8; CHUNK_SIZE * 2 + 10]);
        let total = 100 + data.len() as u64;
        let stream = ProgressStream::new(chunked(data), callback, 100, total);
        let chunks: Vec<_> = stream.collect().await;

        assert_eq!(chunks.len(), 3);
        let seen = seen.lock().unwrap();
        let loaded: Vec<_> = seen.iter().map(|event| event.loaded).collect();
        assert_eq!(loaded, vec![100 + CHUNK_SIZE as u64, 100 + 2 * CHUNK_SIZE as u64, total]);
        assert_eq!(seen.last().unwrap().percent(), 100);
    }

    #[tokio::test]
    async fn test_empty_file_has_no_chunks() {
        let chunks: Vec<_> = chunked(Bytes::new()).collect().await;
        assert!(chunks.is_empty());
    }
}
