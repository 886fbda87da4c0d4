use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SplitterError {
    #[error("stream splitter is closed")]
    Closed,
    #[error("line callback task panicked")]
    TaskPanicked,
}

/// Line-buffering write sink. Bytes pushed via `feed` are split on `\n` and delivered
/// to the line callback one complete line at a time; `close` flushes whatever partial
/// line remains and waits for the callback task to drain.
pub struct StreamSplitter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl StreamSplitter {
    pub fn new<F>(mut on_line: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let task = tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    on_line(String::from_utf8_lossy(&line[..line.len() - 1]).as_ref());
                }
            }
            if !buf.is_empty() {
                on_line(String::from_utf8_lossy(&buf).as_ref());
            }
        });
        Self {
            tx: Some(tx),
            task: Some(task),
        }
    }

    pub fn feed(&self, chunk: &[u8]) -> Result<(), SplitterError> {
        match &self.tx {
            Some(tx) => tx.send(chunk.to_vec()).map_err(|_| SplitterError::Closed),
            None => Err(SplitterError::Closed),
        }
    }

    /// Idempotent: calling `close` more than once is a no-op after the first call.
    pub async fn close(&mut self) -> Result<(), SplitterError> {
        self.tx.take();
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| SplitterError::TaskPanicked)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn splits_complete_lines_and_flushes_remainder() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collector = lines.clone();
        let mut splitter = StreamSplitter::new(move |line: &str| {
            collector.lock().unwrap().push(line.to_string());
        });

        splitter.feed(b"A\nB\n").unwrap();
        splitter.feed(b"partial").unwrap();
        splitter.close().await.unwrap();

        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["A", "B", "partial"]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_write_after_close_errors() {
        let mut splitter = StreamSplitter::new(|_: &str| {});
        splitter.close().await.unwrap();
        splitter.close().await.unwrap();
        assert!(matches!(splitter.feed(b"x"), Err(SplitterError::Closed)));
    }

    #[tokio::test]
    async fn cancel_after_two_lines_drops_unflushed_partial_line() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collector = lines.clone();
        let mut splitter = StreamSplitter::new(move |line: &str| {
            collector.lock().unwrap().push(line.to_string());
        });

        splitter.feed(b"A\nB\n").unwrap();
        splitter.feed(b"partial-C").unwrap();

        // Cancellation races the producer: close the splitter without ever feeding
        // the newline that would complete "partial-C", then confirm a feed after
        // close is rejected rather than silently accepted.
        splitter.close().await.unwrap();
        assert!(matches!(splitter.feed(b"too-late\n"), Err(SplitterError::Closed)));

        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["A", "B", "partial-C"]);
    }
}
