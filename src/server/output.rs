//! Line-by-line forwarding of child process output.

use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use futures_lite::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Callback receiving each non-empty output line of a server or installer process.
pub type OutputObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer that forwards every line to the `tracing` log at info level.
pub fn log_observer(source: impl Into<String>) -> OutputObserver {
    let source = source.into();
    Arc::new(move |line: &str| tracing::info!(source = %source, "{}", line))
}

/// Observer that discards everything.
pub fn silent_observer() -> OutputObserver {
    Arc::new(|_: &str| {})
}

/// Spawn a task that reads `reader` until EOF and hands each line to `observer`.
pub(crate) fn forward_lines<R>(reader: R, observer: OutputObserver) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    let line = line.trim_end_matches('\r');
                    if !line.is_empty() {
                        observer(line);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Output stream closed with error");
                    break;
                }
            }
        }
    })
}
