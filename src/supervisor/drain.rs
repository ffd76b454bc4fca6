//! Continuous draining of subprocess output.
//!
//! Every spawned process gets one drain task reading stdout and stderr as a
//! single merged line stream until both reach EOF. A full pipe would stall
//! the child, so the drain never stops early, even while the process is
//! being stopped.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;

/// Number of trailing output lines kept for error reports.
const TAIL_LINES: usize = 20;

/// Sees every drained line, in order.
pub trait LineObserver: Send + 'static {
    fn on_line(&mut self, line: &str);
}

/// Runs an action the first time a line containing `marker` appears.
pub struct MarkerHook {
    marker: String,
    action: Option<Box<dyn FnOnce(&str) + Send>>,
}

impl MarkerHook {
    pub fn new(marker: impl Into<String>, action: impl FnOnce(&str) + Send + 'static) -> Self {
        Self {
            marker: marker.into(),
            action: Some(Box::new(action)),
        }
    }

    /// Write `payload` into `stdin` and close it once the marker is seen.
    pub fn feed_stdin(marker: impl Into<String>, stdin: ChildStdin, payload: Vec<u8>) -> Self {
        Self::new(marker, move |_| {
            tokio::spawn(write_and_close(stdin, payload));
        })
    }

    pub fn fired(&self) -> bool {
        self.action.is_none()
    }
}

impl LineObserver for MarkerHook {
    fn on_line(&mut self, line: &str) {
        if self.action.is_some() && line.contains(&self.marker) {
            if let Some(action) = self.action.take() {
                action(line);
            }
        }
    }
}

/// Write a buffered payload to a child's stdin, then close it.
pub async fn write_and_close(mut stdin: ChildStdin, payload: Vec<u8>) {
    if let Err(e) = stdin.write_all(&payload).await {
        tracing::warn!("failed to write stdin payload: {e}");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!("failed to close stdin: {e}");
    }
}

/// Last lines of a process's output.
#[derive(Debug, Clone, Default)]
pub struct OutputTail(Arc<Mutex<VecDeque<String>>>);

impl OutputTail {
    fn push(&self, line: &str) {
        let mut lines = self.0.lock();
        if lines.len() == TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().iter().cloned().collect()
    }
}

/// Spawn the drain task for one process.
pub fn spawn_drain<O, E>(
    label: String,
    stdout: Option<O>,
    stderr: Option<E>,
    mut observer: Option<Box<dyn LineObserver>>,
    tail: OutputTail,
) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out = stdout.map(LineReader::new);
        let mut err = stderr.map(LineReader::new);

        while out.is_some() || err.is_some() {
            let line = tokio::select! {
                line = next_line(&mut out), if out.is_some() => line,
                line = next_line(&mut err), if err.is_some() => line,
            };
            if let Some(line) = line {
                tracing::debug!(session = %label, "{line}");
                tail.push(&line);
                if let Some(observer) = observer.as_mut() {
                    observer.on_line(&line);
                }
            }
        }
        tracing::trace!(session = %label, "output drained");
    })
}

/// Byte-oriented line reader. Transcoders print arbitrary bytes (tags,
/// file names), so lines are decoded lossily instead of rejected.
struct LineReader<R> {
    reader: BufReader<R>,
    /// Bytes of the current line; survives a cancelled read.
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    fn take_line(&mut self) -> String {
        let mut end = self.buf.len();
        if self.buf[..end].ends_with(b"\n") {
            end -= 1;
        }
        if self.buf[..end].ends_with(b"\r") {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        line
    }
}

/// Read one line. The stream is retired on EOF or an I/O error only.
async fn next_line<R>(stream: &mut Option<LineReader<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let lines = stream.as_mut()?;
    match lines.reader.read_until(b'\n', &mut lines.buf).await {
        Ok(0) => {
            let rest = (!lines.buf.is_empty()).then(|| lines.take_line());
            *stream = None;
            rest
        }
        Ok(_) => Some(lines.take_line()),
        Err(e) => {
            tracing::debug!("output stream error: {e}");
            *stream = None;
            None
        }
    }
}
