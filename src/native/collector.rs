use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::oneshot,
};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub truncated: bool,
}

/// Drains a child's stdout and stderr at the same time so neither pipe can
/// fill up and stall the child.
#[derive(Debug)]
pub struct OutputCollector<O, E> {
    stdout: O,
    stderr: E,
    limit: usize,
    grace: Duration,
}

impl<O, E> OutputCollector<O, E>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    pub fn new(stdout: O, stderr: E, limit: usize, grace: Duration) -> Self {
        Self {
            stdout,
            stderr,
            limit,
            grace,
        }
    }

    /// Reads both streams to end-of-stream. Once `exited` resolves, reading
    /// continues for at most the grace period and whatever was captured by
    /// then is returned.
    pub async fn collect(self, exited: oneshot::Receiver<()>) -> CapturedOutput {
        let Self {
            stdout: mut stdout_reader,
            stderr: mut stderr_reader,
            limit,
            grace,
        } = self;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_dropped = false;
        let mut stderr_dropped = false;

        {
            let drain = async {
                tokio::join!(
                    drain_stream(
                        "stdout",
                        &mut stdout_reader,
                        &mut stdout,
                        limit,
                        &mut stdout_dropped
                    ),
                    drain_stream(
                        "stderr",
                        &mut stderr_reader,
                        &mut stderr,
                        limit,
                        &mut stderr_dropped
                    ),
                )
            };
            let cutoff = async {
                let _ = exited.await;
                tokio::time::sleep(grace).await;
            };

            tokio::select! {
                _ = drain => {}
                _ = cutoff => {
                    tracing::warn!(
                        ?grace,
                        "output streams still open after process exit, keeping partial capture"
                    );
                }
            }
        }

        CapturedOutput {
            stdout,
            stderr,
            truncated: stdout_dropped || stderr_dropped,
        }
    }
}

/// Appends up to `limit` bytes of `reader` into `buf`, then keeps reading and
/// discarding so the writer never blocks. `dropped` is raised as soon as a
/// byte is discarded.
async fn drain_stream<R>(
    name: &str,
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
    dropped: &mut bool,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream = name, error = %e, "failed to read child output");
                break;
            }
        };

        let room = limit.saturating_sub(buf.len());
        if n > room {
            *dropped = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}
