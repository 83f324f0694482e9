//! The screening loop: pull jobs, screen them, publish the records.

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info, warn};

use super::job::Dispatch;
use super::screener::Screener;
use super::supervisor::{Connector, Supervisor};

/// A stream of raw job payloads.
pub trait JobSource {
    /// The next payload, or `None` once the source is exhausted.
    fn next_payload(&mut self) -> impl Future<Output = anyhow::Result<Option<Vec<u8>>>>;
}

/// Where screened jobs are published.
pub trait ResultSink {
    fn publish(&mut self, dispatch: &Dispatch) -> impl Future<Output = anyhow::Result<()>>;
}

/// Counters for one worker run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub publish_failures: usize,
    pub reconnects: usize,
}

/// Screens every job from a supervised source.
pub struct Worker<C>
where
    C: Connector,
    C::Connection: JobSource,
{
    screener: Screener,
    supervisor: Supervisor<C>,
}

impl<C> Worker<C>
where
    C: Connector,
    C::Connection: JobSource,
{
    pub fn new(screener: Screener, supervisor: Supervisor<C>) -> Self {
        Self {
            screener,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Supervisor<C> {
        &self.supervisor
    }

    /// Run until the source is exhausted or can no longer be reached.
    ///
    /// Undecodable payloads are skipped. A failing source is reconnected.
    pub async fn run<S: ResultSink>(&mut self, sink: &mut S) -> anyhow::Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        loop {
            let mut source = self
                .supervisor
                .connect()
                .await
                .context("connecting to job source")?;

            loop {
                match source.next_payload().await {
                    Ok(Some(payload)) => {
                        stats.received += 1;
                        let dispatch = match self.screener.screen_payload(&payload) {
                            Ok(dispatch) => dispatch,
                            Err(e) => {
                                stats.skipped += 1;
                                warn!(error = %e, "invalid job payload, skipping");
                                continue;
                            }
                        };
                        if dispatch.is_safe() {
                            stats.accepted += 1;
                        } else {
                            stats.rejected += 1;
                        }
                        if let Err(e) = sink.publish(&dispatch).await {
                            stats.publish_failures += 1;
                            warn!(error = %e, topic = %dispatch.topic, "failed to publish job");
                        } else {
                            debug!(topic = %dispatch.topic, "published job");
                        }
                    }
                    Ok(None) => {
                        info!(
                            received = stats.received,
                            accepted = stats.accepted,
                            rejected = stats.rejected,
                            "job source exhausted"
                        );
                        return Ok(stats);
                    }
                    Err(e) => {
                        warn!(error = %e, "job source failed, reconnecting");
                        self.supervisor.disconnected();
                        stats.reconnects += 1;
                        break;
                    }
                }
            }
        }
    }
}

/// Newline-delimited JSON jobs from any async reader.
pub struct LineSource {
    lines: Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>,
}

impl LineSource {
    pub fn new<R: AsyncRead + Unpin + Send + 'static>(reader: R) -> Self {
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

impl JobSource for LineSource {
    async fn next_payload(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        while let Some(line) = self.lines.next_line().await? {
            if !line.trim().is_empty() {
                return Ok(Some(line.into_bytes()));
            }
        }
        Ok(None)
    }
}

/// Opens a [`LineSource`] over a file, or stdin when no path is given.
#[derive(Debug, Clone, Default)]
pub struct LinesConnector {
    input: Option<PathBuf>,
}

impl LinesConnector {
    pub fn new(input: Option<PathBuf>) -> Self {
        Self { input }
    }
}

impl Connector for LinesConnector {
    type Connection = LineSource;

    async fn connect(&mut self) -> anyhow::Result<LineSource> {
        match &self.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                Ok(LineSource::new(file))
            }
            None => Ok(LineSource::new(tokio::io::stdin())),
        }
    }
}

/// Writes each dispatch as one JSON line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin> ResultSink for JsonLinesSink<W> {
    async fn publish(&mut self, dispatch: &Dispatch) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(dispatch)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl ResultSink for Vec<Dispatch> {
    async fn publish(&mut self, dispatch: &Dispatch) -> anyhow::Result<()> {
        self.push(dispatch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Backoff;

    struct Canned(&'static str);

    impl Connector for Canned {
        type Connection = LineSource;

        async fn connect(&mut self) -> anyhow::Result<LineSource> {
            Ok(LineSource::new(self.0.as_bytes()))
        }
    }

    #[tokio::test]
    async fn test_line_source_skips_blank_lines() {
        let mut source = LineSource::new(&b"\n{\"code\": \"x\"}\n   \n{}\n"[..]);
        assert_eq!(source.next_payload().await.unwrap(), Some(b"{\"code\": \"x\"}".to_vec()));
        assert_eq!(source.next_payload().await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(source.next_payload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_worker_routes_and_skips() {
        let input = concat!(
            "{\"id\": 1, \"code\": \"print(1)\", \"language\": \"python\"}\n",
            "not json\n",
            "{\"id\": 2, \"code\": \"import os\", \"language\": \"python\"}\n",
        );
        let mut worker = Worker::new(
            Screener::default(),
            Supervisor::new(Canned(input), Backoff::default()),
        );
        let mut published: Vec<Dispatch> = Vec::new();
        let stats = worker.run(&mut published).await.unwrap();

        assert_eq!(stats.received, 3);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "programiz_execution");
        assert_eq!(published[1].topic, "blocked_exec");
    }

    #[tokio::test]
    async fn test_json_lines_sink() {
        let dispatch = Screener::default().screen(&crate::pipeline::Job::new("a", "x = 1", "py"));
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&dispatch).await.unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert!(written.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(value["topic"], "programiz_execution");
        assert_eq!(value["payload"]["jobId"], "a");
        assert_eq!(value["payload"]["status"], "safe");
    }
}
