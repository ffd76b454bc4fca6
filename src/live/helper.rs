//! The WebRTC negotiation helper.
//!
//! The helper is an external process that terminates WebRTC and re-emits
//! the media as RTP. Requests and answers travel as one JSON line each over
//! its stdin/stdout. Its stderr is only watched for the line announcing that
//! the RTP descriptor of a session has been written:
//!
//! ```text
//! [55_abc] descriptor ready: /tmp/55_abc.sdp
//! ```
//!
//! A single actor task owns the process. It starts the helper on first use,
//! runs exchanges one at a time and restarts the helper after failures, up
//! to a limit after which negotiations fail fast for a cooldown period.
//!
//! Readiness is reported once per negotiation: a session is armed when its
//! offer is sent and disarmed by the first readiness line, a failed
//! negotiation or a release. Releasing a session also asks the helper to
//! drop the peer (`stopStreamByID`).

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::HelperConfig;
use crate::error::{Result, StreamError};
use crate::supervisor::{spawn_drain, LineObserver, OutputTail};

/// How long negotiations fail fast after too many consecutive restarts.
const RESTART_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub session_id: String,
    pub sdp: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    pub sdp: String,
}

/// Turns an SDP offer into an answer.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn negotiate(&self, offer: OfferRequest) -> Result<AnswerResponse>;

    /// Forget a session: tear down its peer and stop waiting for its
    /// readiness.
    async fn release(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Frame telling the helper to drop the peer of a stream.
#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "streamId")]
    stream_id: &'a str,
}

impl<'a> StopRequest<'a> {
    fn new(stream_id: &'a str) -> Self {
        Self {
            kind: "stopStreamByID",
            stream_id,
        }
    }
}

/// A session's RTP descriptor has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub session_id: String,
    pub descriptor_path: PathBuf,
}

/// Parse `[<session>] <marker> <path>`.
pub fn parse_readiness(line: &str, marker: &str) -> Option<Readiness> {
    let (_, after_marker) = line.split_once(marker)?;
    let start = line.find('[')?;
    let end = start + line[start..].find(']')?;
    let session_id = line[start + 1..end].trim();
    let path = after_marker.trim();
    if session_id.is_empty() || path.is_empty() {
        return None;
    }
    Some(Readiness {
        session_id: session_id.to_string(),
        descriptor_path: PathBuf::from(path),
    })
}

/// Sessions with a negotiation whose readiness has not been reported yet.
#[derive(Debug, Clone, Default)]
pub struct ArmedSessions(Arc<Mutex<HashSet<String>>>);

impl ArmedSessions {
    pub fn arm(&self, session_id: &str) {
        self.0.lock().insert(session_id.to_string());
    }

    /// Returns whether the session was armed.
    pub fn disarm(&self, session_id: &str) -> bool {
        self.0.lock().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Emits one [`Readiness`] per armed negotiation.
pub struct ReadinessObserver {
    marker: String,
    armed: ArmedSessions,
    tx: mpsc::UnboundedSender<Readiness>,
}

impl ReadinessObserver {
    pub fn new(marker: impl Into<String>, armed: ArmedSessions, tx: mpsc::UnboundedSender<Readiness>) -> Self {
        Self {
            marker: marker.into(),
            armed,
            tx,
        }
    }
}

impl LineObserver for ReadinessObserver {
    fn on_line(&mut self, line: &str) {
        let Some(ready) = parse_readiness(line, &self.marker) else {
            return;
        };
        if !self.armed.disarm(&ready.session_id) {
            tracing::trace!(session = %ready.session_id, "readiness without pending negotiation ignored");
            return;
        }
        tracing::info!(session = %ready.session_id, descriptor = ?ready.descriptor_path, "helper descriptor ready");
        if self.tx.send(ready).is_err() {
            tracing::warn!("readiness receiver dropped");
        }
    }
}

enum Exchange {
    Negotiate {
        request: OfferRequest,
        reply: oneshot::Sender<Result<AnswerResponse>>,
    },
    Release {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to the helper actor.
#[derive(Clone)]
pub struct HelperProcess {
    tx: mpsc::Sender<Exchange>,
    armed: ArmedSessions,
}

impl HelperProcess {
    /// Spawn the actor. The helper itself starts on the first negotiation.
    pub fn spawn(
        config: HelperConfig,
        readiness: mpsc::UnboundedSender<Readiness>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let armed = ArmedSessions::default();
        let actor = HelperActor {
            config,
            readiness,
            armed: armed.clone(),
            running: None,
            failures: 0,
            cooldown_until: None,
        };
        tokio::spawn(actor.run(rx, shutdown));
        Self { tx, armed }
    }

    /// Sessions still waiting for their readiness line.
    pub fn armed(&self) -> &ArmedSessions {
        &self.armed
    }

    async fn call<T>(&self, exchange: Exchange, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.tx
            .send(exchange)
            .await
            .map_err(|_| StreamError::HelperUnavailable("helper task stopped".into()))?;
        rx.await
            .map_err(|_| StreamError::HelperUnavailable("helper task dropped the request".into()))?
    }
}

#[async_trait]
impl Negotiator for HelperProcess {
    async fn negotiate(&self, offer: OfferRequest) -> Result<AnswerResponse> {
        let (reply, rx) = oneshot::channel();
        self.call(Exchange::Negotiate { request: offer, reply }, rx).await
    }

    async fn release(&self, session_id: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let session_id = session_id.to_string();
        self.call(Exchange::Release { session_id, reply }, rx).await
    }
}

struct RunningHelper {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

struct HelperActor {
    config: HelperConfig,
    readiness: mpsc::UnboundedSender<Readiness>,
    armed: ArmedSessions,
    running: Option<RunningHelper>,
    failures: u32,
    cooldown_until: Option<Instant>,
}

impl HelperActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Exchange>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                exchange = rx.recv() => match exchange {
                    Some(Exchange::Negotiate { request, reply }) => {
                        let result = self.exchange(request).await;
                        let _ = reply.send(result);
                    }
                    Some(Exchange::Release { session_id, reply }) => {
                        let result = self.release(&session_id).await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    async fn exchange(&mut self, request: OfferRequest) -> Result<AnswerResponse> {
        self.ensure_running()?;
        let session = request.session_id.clone();
        let timeout = self.config.negotiate_timeout();
        // Armed before the request is written; the helper may report
        // readiness before it answers.
        self.armed.arm(&session);

        let outcome = match self.running.as_mut() {
            Some(helper) => {
                match tokio::time::timeout(timeout, round_trip(helper, &request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(StreamError::HelperUnavailable(format!(
                        "no answer for '{session}' within {}s",
                        timeout.as_secs()
                    ))),
                }
            }
            None => Err(StreamError::HelperUnavailable("helper not running".into())),
        };

        if outcome.is_err() {
            self.armed.disarm(&session);
        }
        match &outcome {
            Ok(_) => self.failures = 0,
            Err(StreamError::MalformedMessage(e)) => {
                tracing::warn!(session = %session, "malformed helper answer: {e}");
            }
            Err(e) => {
                tracing::error!(session = %session, "negotiation failed, restarting helper: {e}");
                self.failures += 1;
                self.kill().await;
            }
        }
        outcome
    }

    /// Disarm the session and ask a running helper to drop its peer. A
    /// helper that is not running has nothing to drop.
    async fn release(&mut self, session_id: &str) -> Result<()> {
        self.armed.disarm(session_id);
        let Some(helper) = self.running.as_mut() else {
            return Ok(());
        };

        let mut line = serde_json::to_string(&StopRequest::new(session_id))
            .map_err(|e| StreamError::malformed(e.to_string()))?;
        line.push('\n');
        let written = async {
            helper.stdin.write_all(line.as_bytes()).await?;
            helper.stdin.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                tracing::info!(session = %session_id, "helper peer released");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session = %session_id, "failed to release helper peer, restarting helper: {e}");
                self.failures += 1;
                self.kill().await;
                Err(e.into())
            }
        }
    }

    fn ensure_running(&mut self) -> Result<()> {
        if let Some(helper) = self.running.as_mut() {
            match helper.child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    tracing::warn!(status = %status, "helper exited");
                    self.failures += 1;
                }
                Err(e) => {
                    tracing::warn!("helper status unavailable: {e}");
                    self.failures += 1;
                }
            }
            self.running = None;
        }

        if self.failures >= self.config.max_restarts {
            let now = Instant::now();
            let until = *self.cooldown_until.get_or_insert(now + RESTART_COOLDOWN);
            if now < until {
                return Err(StreamError::HelperUnavailable(format!(
                    "helper failed {} times, retrying in {}s",
                    self.failures,
                    (until - now).as_secs()
                )));
            }
            self.failures = 0;
            self.cooldown_until = None;
        }

        match self.start() {
            Ok(helper) => {
                self.running = Some(helper);
                Ok(())
            }
            Err(e) => {
                self.failures += 1;
                tracing::error!(program = ?self.config.program, "failed to start helper: {e}");
                Err(StreamError::HelperUnavailable(format!(
                    "failed to start {}: {e}",
                    self.config.program.display()
                )))
            }
        }
    }

    fn start(&self) -> std::io::Result<RunningHelper> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing = |name: &str| std::io::Error::other(format!("helper {name} not captured"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let observer = ReadinessObserver::new(
            self.config.ready_marker.clone(),
            self.armed.clone(),
            self.readiness.clone(),
        );
        spawn_drain::<ChildStdout, _>(
            "helper".to_string(),
            None,
            child.stderr.take(),
            Some(Box::new(observer)),
            OutputTail::default(),
        );

        tracing::info!(program = ?self.config.program, pid = ?child.id(), "helper started");
        Ok(RunningHelper {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn kill(&mut self) {
        if let Some(mut helper) = self.running.take() {
            if let Err(e) = helper.child.kill().await {
                tracing::debug!("failed to kill helper: {e}");
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.running.is_some() {
            tracing::info!("stopping helper");
        }
        self.kill().await;
    }
}

/// Send one request and wait for the answer that matches it.
async fn round_trip(helper: &mut RunningHelper, request: &OfferRequest) -> Result<AnswerResponse> {
    let mut line = serde_json::to_string(request).map_err(|e| StreamError::malformed(e.to_string()))?;
    line.push('\n');
    helper.stdin.write_all(line.as_bytes()).await?;
    helper.stdin.flush().await?;

    loop {
        let Some(line) = helper.stdout.next_line().await? else {
            return Err(StreamError::HelperUnavailable("helper closed its output".into()));
        };
        if line.trim().is_empty() {
            continue;
        }
        let answer: AnswerResponse =
            serde_json::from_str(&line).map_err(|e| StreamError::malformed(format!("{e}: {line}")))?;
        match answer.session_id.as_deref() {
            Some(id) if id != request.session_id => {
                tracing::warn!(expected = %request.session_id, got = %id, "skipping answer for another session");
            }
            _ => return Ok(answer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "descriptor ready:";

    #[test]
    fn readiness_lines() {
        let ready = parse_readiness("[55_abc] descriptor ready: /tmp/55_abc.sdp", MARKER).unwrap();
        assert_eq!(ready.session_id, "55_abc");
        assert_eq!(ready.descriptor_path, PathBuf::from("/tmp/55_abc.sdp"));

        assert!(parse_readiness("[55_abc] negotiating", MARKER).is_none());
        assert!(parse_readiness("descriptor ready: /tmp/x.sdp", MARKER).is_none());
        assert!(parse_readiness("[55_abc] descriptor ready:", MARKER).is_none());
    }

    #[test]
    fn observer_fires_once_per_negotiation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let armed = ArmedSessions::default();
        let mut observer = ReadinessObserver::new(MARKER, armed.clone(), tx);

        armed.arm("a_1");
        observer.on_line("[a_1] descriptor ready: /tmp/a.sdp");
        observer.on_line("[a_1] descriptor ready: /tmp/a.sdp");
        // Nothing was negotiated for b_2.
        observer.on_line("[b_2] descriptor ready: /tmp/b.sdp");
        assert_eq!(rx.try_recv().unwrap().session_id, "a_1");
        assert!(rx.try_recv().is_err());
        assert!(armed.is_empty());

        // A new negotiation for the same session reports again.
        armed.arm("a_1");
        observer.on_line("[a_1] descriptor ready: /tmp/a2.sdp");
        assert_eq!(
            rx.try_recv().unwrap().descriptor_path,
            PathBuf::from("/tmp/a2.sdp")
        );
    }

    #[test]
    fn stop_request_shape() {
        assert_eq!(
            serde_json::to_string(&StopRequest::new("55_abc")).unwrap(),
            r#"{"type":"stopStreamByID","streamId":"55_abc"}"#
        );
    }

    #[test]
    fn offer_request_is_camel_case() {
        let json = serde_json::to_string(&OfferRequest {
            session_id: "55_c".into(),
            sdp: "v=0".into(),
            width: 640,
            height: 360,
            fps: 24,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"sessionId":"55_c","sdp":"v=0","width":640,"height":360,"fps":24}"#
        );
    }

    fn offer(session: &str) -> OfferRequest {
        OfferRequest {
            session_id: session.into(),
            sdp: "v=0".into(),
            width: 640,
            height: 360,
            fps: 24,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_round_trip_and_readiness() {
        let script = r#"
while read -r line; do
  echo '[55_abc] descriptor ready: /tmp/55_abc.sdp' >&2
  echo '{"sessionId":"other","sdp":"stale"}'
  echo '{"sessionId":"55_abc","sdp":"answer"}'
done
"#;
        let config = HelperConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
            ..HelperConfig::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let helper = HelperProcess::spawn(config, tx, shutdown.clone());

        let answer = helper.negotiate(offer("55_abc")).await.unwrap();
        assert_eq!(answer.sdp, "answer");

        let ready = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ready.session_id, "55_abc");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn missing_helper_is_unavailable_then_cools_down() {
        let config = HelperConfig {
            program: PathBuf::from("nonexistent_helper_xyz_12345"),
            max_restarts: 2,
            ..HelperConfig::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let helper = HelperProcess::spawn(config, tx, CancellationToken::new());

        for _ in 0..3 {
            let err = helper.negotiate(offer("55_abc")).await.unwrap_err();
            assert!(matches!(err, StreamError::HelperUnavailable(_)));
        }
        let err = helper.negotiate(offer("55_abc")).await.unwrap_err();
        assert!(err.to_string().contains("retrying"));
    }

    async fn next_ready(rx: &mut mpsc::UnboundedReceiver<Readiness>) -> Readiness {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn released_session_reports_readiness_again() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("helper.log");
        let script = format!(
            r#"
while read -r line; do
  echo "$line" >> '{}'
  case "$line" in
    *stopStreamByID*) ;;
    *)
      echo '[55_abc] descriptor ready: /tmp/55_abc.sdp' >&2
      echo '{{"sessionId":"55_abc","sdp":"answer"}}'
      ;;
  esac
done
"#,
            log.display()
        );
        let config = HelperConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script],
            ..HelperConfig::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let helper = HelperProcess::spawn(config, tx, shutdown.clone());

        helper.negotiate(offer("55_abc")).await.unwrap();
        assert_eq!(next_ready(&mut rx).await.session_id, "55_abc");

        helper.release("55_abc").await.unwrap();
        assert!(helper.armed().is_empty());

        helper.negotiate(offer("55_abc")).await.unwrap();
        assert_eq!(next_ready(&mut rx).await.session_id, "55_abc");

        // The helper has read every line once the second answer arrived.
        let written = std::fs::read_to_string(&log).unwrap();
        assert!(written.contains(r#"{"type":"stopStreamByID","streamId":"55_abc"}"#));
        shutdown.cancel();
    }
}
