use crate::protocol::{DataKind, UdfMessage};
use crate::{Result, UdfError, UdfSpec};
use futures::{SinkExt, StreamExt};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, LengthDelimitedCodec>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LengthDelimitedCodec>;

/// A running UDF instance bound to one task node.
///
/// Data messages go out through [`UdfHost::send`]; whatever the function has
/// produced so far is collected with [`UdfHost::drain`]. A fatal protocol
/// error or missed keepalive parks the error in [`UdfHost::error`] and kills
/// the transport; the owning task checks it on every use.
pub struct UdfHost {
    pub wants: DataKind,
    pub provides: DataKind,
    tx: mpsc::UnboundedSender<UdfMessage>,
    outputs: Mutex<mpsc::UnboundedReceiver<UdfMessage>>,
    error: Arc<Mutex<Option<String>>>,
    snapshot_slot: Arc<Mutex<Option<oneshot::Sender<String>>>>,
    cancel: CancellationToken,
}

impl UdfHost {
    /// Starts the UDF (spawning the child process or connecting the
    /// socket), performs the Info/Init handshake, and optionally restores a
    /// prior state snapshot.
    pub async fn start(
        spec: &UdfSpec,
        options: serde_json::Value,
        restore: Option<String>,
    ) -> Result<UdfHost> {
        let cancel = CancellationToken::new();
        let (mut reader, mut writer) = open_transport(spec, cancel.clone()).await?;

        // Handshake runs inline so startup failures surface to the enable
        // call rather than a background task.
        send(&mut writer, UdfMessage::Info).await?;
        let (wants, provides) = match recv(&mut reader, spec.timeout).await? {
            UdfMessage::InfoResponse { wants, provides } => (wants, provides),
            other => {
                cancel.cancel();
                return Err(UdfError::Protocol(format!(
                    "expected info_response, got {other:?}"
                )));
            }
        };
        send(&mut writer, UdfMessage::Init { options }).await?;
        match recv(&mut reader, spec.timeout).await? {
            UdfMessage::InitResponse { success: true, .. } => {}
            UdfMessage::InitResponse { error, .. } => {
                cancel.cancel();
                return Err(UdfError::Remote(error));
            }
            other => {
                cancel.cancel();
                return Err(UdfError::Protocol(format!(
                    "expected init_response, got {other:?}"
                )));
            }
        }
        if let Some(snapshot) = restore {
            send(&mut writer, UdfMessage::Restore { snapshot }).await?;
            match recv(&mut reader, spec.timeout).await? {
                UdfMessage::RestoreResponse { success: true, .. } => {}
                UdfMessage::RestoreResponse { error, .. } => {
                    cancel.cancel();
                    return Err(UdfError::Remote(error));
                }
                other => {
                    cancel.cancel();
                    return Err(UdfError::Protocol(format!(
                        "expected restore_response, got {other:?}"
                    )));
                }
            }
        }

        let (tx, mut to_writer) = mpsc::unbounded_channel::<UdfMessage>();
        let (out_tx, outputs) = mpsc::unbounded_channel::<UdfMessage>();
        let error = Arc::new(Mutex::new(None::<String>));
        let snapshot_slot: Arc<Mutex<Option<oneshot::Sender<String>>>> =
            Arc::new(Mutex::new(None));
        let last_seen = Arc::new(Mutex::new(Instant::now()));

        // Reader: route responses, track liveness.
        {
            let error = error.clone();
            let snapshot_slot = snapshot_slot.clone();
            let last_seen = last_seen.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break,
                        frame = reader.next() => frame,
                    };
                    let Some(frame) = frame else {
                        set_error(&error, "UDF closed the connection");
                        cancel.cancel();
                        break;
                    };
                    let frame = match frame {
                        Ok(f) => f,
                        Err(e) => {
                            set_error(&error, &format!("UDF read error: {e}"));
                            cancel.cancel();
                            break;
                        }
                    };
                    *last_seen.lock().unwrap() = Instant::now();
                    match UdfMessage::decode(&frame) {
                        Ok(UdfMessage::Keepalive { .. }) => {}
                        Ok(UdfMessage::Error { error: msg }) => {
                            set_error(&error, &msg);
                            cancel.cancel();
                            break;
                        }
                        Ok(UdfMessage::SnapshotResponse { snapshot }) => {
                            if let Some(tx) = snapshot_slot.lock().unwrap().take() {
                                let _ = tx.send(snapshot);
                            }
                        }
                        Ok(msg @ (UdfMessage::Point { .. }
                        | UdfMessage::BeginBatch { .. }
                        | UdfMessage::EndBatch { .. })) => {
                            let _ = out_tx.send(msg);
                        }
                        Ok(other) => {
                            tracing::debug!(?other, "ignoring unexpected UDF message");
                        }
                        Err(e) => {
                            set_error(&error, &format!("UDF sent undecodable frame: {e}"));
                            cancel.cancel();
                            break;
                        }
                    }
                }
            });
        }

        // Writer + keepalive watchdog.
        {
            let error = error.clone();
            let cancel = cancel.clone();
            let timeout = spec.timeout;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(timeout / 2);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = to_writer.recv() => {
                            let Some(msg) = msg else { break };
                            if let Err(e) = send(&mut writer, msg).await {
                                set_error(&error, &format!("UDF write error: {e}"));
                                cancel.cancel();
                                break;
                            }
                        }
                        _ = tick.tick() => {
                            let idle = last_seen.lock().unwrap().elapsed();
                            if idle > timeout {
                                set_error(
                                    &error,
                                    &UdfError::KeepaliveTimeout(timeout).to_string(),
                                );
                                cancel.cancel();
                                break;
                            }
                            let ka = UdfMessage::Keepalive {
                                time: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
                            };
                            if let Err(e) = send(&mut writer, ka).await {
                                set_error(&error, &format!("UDF write error: {e}"));
                                cancel.cancel();
                                break;
                            }
                        }
                    }
                }
            });
        }

        Ok(UdfHost {
            wants,
            provides,
            tx,
            outputs: Mutex::new(outputs),
            error,
            snapshot_slot,
            cancel,
        })
    }

    /// Queues a data message for the UDF.
    pub fn send(&self, msg: UdfMessage) -> Result<()> {
        if let Some(err) = self.error() {
            return Err(UdfError::Remote(err));
        }
        self.tx
            .send(msg)
            .map_err(|_| UdfError::Closed)
    }

    /// Returns every output produced so far without blocking.
    pub fn drain(&self) -> Vec<UdfMessage> {
        let mut out = Vec::new();
        let mut rx = self
            .outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Requests a state snapshot, waiting up to the given timeout.
    pub async fn snapshot(&self, timeout: Duration) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        *self.snapshot_slot.lock().unwrap() = Some(tx);
        self.send(UdfMessage::Snapshot)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(UdfError::Closed),
            Err(_) => Err(UdfError::KeepaliveTimeout(timeout)),
        }
    }

    /// Tears the UDF down. Subprocesses receive SIGKILL through the waiter.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for UdfHost {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn set_error(slot: &Arc<Mutex<Option<String>>>, msg: &str) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(msg.to_string());
    }
}

async fn send(writer: &mut Writer, msg: UdfMessage) -> Result<()> {
    let bytes = msg
        .encode()
        .map_err(|e| UdfError::Protocol(format!("encode: {e}")))?;
    writer.send(bytes).await?;
    Ok(())
}

async fn recv(reader: &mut Reader, timeout: Duration) -> Result<UdfMessage> {
    let frame = tokio::time::timeout(timeout, reader.next())
        .await
        .map_err(|_| UdfError::KeepaliveTimeout(timeout))?
        .ok_or(UdfError::Closed)??;
    UdfMessage::decode(&frame).map_err(|e| UdfError::Protocol(format!("decode: {e}")))
}

async fn open_transport(spec: &UdfSpec, cancel: CancellationToken) -> Result<(Reader, Writer)> {
    if let Some(prog) = &spec.prog {
        let mut cmd = tokio::process::Command::new(prog);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(UdfError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            UdfError::Protocol("child stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            UdfError::Protocol("child stdout unavailable".to_string())
        })?;
        // Waiter owns the child: kill on cancellation, reap on exit.
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                }
                status = child.wait() => {
                    match status {
                        Ok(status) if !status.success() => {
                            tracing::warn!(code = ?status.code(), "UDF process exited with error");
                        }
                        Err(e) => tracing::error!(error = %e, "error waiting for UDF process"),
                        _ => {}
                    }
                }
            }
        });
        let reader: Reader = FramedRead::new(Box::new(stdout), LengthDelimitedCodec::new());
        let writer: Writer = FramedWrite::new(Box::new(stdin), LengthDelimitedCodec::new());
        Ok((reader, writer))
    } else if let Some(path) = &spec.socket {
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|source| UdfError::Connect {
                path: path.clone(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let reader: Reader = FramedRead::new(Box::new(read_half), LengthDelimitedCodec::new());
        let writer: Writer = FramedWrite::new(Box::new(write_half), LengthDelimitedCodec::new());
        Ok((reader, writer))
    } else {
        Err(UdfError::Protocol(format!(
            "UDF function {:?} defines neither prog nor socket",
            spec.name
        )))
    }
}
