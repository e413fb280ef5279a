/*!
 * One ADB transport session.
 *
 * The socket is split on start: a reader task owns the read half, decodes
 * frames and forwards them through a channel, while the connection keeps the
 * write half. The reader is stopped through a cancellation token and joined
 * before the socket is released. When the device drops the socket the reader
 * trips a second token so the owner can notice without polling.
 */
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use maestro_core::utils::with_timeout;

use crate::adapter::ConnectionMonitor;
use crate::device::{ConnectionErrorKind, ConnectionState, DeviceError, Result};

use super::auth::ChallengeSigner;
use super::message::{AdbMessage, Command, FrameBuffer, AUTH_TOKEN};
use super::stream::StreamTable;

const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Output of a shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutcome {
    /// The device ran the command
    Completed(Bytes),
    /// The device closed the stream without accepting it
    Refused,
}

/// An open ADB transport
pub struct AdbConnection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    frames: mpsc::Receiver<Result<AdbMessage>>,
    streams: StreamTable,
    cancel: CancellationToken,
    lost: CancellationToken,
    reader: Option<JoinHandle<()>>,
    banner: Option<String>,
}

impl std::fmt::Debug for AdbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbConnection")
            .field("streams", &self.streams.len())
            .field("banner", &self.banner)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl AdbConnection {
    /// Split `stream` and start the reader task
    pub fn start<S>(stream: S, max_payload: u32) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let lost = CancellationToken::new();
        let reader = tokio::spawn(read_loop(read_half, max_payload, tx, cancel.clone(), lost.clone()));

        Self {
            writer: Box::new(write_half),
            frames: rx,
            streams: StreamTable::new(),
            cancel,
            lost,
            reader: Some(reader),
            banner: None,
        }
    }

    /// Whether the socket is still up and the reader task running
    pub fn is_alive(&self) -> bool {
        !self.lost.is_cancelled() && self.reader.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Resolves once the reader stops
    ///
    /// Yields `true` when the device closed or reset the socket and `false`
    /// when the connection was closed or dropped locally.
    pub fn lost(&self) -> impl Future<Output = bool> + Send + 'static {
        let cancel = self.cancel.clone();
        let lost = self.lost.clone();
        async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = lost.cancelled() => true,
            }
        }
    }

    /// Banner the device sent in its CNXN
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Write one message
    pub async fn send(&mut self, message: &AdbMessage) -> Result<()> {
        trace!("-> {}", message);
        self.writer.write_all(&message.encode()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next message from the reader task
    ///
    /// Corrupt frames come back as `CorruptFrame`; the connection stays usable.
    pub async fn recv(&mut self) -> Result<AdbMessage> {
        match self.frames.recv().await {
            Some(Ok(message)) => {
                trace!("<- {}", message);
                Ok(message)
            }
            Some(Err(e)) => Err(e),
            None => Err(DeviceError::connection(
                ConnectionErrorKind::Closed,
                "ADB reader stopped",
            )),
        }
    }

    /// Exchange banners and answer the pairing challenge
    ///
    /// Ends in `Authenticated` when a challenge was answered and in
    /// `Connected` when the device accepted the banner as is. Anything else,
    /// including no reply within `deadline`, is an authentication failure.
    pub async fn handshake(
        &mut self,
        system_identity: &str,
        max_payload: u32,
        signer: Option<&dyn ChallengeSigner>,
        monitor: &ConnectionMonitor,
        deadline: Duration,
    ) -> Result<ConnectionState> {
        self.send(&AdbMessage::connect(max_payload, system_identity)).await?;

        match with_timeout(deadline, async { Ok(self.exchange_banners(signer, monitor).await) }).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DeviceError::Authentication(format!(
                "no handshake reply within {} ms",
                deadline.as_millis()
            ))),
        }
    }

    async fn exchange_banners(
        &mut self,
        signer: Option<&dyn ChallengeSigner>,
        monitor: &ConnectionMonitor,
    ) -> Result<ConnectionState> {
        let mut challenged = false;
        loop {
            let message = match self.recv().await {
                Ok(message) => message,
                Err(DeviceError::CorruptFrame(reason)) => {
                    return Err(DeviceError::Authentication(format!(
                        "corrupt handshake reply: {}",
                        reason
                    )))
                }
                Err(e) => return Err(e),
            };

            match message.command {
                Command::Cnxn => {
                    let banner = message.payload_text();
                    debug!("ADB device banner: {}", banner);
                    self.banner = Some(banner);
                    return Ok(if challenged {
                        ConnectionState::Authenticated
                    } else {
                        ConnectionState::Connected
                    });
                }
                Command::Auth if message.arg0 == AUTH_TOKEN => {
                    if challenged {
                        return Err(DeviceError::Authentication(
                            "device rejected the signed token".to_string(),
                        ));
                    }
                    let signer = signer.ok_or_else(|| {
                        DeviceError::Authentication(
                            "device requires pairing but no key is configured".to_string(),
                        )
                    })?;
                    monitor.transition(ConnectionState::Authenticating);
                    let signature = signer.sign(&message.payload)?;
                    self.send(&AdbMessage::auth_signature(signature)).await?;
                    challenged = true;
                }
                _ => {
                    return Err(DeviceError::Authentication(format!(
                        "unexpected {} during handshake",
                        message
                    )))
                }
            }
        }
    }

    /// Run `command` through a `shell:` stream and collect its output
    ///
    /// A stream that fails midway is closed and forgotten before the error is
    /// returned.
    pub async fn shell(&mut self, command: &str) -> Result<ShellOutcome> {
        let (local_id, open) = self.streams.open(&format!("shell:{}", command));
        let outcome = match self.send(&open).await {
            Ok(()) => self.follow_stream(local_id).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            if let Some(close) = self.streams.close(local_id) {
                debug!("Abandoning stream {}: {}", local_id, e);
                if !matches!(e, DeviceError::Connection { .. }) {
                    self.send(&close).await?;
                }
            }
        }
        outcome
    }

    async fn follow_stream(&mut self, local_id: u32) -> Result<ShellOutcome> {
        loop {
            let message = self.recv().await?;

            if message.arg1 != local_id {
                self.handle_stray(message).await?;
                continue;
            }

            match message.command {
                Command::Okay => self.streams.on_okay(message.arg0, local_id)?,
                Command::Wrte => {
                    let ack = self.streams.on_write(message.arg0, local_id, &message.payload)?;
                    self.send(&ack).await?;
                }
                Command::Clse => {
                    let (reply, closed) = self.streams.on_close(message.arg0, local_id)?;
                    if closed.acknowledged {
                        self.send(&reply).await?;
                        return Ok(ShellOutcome::Completed(closed.output));
                    }
                    return Ok(ShellOutcome::Refused);
                }
                _ => warn!("Ignoring {} on stream {}", message, local_id),
            }
        }
    }

    /// Frames for streams other than the one in flight
    async fn handle_stray(&mut self, message: AdbMessage) -> Result<()> {
        let reply = match message.command {
            Command::Okay => self.streams.on_okay(message.arg0, message.arg1).map(|_| None),
            Command::Wrte => self
                .streams
                .on_write(message.arg0, message.arg1, &message.payload)
                .map(Some),
            Command::Clse => self
                .streams
                .on_close(message.arg0, message.arg1)
                .map(|(reply, _)| Some(reply)),
            _ => Ok(None),
        };

        match reply {
            Ok(Some(reply)) => self.send(&reply).await,
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Ignoring {}: {}", message, e);
                Ok(())
            }
        }
    }

    /// Stop the reader, wait for it and shut the socket down
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("ADB reader task ended abnormally: {}", e);
            }
        }
        self.streams.clear();
        if let Err(e) = self.writer.shutdown().await {
            trace!("ADB socket shutdown: {}", e);
        }
    }
}

impl Drop for AdbConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop<R>(
    mut reader: R,
    max_payload: u32,
    frames: mpsc::Sender<Result<AdbMessage>>,
    cancel: CancellationToken,
    lost: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = FrameBuffer::new(max_payload);

    loop {
        loop {
            let next = match buffer.next_message() {
                Ok(Some(message)) => Ok(message),
                Ok(None) => break,
                Err(e) => {
                    warn!("Discarding ADB frame: {}", e);
                    Err(DeviceError::CorruptFrame(e.to_string()))
                }
            };
            if frames.send(next).await.is_err() {
                return;
            }
        }

        let read = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ADB reader cancelled");
                return;
            }
            read = reader.read_buf(buffer.as_mut()) => read,
        };

        let failure = match read {
            Ok(0) => DeviceError::connection(ConnectionErrorKind::Closed, "device closed the connection"),
            Ok(_) => continue,
            Err(e) => DeviceError::from(e),
        };
        debug!("ADB reader stopping: {}", failure);
        lost.cancel();
        let _ = frames.send(Err(failure)).await;
        return;
    }
}
