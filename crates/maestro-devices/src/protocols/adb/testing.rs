//! Scripted ADB device used by the transport and adapter tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::auth::HmacSigner;
use super::message::{AdbMessage, Command, FrameBuffer, AUTH_SIGNATURE, AUTH_TOKEN};

const TOKEN: [u8; 20] = *b"0123456789abcdefghij";

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDevice {
    key: Option<Vec<u8>>,
    stray_stream: Option<u32>,
    hang_up: Arc<AtomicBool>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeDevice {
    pub(crate) fn with_key(key: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            ..Self::default()
        }
    }

    /// Send a WRTE to `local_id` before answering each OPEN
    pub(crate) fn with_stray_write(mut self, local_id: u32) -> Self {
        self.stray_stream = Some(local_id);
        self
    }

    /// Drop the first connection right after sending the banner
    pub(crate) fn hanging_up_once(self) -> Self {
        self.hang_up.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn banner() -> AdbMessage {
        AdbMessage::new(
            Command::Cnxn,
            0x0100_0000,
            4096,
            &b"device::ro.product.name=shield;ro.product.model=SHIELD\0"[..],
        )
    }

    fn output_for(command: &str) -> Option<&'static str> {
        if command.starts_with("forbidden") {
            return None;
        }
        Some(if command.starts_with("dumpsys power") {
            "POWER MANAGER (dumpsys power)\n  mWakefulness=Awake\n  mWakefulnessChanging=false\n"
        } else if command.contains("com.unknown") {
            "** No activities found to run, monkey aborted.\n"
        } else {
            ""
        })
    }

    pub(crate) async fn serve<S>(self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frames = FrameBuffer::new(1 << 20);
        let mut next_remote = 100;

        loop {
            let message = match frames.next_message() {
                Ok(Some(message)) => message,
                Err(_) => continue,
                Ok(None) => {
                    match stream.read_buf(frames.as_mut()).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => continue,
                    }
                }
            };

            let mut replies = Vec::new();
            let mut hang_up = false;
            match message.command {
                Command::Cnxn => match &self.key {
                    Some(_) => replies.push(AdbMessage::new(Command::Auth, AUTH_TOKEN, 0, &TOKEN[..])),
                    None => {
                        replies.push(Self::banner());
                        hang_up = self.hang_up.swap(false, Ordering::SeqCst);
                    }
                },
                Command::Auth if message.arg0 == AUTH_SIGNATURE => {
                    let accepted = self
                        .key
                        .as_ref()
                        .and_then(|key| HmacSigner::new(key.clone()).ok())
                        .map(|signer| signer.verify(&TOKEN, &message.payload))
                        .unwrap_or(false);
                    if accepted {
                        replies.push(Self::banner());
                    } else {
                        replies.push(AdbMessage::new(Command::Auth, AUTH_TOKEN, 0, &TOKEN[..]));
                    }
                }
                Command::Open => {
                    let destination = message.payload_text();
                    let command = destination.strip_prefix("shell:").unwrap_or(&destination).to_string();
                    self.commands.lock().unwrap().push(command.clone());
                    let local = message.arg0;
                    let remote = next_remote;
                    next_remote += 1;

                    if command.starts_with("sleep") {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    if let Some(stray) = self.stray_stream {
                        replies.push(AdbMessage::write(remote, stray, &b"stray"[..]));
                    }
                    match Self::output_for(&command) {
                        Some(output) => {
                            replies.push(AdbMessage::okay(remote, local));
                            if !output.is_empty() {
                                replies.push(AdbMessage::write(remote, local, output.as_bytes().to_vec()));
                            }
                            replies.push(AdbMessage::close(remote, local));
                        }
                        None => replies.push(AdbMessage::close(0, local)),
                    }
                }
                _ => {}
            }

            for reply in replies {
                if stream.write_all(&reply.encode()).await.is_err() {
                    return;
                }
            }
            if hang_up {
                return;
            }
        }
    }
}
