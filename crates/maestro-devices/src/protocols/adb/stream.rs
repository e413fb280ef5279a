/*!
 * Stream bookkeeping for an ADB session.
 *
 * Local ids are allocated here. A stream stays in `Opening` until the device
 * acknowledges the OPEN with `OKAY(remote_id, local_id)`; only then may data be
 * written. Frames from the device carry its id in `arg0` and ours in `arg1`.
 */
use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::device::{DeviceError, Result};

use super::message::AdbMessage;

/// Lifecycle of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// OPEN sent, waiting for OKAY
    Opening,
    /// Acknowledged; writes are legal
    Open,
}

#[derive(Debug)]
struct Stream {
    destination: String,
    state: StreamState,
    remote_id: u32,
    output: BytesMut,
}

/// What a stream produced before it closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedStream {
    /// Local id the stream had
    pub local_id: u32,
    /// Whether the device accepted the OPEN before closing
    pub acknowledged: bool,
    /// Everything the device wrote
    pub output: Bytes,
}

/// Open streams of one connection, keyed by local id
#[derive(Debug)]
pub struct StreamTable {
    next_local_id: u32,
    streams: HashMap<u32, Stream>,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            next_local_id: 1,
            streams: HashMap::new(),
        }
    }

    /// Number of tracked streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no stream is tracked
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// State of `local_id`, if tracked
    pub fn state(&self, local_id: u32) -> Option<StreamState> {
        self.streams.get(&local_id).map(|s| s.state)
    }

    /// Allocate a stream for `destination` and build its OPEN
    pub fn open(&mut self, destination: &str) -> (u32, AdbMessage) {
        let local_id = self.next_local_id;
        self.next_local_id = self.next_local_id.checked_add(1).unwrap_or(1);
        self.streams.insert(
            local_id,
            Stream {
                destination: destination.to_string(),
                state: StreamState::Opening,
                remote_id: 0,
                output: BytesMut::new(),
            },
        );
        trace!("Opening stream {} to {}", local_id, destination);
        (local_id, AdbMessage::open(local_id, destination))
    }

    /// Handle `OKAY(remote_id, local_id)` from the device
    pub fn on_okay(&mut self, remote_id: u32, local_id: u32) -> Result<()> {
        let stream = self.get_mut(local_id, "OKAY")?;
        match stream.state {
            StreamState::Opening => {
                stream.state = StreamState::Open;
                stream.remote_id = remote_id;
                trace!("Stream {} to {} acknowledged by {}", local_id, stream.destination, remote_id);
                Ok(())
            }
            StreamState::Open if stream.remote_id == remote_id => Ok(()),
            StreamState::Open => Err(DeviceError::invalid_state(format!(
                "OKAY from {} for stream {} owned by {}",
                remote_id, local_id, stream.remote_id
            ))),
        }
    }

    /// Build a WRTE on `local_id`
    pub fn write(&mut self, local_id: u32, data: impl Into<Bytes>) -> Result<AdbMessage> {
        let stream = self.get_mut(local_id, "WRTE")?;
        if stream.state != StreamState::Open {
            return Err(DeviceError::invalid_state(format!(
                "stream {} has not been acknowledged yet",
                local_id
            )));
        }
        Ok(AdbMessage::write(local_id, stream.remote_id, data))
    }

    /// Handle `WRTE(remote_id, local_id)` and build the OKAY acknowledging it
    pub fn on_write(&mut self, remote_id: u32, local_id: u32, data: &[u8]) -> Result<AdbMessage> {
        let stream = self.get_mut(local_id, "WRTE")?;
        if stream.state != StreamState::Open {
            return Err(DeviceError::invalid_state(format!(
                "data on stream {} before it was acknowledged",
                local_id
            )));
        }
        stream.output.extend_from_slice(data);
        Ok(AdbMessage::okay(local_id, remote_id))
    }

    /// Handle `CLSE(remote_id, local_id)`; returns the reply and what the stream produced
    pub fn on_close(&mut self, remote_id: u32, local_id: u32) -> Result<(AdbMessage, ClosedStream)> {
        let stream = self
            .streams
            .remove(&local_id)
            .ok_or_else(|| unknown_stream("CLSE", local_id))?;
        trace!("Stream {} to {} closed by device", local_id, stream.destination);
        Ok((
            AdbMessage::close(local_id, remote_id),
            ClosedStream {
                local_id,
                acknowledged: stream.state == StreamState::Open,
                output: stream.output.freeze(),
            },
        ))
    }

    /// Close `local_id` from our side
    ///
    /// Returns the CLSE to send, or `None` when the stream is not tracked.
    pub fn close(&mut self, local_id: u32) -> Option<AdbMessage> {
        let stream = self.streams.remove(&local_id)?;
        match stream.state {
            StreamState::Open => Some(AdbMessage::close(local_id, stream.remote_id)),
            StreamState::Opening => Some(AdbMessage::close(local_id, 0)),
        }
    }

    /// Forget every stream
    pub fn clear(&mut self) {
        self.streams.clear();
    }

    fn get_mut(&mut self, local_id: u32, what: &str) -> Result<&mut Stream> {
        self.streams
            .get_mut(&local_id)
            .ok_or_else(|| unknown_stream(what, local_id))
    }
}

fn unknown_stream(what: &str, local_id: u32) -> DeviceError {
    DeviceError::invalid_state(format!("{} for unknown stream {}", what, local_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::adb::message::Command;

    #[test]
    fn test_write_requires_acknowledgement() {
        let mut table = StreamTable::new();
        let (local, open) = table.open("shell:echo hi");
        assert_eq!(open.command, Command::Open);
        assert_eq!(open.arg0, local);
        assert_eq!(table.state(local), Some(StreamState::Opening));

        assert!(matches!(table.write(local, &b"x"[..]), Err(DeviceError::InvalidState(_))));

        table.on_okay(99, local).unwrap();
        let write = table.write(local, &b"x"[..]).unwrap();
        assert_eq!((write.arg0, write.arg1), (local, 99));
    }

    #[test]
    fn test_unknown_stream_leaves_others_intact() {
        let mut table = StreamTable::new();
        let (first, _) = table.open("shell:a");
        let (second, _) = table.open("shell:b");
        table.on_okay(10, first).unwrap();
        table.on_okay(11, second).unwrap();

        assert!(matches!(
            table.on_write(12, 4242, b"stray"),
            Err(DeviceError::InvalidState(_))
        ));
        assert!(matches!(table.write(4242, &b"x"[..]), Err(DeviceError::InvalidState(_))));

        assert_eq!(table.len(), 2);
        assert_eq!(table.state(first), Some(StreamState::Open));
        let ack = table.on_write(11, second, b"ok").unwrap();
        assert_eq!(ack, AdbMessage::okay(second, 11));
    }

    #[test]
    fn test_remote_close_collects_output() {
        let mut table = StreamTable::new();
        let (local, _) = table.open("shell:dumpsys power");
        table.on_okay(5, local).unwrap();
        table.on_write(5, local, b"mWakefulness=").unwrap();
        table.on_write(5, local, b"Awake\n").unwrap();

        let (reply, closed) = table.on_close(5, local).unwrap();
        assert_eq!(reply, AdbMessage::close(local, 5));
        assert!(closed.acknowledged);
        assert_eq!(&closed.output[..], b"mWakefulness=Awake\n");
        assert!(table.is_empty());
        assert!(table.on_close(5, local).is_err());
    }

    #[test]
    fn test_refused_open() {
        let mut table = StreamTable::new();
        let (local, _) = table.open("shell:forbidden");
        let (_, closed) = table.on_close(0, local).unwrap();
        assert!(!closed.acknowledged);
        assert!(closed.output.is_empty());
    }

    #[test]
    fn test_local_close() {
        let mut table = StreamTable::new();
        let (local, _) = table.open("shell:x");
        table.on_okay(3, local).unwrap();
        assert_eq!(table.close(local), Some(AdbMessage::close(local, 3)));
        assert_eq!(table.close(local), None);
    }
}
