//! The subprocess wire protocol (§4.8): `uint32` big-endian
//! length-prefixed, `serde_json`-encoded frames exchanged over a loopback
//! TCP connection between the engine process and a spawned
//! `aria-task-runner` child. A closed enum plus a fixed framing replaces the
//! source's line-oriented, reflection-driven IPC — an unrecognized frame is
//! a decode error, not a dynamically dispatched call.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::model::TrackedChange;

/// One message on the wire, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Runner -> engine: the operation started executing.
    Started { task_id: Uuid },
    /// Runner -> engine: the operation completed successfully.
    Succeeded {
        task_id: Uuid,
        result: serde_json::Value,
        #[serde(default)]
        tracked_changes: Vec<TrackedChange>,
    },
    /// Runner -> engine: the operation failed. `is_abort` distinguishes
    /// `ctx.task.abort` from an ordinary raised error or `ctx.task.retry`
    /// (§4.9); `retry_interval_ms` carries an explicit retry interval when
    /// the runner requested one.
    Failed {
        task_id: Uuid,
        message: String,
        is_abort: bool,
        retry_interval_ms: Option<u64>,
        #[serde(default)]
        tracked_changes: Vec<TrackedChange>,
    },
    /// Runner -> engine: the connection is about to close; no more
    /// messages follow for this task.
    Closed { task_id: Uuid },
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &WireMessage) -> std::io::Result<()> {
    let payload = serde_json::to_vec(message)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame, or `Ok(None)` on a clean EOF before any
/// bytes of the next frame arrive.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<WireMessage>> {
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let message = serde_json::from_slice(&buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_started_frame() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let message = WireMessage::Started { task_id: Uuid::now_v7() };
        write_frame(&mut client, &message).await.unwrap();
        let received = read_frame(&mut server).await.unwrap().unwrap();
        assert!(matches!(received, WireMessage::Started { .. }));
    }

    #[tokio::test]
    async fn round_trips_a_succeeded_frame_with_tracked_changes() {
        let (mut client, mut server) = tokio::io::duplex(8192);
        let task_id = Uuid::now_v7();
        let message = WireMessage::Succeeded {
            task_id,
            result: serde_json::json!({"ok": true}),
            tracked_changes: vec![TrackedChange::new(
                crate::model::EntityKind::Node,
                Uuid::now_v7(),
                "ip",
                None,
                serde_json::json!("10.0.0.1"),
            )],
        };
        write_frame(&mut client, &message).await.unwrap();
        match read_frame(&mut server).await.unwrap().unwrap() {
            WireMessage::Succeeded { task_id: got, tracked_changes, .. } => {
                assert_eq!(got, task_id);
                assert_eq!(tracked_changes.len(), 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_before_a_frame_is_a_clean_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }
}
