use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ControllerError, Result};

pub const ACK_OK: u8 = 1;
pub const ACK_FAILED: u8 = 0;

/// Prefix a payload with its big-endian `u16` length
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len())
        .map_err(|_| ControllerError::FrameTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 2];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = usize::from(u16::from_be_bytes(prefix));
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::split_command;

    #[tokio::test]
    async fn test_frame_then_envelope() {
        let payload = br#"[{"Id":"abc"}] report_container_list"#;
        let frame = encode_frame(payload).unwrap();
        assert_eq!(&frame[..2], &(payload.len() as u16).to_be_bytes());

        let mut reader = frame.as_slice();
        let decoded = read_frame(&mut reader).await.unwrap().unwrap();
        let (data, command) = split_command(&decoded).unwrap();
        assert_eq!(data, br#"[{"Id":"abc"}]"#);
        assert_eq!(command, b"report_container_list");

        // Clean end of stream after the frame
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![b'x'; usize::from(u16::MAX) + 1];
        assert!(matches!(
            encode_frame(&payload),
            Err(ControllerError::FrameTooLarge(65536))
        ));
        assert!(encode_frame(&payload[..usize::from(u16::MAX)]).is_ok());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        let mut reader: &[u8] = &[0x00, 0x05, b'a', b'b'];
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_payload_frame() {
        let mut reader: &[u8] = &[0x00, 0x00];
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(Vec::new()));
    }
}
