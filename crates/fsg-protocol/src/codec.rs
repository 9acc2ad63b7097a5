use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{FsgMessage, MAX_MESSAGE_SIZE};

/// Codec for fsg protocol frames.
///
/// Frame layout: `[4 bytes BE len][1 byte tag][bincode payload]`, where
/// `len` counts the tag and payload.
pub struct FsgCodec;

impl FsgCodec {
    pub fn encode(msg: &FsgMessage) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one frame from the front of `data`. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(FsgMessage, usize)> {
        let Some((header, rest)) = data.split_first_chunk::<4>() else {
            return Err(ProtocolError::FramingError("too short".into()));
        };
        let len = Self::check_len(u32::from_be_bytes(*header))?;
        if rest.len() < len {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                4 + len
            )));
        }
        let msg = Self::decode_body(&rest[..len])?;
        Ok((msg, 4 + len))
    }

    /// Read one frame. Returns `None` on a clean end of stream between frames.
    pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<FsgMessage>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 4];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = Self::check_len(u32::from_be_bytes(header))?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Self::decode_body(&body).map(Some)
    }

    pub async fn write_frame<W>(writer: &mut W, msg: &FsgMessage) -> ProtocolResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let frame = Self::encode(msg)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn check_len(len: u32) -> ProtocolResult<usize> {
        let len = len as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(len)
    }

    /// `body` is the tag byte followed by the payload.
    fn decode_body(body: &[u8]) -> ProtocolResult<FsgMessage> {
        let (&tag, payload) = body
            .split_first()
            .ok_or_else(|| ProtocolError::FramingError("missing tag".into()))?;
        let msg: FsgMessage = bincode::deserialize(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        Ok(msg)
    }
}
