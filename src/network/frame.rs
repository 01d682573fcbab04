use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::{CommandRequest, CommandResponse, KvError};

/// The length of the length field in the frame is 4 bytes.
pub const LEN_LEN: usize = 4;

/// The maximum length of a frame is 2GB.
const MAX_FRAME: usize = 2 * 1024 * 1024 * 1024;

/// If the length of the frame is larger than 1436(1500-20-20-20-4) bytes, it will be compressed.
/// 1500: MTU
/// 20: IP header
/// 20: TCP header
/// 20: Remain for Options
/// 4: Frame header
pub(crate) const COMPRESSION_LIMIT: usize = 1436;

/// The first bit of the frame is used to indicate whether the frame is compressed.
const COMPRESSION_BIT: usize = 1 << 31;

/// FrameCoder is a trait that defines the methods for encoding and decoding frames.
pub trait FrameCoder
where
    Self: Message + Sized + Default,
{
    /// Encode a completed frame into the buffer.
    fn encode_frame(&self, buf: &mut BytesMut) -> Result<(), KvError> {
        let size = self.encoded_len();

        if size >= MAX_FRAME {
            return Err(KvError::FrameTooLarge);
        }

        buf.put_u32(size as _);

        if size > COMPRESSION_LIMIT {
            let mut buf1 = Vec::with_capacity(size);
            self.encode(&mut buf1)?;

            let payload = buf.split_off(LEN_LEN);
            buf.clear();

            let mut encoder = GzEncoder::new(payload.writer(), Compression::default());
            encoder.write_all(&buf1[..])?;

            // finish flushes and closes the gzip stream in one step
            let payload = encoder.finish()?.into_inner();
            debug!("Encode a frame: size {}({})", size, payload.len());

            buf.put_u32((payload.len() | COMPRESSION_BIT) as _);
            buf.unsplit(payload);

            Ok(())
        } else {
            self.encode(buf)?;
            Ok(())
        }
    }

    /// Decode a completed frame from the buffer.
    fn decode_frame(buf: &mut BytesMut) -> Result<Self, KvError> {
        let header = buf.get_u32() as usize;
        let (len, compressed) = decode_header(header);
        debug!("Got a frame: msg len {}, compressed {}", len, compressed);

        if compressed {
            let mut decoder = GzDecoder::new(&buf[..len]);
            let mut buf1 = Vec::with_capacity(len * 2);
            decoder
                .read_to_end(&mut buf1)
                .map_err(|e| KvError::DecompressError(e.to_string()))?;
            buf.advance(len);

            Ok(Self::decode(&buf1[..])?)
        } else {
            let msg = Self::decode(&buf[..len])?;
            buf.advance(len);
            Ok(msg)
        }
    }
}

fn decode_header(header: usize) -> (usize, bool) {
    let len = header & !COMPRESSION_BIT;
    let compressed = header & COMPRESSION_BIT == COMPRESSION_BIT;
    (len, compressed)
}

impl FrameCoder for CommandRequest {}
impl FrameCoder for CommandResponse {}

/// Read a completed frame from the stream. Reads are accumulated up to the
/// frame length, never assumed to arrive in one piece. A peer close on a
/// frame boundary is reported as `ConnectionClosed`, a close mid-frame as
/// `FrameTruncated`.
pub async fn read_frame<S>(stream: &mut S, buf: &mut BytesMut) -> Result<(), KvError>
where
    S: AsyncRead + Unpin + Send,
{
    let mut header = [0u8; LEN_LEN];
    let mut filled = 0;
    while filled < LEN_LEN {
        let n = stream.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                KvError::ConnectionClosed
            } else {
                KvError::FrameTruncated
            });
        }
        filled += n;
    }

    let header = u32::from_be_bytes(header) as usize;
    let (len, _compressed) = decode_header(header);

    buf.reserve(LEN_LEN + len);
    buf.put_u32(header as _);

    // SAFETY: we have just reserved the space for the payload
    unsafe {
        buf.advance_mut(len);
    }

    let start = buf.len() - len;
    match stream.read_exact(&mut buf[start..]).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(KvError::FrameTruncated),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::Value;

    use super::*;

    #[test]
    fn command_request_encode_decode_should_work() {
        let mut buf = BytesMut::new();

        let cmd = CommandRequest::new_hget("t1", "k1");
        cmd.encode_frame(&mut buf).unwrap();

        assert!(!is_compressed(&buf));

        let cmd1 = CommandRequest::decode_frame(&mut buf).unwrap();
        assert_eq!(cmd, cmd1);
    }

    #[test]
    fn command_response_encode_decode_should_work() {
        let mut buf = BytesMut::new();

        let value: Value = Bytes::from(vec![0u8; COMPRESSION_LIMIT + 1]).into();
        let res: CommandResponse = value.into();
        res.encode_frame(&mut buf).unwrap();

        assert!(is_compressed(&buf));

        let res1 = CommandResponse::decode_frame(&mut buf).unwrap();
        assert_eq!(res, res1);
    }

    #[test]
    fn compression_boundary_should_be_respected() {
        // grow a response until its encoding sits exactly on the limit
        let mut n = 1400;
        while response_of(n).encoded_len() < COMPRESSION_LIMIT {
            n += 1;
        }
        let res = response_of(n);
        assert_eq!(res.encoded_len(), COMPRESSION_LIMIT);

        let mut buf = BytesMut::new();
        res.encode_frame(&mut buf).unwrap();
        assert!(!is_compressed(&buf));
        // the length field equals the serialized length
        let header = u32::from_be_bytes(buf[..4].try_into().unwrap());
        assert_eq!(header as usize, COMPRESSION_LIMIT);

        // one byte over the limit and the frame is compressed
        let res = response_of(n + 1);
        assert_eq!(res.encoded_len(), COMPRESSION_LIMIT + 1);

        let mut buf = BytesMut::new();
        res.encode_frame(&mut buf).unwrap();
        assert!(is_compressed(&buf));

        let res1 = CommandResponse::decode_frame(&mut buf).unwrap();
        assert_eq!(res, res1);
    }

    #[test]
    fn corrupted_gzip_payload_should_not_decode() {
        let value: Value = Bytes::from(vec![0u8; COMPRESSION_LIMIT + 1]).into();
        let res: CommandResponse = value.into();
        let mut buf = BytesMut::new();
        res.encode_frame(&mut buf).unwrap();

        // drop the last payload byte and fix up the length field
        let header = u32::from_be_bytes(buf[..4].try_into().unwrap());
        let mut truncated = BytesMut::new();
        truncated.put_u32(header - 1);
        truncated.extend_from_slice(&buf[4..buf.len() - 1]);

        let result = CommandResponse::decode_frame(&mut truncated);
        assert!(matches!(result, Err(KvError::DecompressError(_))));
    }

    #[tokio::test]
    async fn read_frame_should_work() {
        let mut buf = BytesMut::new();
        let cmd = CommandRequest::new_hget("t1", "k1");
        cmd.encode_frame(&mut buf).unwrap();

        let mut stream = DummyStream { buf };

        let mut data = BytesMut::new();
        read_frame(&mut stream, &mut data).await.unwrap();

        let cmd1 = CommandRequest::decode_frame(&mut data).unwrap();
        assert_eq!(cmd, cmd1);
    }

    #[tokio::test]
    async fn read_frame_on_empty_stream_should_report_clean_close() {
        let mut stream = DummyStream {
            buf: BytesMut::new(),
        };
        let mut data = BytesMut::new();
        let result = read_frame(&mut stream, &mut data).await;
        assert!(matches!(result, Err(KvError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn read_frame_on_partial_frame_should_report_truncation() {
        let mut buf = BytesMut::new();
        let cmd = CommandRequest::new_hget("t1", "k1");
        cmd.encode_frame(&mut buf).unwrap();

        // peer goes away in the middle of the payload
        let partial = buf.split_to(buf.len() - 1);
        let mut stream = DummyStream { buf: partial };
        let mut data = BytesMut::new();
        let result = read_frame(&mut stream, &mut data).await;
        assert!(matches!(result, Err(KvError::FrameTruncated)));

        // or even in the middle of the header
        let mut stream = DummyStream {
            buf: BytesMut::from(&[0u8, 0][..]),
        };
        let mut data = BytesMut::new();
        let result = read_frame(&mut stream, &mut data).await;
        assert!(matches!(result, Err(KvError::FrameTruncated)));
    }

    fn response_of(n: usize) -> CommandResponse {
        let v: Value = "a".repeat(n).into();
        v.into()
    }

    fn is_compressed(buf: &BytesMut) -> bool {
        if let &[v] = &buf[..1] {
            v >> 7 == 1
        } else {
            false
        }
    }

    struct DummyStream {
        buf: BytesMut,
    }

    impl AsyncRead for DummyStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let this = self.get_mut();
            let len = buf.remaining().min(this.buf.len());
            let data = this.buf.split_to(len);
            buf.put_slice(&data);
            std::task::Poll::Ready(Ok(()))
        }
    }
}
