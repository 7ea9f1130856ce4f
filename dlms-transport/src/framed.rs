//! HDLC frames over a byte stream

use dlms_core::DlmsResult;
use dlms_session::{HdlcFrame, StreamReassembler};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 4096;

/// Reads whole frames from a stream
///
/// Partial frames stay buffered between calls, so `read_frames` can be
/// cancelled (for example by `tokio::select!`) without losing data.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    reassembler: StreamReassembler,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            reassembler: StreamReassembler::new(),
            buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Wait until at least one frame is complete
    ///
    /// Returns `None` once the peer closed the stream.
    pub async fn read_frames(&mut self) -> DlmsResult<Option<Vec<HdlcFrame>>> {
        loop {
            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                if self.reassembler.has_partial() {
                    log::debug!(
                        "stream closed with {} bytes of an incomplete frame",
                        self.reassembler.buffered()
                    );
                }
                return Ok(None);
            }
            let frames = self.reassembler.push(&self.buf[..n]);
            for frame in &frames {
                log::debug!("rx {}", frame);
            }
            if !frames.is_empty() {
                return Ok(Some(frames));
            }
        }
    }

    pub fn reassembler(&self) -> &StreamReassembler {
        &self.reassembler
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to a stream
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        let bytes = frame.encode()?;
        log::debug!("tx {}", frame);
        self.send_raw(&bytes).await
    }

    /// Write already encoded frame bytes
    pub async fn send_raw(&mut self, bytes: &[u8]) -> DlmsResult<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> DlmsResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_session::FrameAddresses;

    fn frame_bytes(payload: &[u8]) -> Vec<u8> {
        HdlcFrame::information(FrameAddresses::METER_TO_CLIENT, payload.to_vec())
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_frame_split_across_reads() {
        let bytes = frame_bytes(&[0xC4, 0x01, 0x01, 0x00, 0x00, 0x11, 0x05]);
        let (head, tail) = bytes.split_at(6);
        let mut noisy_head = vec![0x00, 0x13, 0x99];
        noisy_head.extend_from_slice(head);

        let mock = tokio_test::io::Builder::new().read(&noisy_head).read(tail).build();
        let mut reader = FrameReader::new(mock);

        let frames = reader.read_frames().await.unwrap().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].apdu(), &[0xC4, 0x01, 0x01, 0x00, 0x00, 0x11, 0x05]);
        assert!(reader.read_frames().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_encoded_frame() {
        let frame = HdlcFrame::disc(FrameAddresses::CLIENT_TO_METER);
        let expected = frame.encode().unwrap();
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let mut writer = FrameWriter::new(mock);
        writer.send(&frame).await.unwrap();
    }
}
