
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use util::Conn;

/// STUN message header: type (2), length (2), magic cookie (4),
/// transaction id (12).
const STUN_HEADER_SIZE: usize = 20;
/// TURN ChannelData header: channel number (2), length (2).
const CHANNEL_DATA_HEADER_SIZE: usize = 4;

/// Presents a reliable byte stream (TCP, TLS) to the TURN client as a
/// packet connection carrying discrete STUN messages and ChannelData
/// frames.
///
/// Reads reassemble exactly one frame per call using the length declared
/// in the frame header; ChannelData frames are padded to a 4-byte
/// boundary on stream transports and the padding is consumed but not
/// returned. Writes ignore the supplied destination, the peer is implicit
/// in the stream.
pub struct StunConn<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> StunConn<S> {
    pub fn new(stream: S, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            local_addr,
            remote_addr,
        }
    }
}

fn is_channel_data(first_byte: u8) -> bool {
    // Channel numbers occupy 0x4000..=0x7FFF, so the two topmost bits of
    // the first byte are 0b01; STUN message types start with 0b00.
    first_byte & 0xc0 == 0x40
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> Conn for StunConn<S> {
    async fn connect(&self, _addr: SocketAddr) -> std::result::Result<(), util::Error> {
        Err(util::Error::Other(
            "connect is not supported on a framed stream".to_owned(),
        ))
    }

    async fn recv(&self, buf: &mut [u8]) -> std::result::Result<usize, util::Error> {
        let (n, _) = self.recv_from(buf).await?;
        Ok(n)
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> std::result::Result<(usize, SocketAddr), util::Error> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; CHANNEL_DATA_HEADER_SIZE];
        reader.read_exact(&mut header).await?;

        let declared_len = usize::from(u16::from_be_bytes([header[2], header[3]]));
        let (frame_len, trailer_len) = if is_channel_data(header[0]) {
            let padded = (declared_len + 3) & !3;
            (
                CHANNEL_DATA_HEADER_SIZE + declared_len,
                padded - declared_len,
            )
        } else {
            (STUN_HEADER_SIZE + declared_len, 0)
        };

        if frame_len > buf.len() {
            return Err(util::Error::ErrBufferShort);
        }

        buf[..CHANNEL_DATA_HEADER_SIZE].copy_from_slice(&header);
        reader
            .read_exact(&mut buf[CHANNEL_DATA_HEADER_SIZE..frame_len])
            .await?;

        if trailer_len > 0 {
            let mut trailer = [0u8; 3];
            reader.read_exact(&mut trailer[..trailer_len]).await?;
        }

        Ok((frame_len, self.remote_addr))
    }

    async fn send(&self, buf: &[u8]) -> std::result::Result<usize, util::Error> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(buf.len())
    }

    async fn send_to(
        &self,
        buf: &[u8],
        _target: SocketAddr,
    ) -> std::result::Result<usize, util::Error> {
        self.send(buf).await
    }

    fn local_addr(&self) -> std::result::Result<SocketAddr, util::Error> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }

    async fn close(&self) -> std::result::Result<(), util::Error> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}
