use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, timeout, Duration};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::debug;

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::protocol::{Instruction, SetAngle, StatusLine};

/// Longest line kept while waiting for a newline.
pub(crate) const MAX_LINE_LENGTH: usize = 256;

#[derive(Debug, Default)]
pub struct ServoLineProtocol {
    discarding: bool,
}

impl ServoLineProtocol {
    fn take_line(src: &mut BytesMut, len: usize) -> String {
        let raw = src.split_to(len);
        String::from_utf8_lossy(&raw).trim_end_matches('\r').to_owned()
    }
}

impl Decoder for ServoLineProtocol {
    type Item = StatusLine;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let newline = match src.iter().position(|b| *b == b'\n') {
                Some(position) => position,
                None => {
                    if src.len() > MAX_LINE_LENGTH {
                        debug!(len = src.len(), "dropping overlong line");
                        src.clear();
                        self.discarding = true;
                    }
                    return Ok(None);
                }
            };
            let line = Self::take_line(src, newline);
            src.advance(1);
            if self.discarding {
                // tail of a line that was already dropped
                self.discarding = false;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(StatusLine::parse(&line)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        let len = src.len();
        let line = Self::take_line(src, len);
        if line.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(StatusLine::parse(&line)))
    }
}

impl Encoder<SetAngle> for ServoLineProtocol {
    type Error = LinkError;

    fn encode(&mut self, data: SetAngle, buf: &mut BytesMut) -> Result<()> {
        let msg = data.serialize();
        buf.reserve(msg.len());
        buf.put(msg.as_ref());
        Ok(())
    }
}

#[async_trait]
pub trait FramedDriver: Send {
    async fn send(&mut self, command: SetAngle) -> Result<()>;
    /// Waits for the next line, up to the driver's read timeout.
    async fn receive(&mut self) -> Result<StatusLine>;
    /// Returns a line only if one is already available.
    fn try_receive(&mut self) -> Option<Result<StatusLine>>;
}

pub struct FramedSerialDriver<T = SerialStream> {
    framed_port: Framed<T, ServoLineProtocol>,
    read_timeout: Duration,
}

impl FramedSerialDriver<SerialStream> {
    pub async fn open(port: &str, config: &LinkConfig) -> Result<FramedSerialDriver<SerialStream>> {
        let open_failed = |source: io::Error| LinkError::OpenFailed {
            port: port.to_owned(),
            source,
        };
        let serial_port = tokio_serial::new(port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.io_timeout)
            .open_native_async()
            .map_err(|err| open_failed(err.into()))?;

        sleep(config.settle_delay).await;
        // drop whatever the controller printed while booting
        serial_port
            .clear(ClearBuffer::Input)
            .map_err(|err| open_failed(err.into()))?;

        Ok(FramedSerialDriver::new(serial_port, config.io_timeout))
    }
}

impl<T> FramedSerialDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T, read_timeout: Duration) -> FramedSerialDriver<T> {
        FramedSerialDriver {
            framed_port: Framed::new(io, ServoLineProtocol::default()),
            read_timeout,
        }
    }
}

fn stream_ended() -> LinkError {
    LinkError::ReadFailed(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "serial stream ended",
    ))
}

#[async_trait]
impl<T> FramedDriver for FramedSerialDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, command: SetAngle) -> Result<()> {
        self.framed_port
            .send(command)
            .await
            .map_err(LinkError::into_write_failure)?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<StatusLine> {
        let response = timeout(self.read_timeout, self.framed_port.next())
            .await
            .map_err(|_| LinkError::Timeout)?
            .ok_or_else(stream_ended)?
            .map_err(LinkError::into_read_failure)?;
        Ok(response)
    }

    fn try_receive(&mut self) -> Option<Result<StatusLine>> {
        match self.framed_port.next().now_or_never()? {
            Some(line) => Some(line.map_err(LinkError::into_read_failure)),
            None => Some(Err(stream_ended())),
        }
    }
}
