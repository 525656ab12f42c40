use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use super::command::ReportCommand;
use super::frame::{write_frame, ACK_OK};
use crate::config::split_protocol_address;
use crate::envelope::join_command;
use crate::error::Result;

/// Persistent connection to a controller's report listener
pub struct ReportClient {
    stream: TcpStream,
}

impl ReportClient {
    /// Connect to `tcp://host:port` (or bare `host:port`)
    pub async fn connect(address: &str) -> Result<Self> {
        let (_, addr) = split_protocol_address(address)?;
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Send a raw payload and wait for the ack byte
    pub async fn send(&mut self, payload: &[u8]) -> Result<bool> {
        write_frame(&mut self.stream, payload).await?;
        let ack = self.stream.read_u8().await?;
        Ok(ack == ACK_OK)
    }

    pub async fn report(&mut self, command: ReportCommand, data: &[u8]) -> Result<bool> {
        self.send(&join_command(data, command.as_str())).await
    }

    /// Serialize a value as the data part of a report
    pub async fn report_json<T: serde::Serialize>(
        &mut self,
        command: ReportCommand,
        value: &T,
    ) -> Result<bool> {
        let data = serde_json::to_vec(value)?;
        self.report(command, &data).await
    }
}
