//! Shared helpers for integration tests: a scripted stand-in for the DCSS
//! sequencer and settings pointed at it.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use dcss_dhs::config::{DcssSettings, DhsSettings, Settings};
use dcss_dhs::protocol::{self, FRAME_SIZE};

/// One accepted DHS connection, driven from the sequencer's side.
pub struct MockDcss {
    socket: TcpStream,
}

impl MockDcss {
    /// Accept the DHS's connection.
    pub async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("DHS did not connect in time")
            .expect("accept failed");
        Self { socket }
    }

    /// Send one message to the DHS.
    pub async fn send(&mut self, text: &str) {
        let frame = protocol::encode_frame(text).expect("test message too long");
        self.socket
            .write_all(&frame)
            .await
            .expect("write to DHS failed");
    }

    /// Receive the next message from the DHS.
    pub async fn expect(&mut self) -> String {
        let mut frame = [0u8; FRAME_SIZE];
        timeout(Duration::from_secs(5), self.socket.read_exact(&mut frame))
            .await
            .expect("no message from DHS in time")
            .expect("read from DHS failed");
        protocol::decode_frame(&frame).expect("malformed frame from DHS")
    }
}

/// Settings aimed at a mock sequencer on the loopback interface.
pub fn test_settings(port: u16, shutdown_grace: Duration) -> Settings {
    Settings {
        dcss: DcssSettings {
            host: "127.0.0.1".to_string(),
            port,
        },
        dhs: DhsSettings {
            name: Some("simDHS".to_string()),
            shutdown_grace,
            reconnect_delay: Duration::from_millis(100),
            ..Default::default()
        },
    }
}
