use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use penny_protocol::discovery::{DISCOVERY_PACKET_LEN, DISCOVERY_RESPONSE};
use penny_protocol::IpDiscovery;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::SdkError;

/// Address and port as seen from the other side of the NAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAddress {
    pub ip: String,
    pub port: u16,
}

/// UDP socket towards the voice server's media endpoint.
pub(crate) struct VoiceUdp {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    remote_ip: String,
}

impl VoiceUdp {
    /// Bind an ephemeral local port for traffic to `ip:port`.
    pub(crate) async fn bind(ip: &str, port: u16) -> Result<Self, SdkError> {
        let remote = tokio::net::lookup_host((ip, port))
            .await?
            .next()
            .ok_or_else(|| {
                SdkError::Transport(format!("voice server address {ip}:{port} did not resolve"))
            })?;

        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;

        debug!("[UDP] Bound {} for voice server {}", socket.local_addr()?, remote);

        Ok(Self {
            socket: Arc::new(socket),
            remote,
            remote_ip: ip.to_string(),
        })
    }

    /// Send one discovery request and wait for the server to echo our
    /// external address back.
    pub(crate) async fn discover(
        &self,
        ssrc: u32,
        deadline: Duration,
    ) -> Result<ExternalAddress, SdkError> {
        let request = IpDiscovery::request(ssrc, &self.remote_ip, self.remote.port()).encode()?;
        self.socket.send_to(&request, self.remote).await?;
        debug!("[UDP] Sent IP discovery for ssrc={} to {}", ssrc, self.remote);

        let response = tokio::time::timeout(deadline, self.recv_discovery())
            .await
            .map_err(|_| SdkError::HandshakeTimeout("IP discovery response"))??;

        debug!("[UDP] External address {}:{}", response.address, response.port);

        Ok(ExternalAddress {
            ip: response.address,
            port: response.port,
        })
    }

    async fn recv_discovery(&self) -> Result<IpDiscovery, SdkError> {
        let mut buf = [0u8; DISCOVERY_PACKET_LEN * 2];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if from != self.remote {
                trace!("[UDP] Ignoring {} bytes from {}", len, from);
                continue;
            }

            match IpDiscovery::decode(&buf[..len]) {
                Ok(packet) if packet.packet_type == DISCOVERY_RESPONSE => return Ok(packet),
                Ok(packet) => {
                    trace!("[UDP] Ignoring discovery packet of type {}", packet.packet_type);
                }
                Err(e) => warn!("[UDP] Dropping malformed discovery response: {}", e),
            }
        }
    }

    /// Drain incoming media until `cancel` fires. Packets are only counted;
    /// this engine does not decode audio.
    pub(crate) fn spawn_receiver(&self, cancel: CancellationToken) {
        let socket = self.socket.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let mut received: u64 = 0;

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, from)) => {
                            received += 1;
                            trace!("[UDP] {} bytes from {}", len, from);
                        }
                        Err(e) => {
                            error!("[UDP] Receive error: {}", e);
                            break;
                        }
                    }
                }
            }

            debug!("[UDP] Receiver stopped after {} datagrams", received);
        });
    }
}
