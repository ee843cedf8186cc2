use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, warn};

use crate::error::{CameraError, Result};
use crate::session::{PortReserver, PublicAddressResolver};

pub const DEFAULT_IP_ECHO_URLS: &[&str] = &[
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ifconfig.me/ip",
];

/// Asks plain-text IP echo services, in order, for the caller's public
/// address.
pub struct HttpPublicAddressResolver {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpPublicAddressResolver {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| CameraError::AddressResolution(err.to_string()))?;
        Ok(Self { client, urls })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_IP_ECHO_URLS.iter().map(|u| u.to_string()).collect())
    }

    async fn query(&self, url: &str) -> std::result::Result<IpAddr, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| err.to_string())?;
        let text = response.text().await.map_err(|err| err.to_string())?;
        text.trim()
            .parse::<IpAddr>()
            .map_err(|err| format!("unparseable address {:?}: {err}", text.trim()))
    }
}

#[async_trait]
impl PublicAddressResolver for HttpPublicAddressResolver {
    async fn resolve(&self) -> Result<IpAddr> {
        let mut failures = Vec::new();
        for url in &self.urls {
            match self.query(url).await {
                Ok(address) => {
                    debug!(url = %url, address = %address, "public address resolved");
                    return Ok(address);
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "public address lookup failed");
                    failures.push(format!("{url}: {err}"));
                }
            }
        }
        Err(CameraError::AddressResolution(failures.join("; ")))
    }
}

pub struct LocalPortReserver {
    bind_address: IpAddr,
}

impl LocalPortReserver {
    pub fn new(bind_address: IpAddr) -> Self {
        Self { bind_address }
    }
}

impl Default for LocalPortReserver {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[async_trait]
impl PortReserver for LocalPortReserver {
    async fn bind_random(&self) -> Result<(UdpSocket, u16)> {
        let socket = UdpSocket::bind((self.bind_address, 0)).await?;
        let port = socket.local_addr()?.port();
        Ok((socket, port))
    }

    async fn find_unused_port(&self) -> Result<u16> {
        // the port is free again once the listener drops; another process
        // may still claim it before the caller binds
        let listener = TcpListener::bind((self.bind_address, 0)).await?;
        Ok(listener.local_addr()?.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_random_returns_bound_port() {
        let reserver = LocalPortReserver::new(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let (socket, port) = reserver.bind_random().await.expect("bind");

        assert_ne!(port, 0);
        assert_eq!(socket.local_addr().expect("local addr").port(), port);
    }

    #[tokio::test]
    async fn two_reservations_get_distinct_ports() {
        let reserver = LocalPortReserver::new(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let (_video, video_port) = reserver.bind_random().await.expect("bind video");
        let (_audio, audio_port) = reserver.bind_random().await.expect("bind audio");

        assert_ne!(video_port, audio_port);
    }
}
