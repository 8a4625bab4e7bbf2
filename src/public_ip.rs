use crate::error::{Error, Result};
use crate::security_group::BackendFuture;
use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
    "https://ipinfo.io/ip",
];

pub struct EchoResponse {
    pub status: u16,
    pub body: String,
}

/// Fetches the raw reply of an "what is my IP" service.
pub trait EchoClient: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BackendFuture<'a, EchoResponse>;
}

pub struct HttpEchoClient {
    http: reqwest::Client,
}

impl HttpEchoClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport {
                endpoint: "public IP services".to_string(),
                message: format!("failed to initialize HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }
}

impl EchoClient for HttpEchoClient {
    fn get<'a>(&'a self, url: &'a str) -> BackendFuture<'a, EchoResponse> {
        Box::pin(async move {
            let transport_error = |e: reqwest::Error| Error::Transport {
                endpoint: url.to_string(),
                message: e.to_string(),
            };

            let response = self.http.get(url).send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(transport_error)?;

            Ok(EchoResponse { status, body })
        })
    }
}

/// Determines the caller's public address by asking each endpoint in turn.
pub struct PublicIpResolver {
    client: Box<dyn EchoClient>,
    endpoints: Vec<String>,
}

impl PublicIpResolver {
    pub fn new(client: Box<dyn EchoClient>, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    pub fn with_default_endpoints(client: Box<dyn EchoClient>) -> Self {
        Self::new(
            client,
            DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub async fn resolve(&self) -> Result<IpAddr> {
        let mut last_error = String::from("no endpoints configured");

        for endpoint in &self.endpoints {
            match self.try_endpoint(endpoint).await {
                Ok(ip) => {
                    log::info!("Public IP according to {}: {}", endpoint, ip);
                    return Ok(ip);
                }
                Err(reason) => {
                    log::warn!("Could not get public IP from {}: {}", endpoint, reason);
                    last_error = format!("{endpoint}: {reason}");
                }
            }
        }

        Err(Error::PublicIpUnavailable { last_error })
    }

    async fn try_endpoint(&self, endpoint: &str) -> Result<IpAddr, String> {
        let response = self
            .client
            .get(endpoint)
            .await
            .map_err(|e| e.to_string())?;

        if response.status != 200 {
            return Err(format!("HTTP status {}", response.status));
        }

        let body = response.body.trim();
        IpAddr::from_str(body).map_err(|_| format!("'{}' is not an IP address", body))
    }
}

/// Single-host network for an address: `/32` for IPv4, `/128` for IPv6.
pub fn host_cidr(ip: IpAddr) -> IpNet {
    IpNet::from(ip)
}
