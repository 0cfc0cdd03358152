/// Measurement endpoints: where a delegated test runs and how far away it is.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use speedtest_types::PingResponse;
use tokio::time::Instant;
use tracing::debug;

use crate::error::SessionError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// An addressable test target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    /// Base URL, no trailing slash.
    pub url: String,
}

/// Discovery and latency probing, as used by a session before it streams.
pub trait EndpointSelector: Send + Sync + 'static {
    /// Pick the endpoint to measure against.
    fn select(&self) -> impl Future<Output = Result<Endpoint, SessionError>> + Send;

    /// Round-trip latency to `endpoint`.
    fn probe(&self, endpoint: &Endpoint) -> impl Future<Output = Result<Duration, SessionError>> + Send;
}

/// A configured peer: `url` or `name=url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: Option<String>,
    pub url: String,
}

impl Peer {
    pub fn parse(entry: &str) -> Option<Peer> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        let (name, url) = match entry.split_once('=') {
            Some((name, url)) if !name.contains('/') && !name.trim().is_empty() => {
                (Some(name.trim().to_string()), url.trim())
            }
            _ => (None, entry),
        };
        let url = url.trim_end_matches('/');
        if url.is_empty() {
            return None;
        }
        Some(Peer {
            name,
            url: url.to_string(),
        })
    }
}

/// Parse a comma-separated peer list, skipping blank entries.
pub fn parse_peers(list: &str) -> Vec<Peer> {
    list.split(',').filter_map(Peer::parse).collect()
}

/// Selects the closest of a fixed set of peer speed-test servers by timing
/// their `/ping` endpoint.
#[derive(Clone)]
pub struct PeerDirectory {
    client: reqwest::Client,
    peers: Vec<Peer>,
    probe_timeout: Duration,
}

impl PeerDirectory {
    pub fn new(client: reqwest::Client, peers: Vec<Peer>, probe_timeout: Duration) -> Self {
        Self {
            client,
            peers,
            probe_timeout,
        }
    }

    async fn ping(&self, url: &str) -> Result<(PingResponse, Duration), String> {
        let started = Instant::now();
        let response = self
            .client
            .get(format!("{}/ping", url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }
        let ping: PingResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok((ping, started.elapsed()))
    }
}

impl EndpointSelector for PeerDirectory {
    async fn select(&self) -> Result<Endpoint, SessionError> {
        if self.peers.is_empty() {
            return Err(SessionError::Discovery(
                "no measurement endpoints configured".into(),
            ));
        }

        let results = join_all(self.peers.iter().map(|peer| async move {
            (peer, self.ping(&peer.url).await)
        }))
        .await;

        let mut best: Option<(Endpoint, Duration)> = None;
        for (peer, result) in results {
            match result {
                Ok((ping, latency)) => {
                    debug!("Peer {} reachable in {:?}", peer.url, latency);
                    if best.as_ref().is_none_or(|(_, l)| latency < *l) {
                        let name = peer.name.clone().unwrap_or_else(|| ping.server_id.clone());
                        best = Some((
                            Endpoint {
                                id: ping.server_id,
                                name,
                                url: peer.url.clone(),
                            },
                            latency,
                        ));
                    }
                }
                Err(e) => debug!("Peer {} unreachable: {}", peer.url, e),
            }
        }

        best.map(|(endpoint, _)| endpoint).ok_or_else(|| {
            SessionError::Discovery(format!(
                "no reachable measurement endpoint ({} tried)",
                self.peers.len()
            ))
        })
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<Duration, SessionError> {
        self.ping(&endpoint.url)
            .await
            .map(|(_, latency)| latency)
            .map_err(|e| SessionError::Probe(format!("{}: {}", endpoint.name, e)))
    }
}

/// The server itself as the only endpoint; pairs with the loopback engine.
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    endpoint: Endpoint,
}

impl LocalEndpoint {
    pub fn new(server_id: impl Into<String>) -> Self {
        let id = server_id.into();
        Self {
            endpoint: Endpoint {
                name: format!("{} (loopback)", id),
                id,
                url: String::new(),
            },
        }
    }
}

impl EndpointSelector for LocalEndpoint {
    async fn select(&self) -> Result<Endpoint, SessionError> {
        Ok(self.endpoint.clone())
    }

    async fn probe(&self, _endpoint: &Endpoint) -> Result<Duration, SessionError> {
        Ok(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 server answering every request with a ping body.
    async fn spawn_ping_server(server_id: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let body = format!(
                        r#"{{"status":"pong","timestamp":1,"server_id":"{}"}}"#,
                        server_id
                    );
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    /// A port with nothing listening on it.
    async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn directory(peers: Vec<Peer>) -> PeerDirectory {
        PeerDirectory::new(reqwest::Client::new(), peers, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn local_endpoint_is_always_available() {
        let local = LocalEndpoint::new("box-1");
        let endpoint = local.select().await.unwrap();
        assert_eq!(endpoint.id, "box-1");
        assert_eq!(local.probe(&endpoint).await.unwrap(), Duration::ZERO);
    }

    #[test]
    fn parses_named_and_bare_peers() {
        let peers = parse_peers(" edge=http://10.0.0.2:8645/ , http://10.0.0.3:8645,, ");
        assert_eq!(
            peers,
            vec![
                Peer {
                    name: Some("edge".into()),
                    url: "http://10.0.0.2:8645".into()
                },
                Peer {
                    name: None,
                    url: "http://10.0.0.3:8645".into()
                },
            ]
        );
    }

    #[test]
    fn equals_sign_in_url_is_not_a_name() {
        let peer = Peer::parse("http://host/path?a=b").unwrap();
        assert_eq!(peer.name, None);
        assert_eq!(peer.url, "http://host/path?a=b");
    }

    #[tokio::test]
    async fn empty_directory_is_a_discovery_failure() {
        let err = directory(vec![]).select().await.unwrap_err();
        assert!(matches!(err, SessionError::Discovery(_)));
    }

    #[tokio::test]
    async fn unreachable_peers_fail_discovery() {
        let err = directory(vec![Peer::parse(&dead_url().await).unwrap()])
            .select()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Discovery(_)));
    }

    #[tokio::test]
    async fn selects_reachable_peer_and_names_it() {
        let live = spawn_ping_server("edge-7").await;
        let peers = vec![
            Peer::parse(&dead_url().await).unwrap(),
            Peer::parse(&format!("Edge Seven={}", live)).unwrap(),
        ];
        let dir = directory(peers);

        let endpoint = dir.select().await.unwrap();
        assert_eq!(endpoint.id, "edge-7");
        assert_eq!(endpoint.name, "Edge Seven");
        assert_eq!(endpoint.url, live);

        let latency = dir.probe(&endpoint).await.unwrap();
        assert!(latency < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn probe_failure_is_reported_as_probe() {
        let endpoint = Endpoint {
            id: "gone".into(),
            name: "gone".into(),
            url: dead_url().await,
        };
        let err = directory(vec![]).probe(&endpoint).await.unwrap_err();
        assert!(matches!(err, SessionError::Probe(_)));
    }
}
