/// Configured discovery + transfer pair behind the delegated-test routes.

use std::future::Future;
use std::time::Duration;

use futures_util::future::Either;
use speedtest_engine::{
    Endpoint, EndpointSelector, HttpTransferEngine, LocalEndpoint, LoopbackEngine, PeerDirectory,
    SessionError, TransferEngine, TransferError, TransferJob, TransferReport,
};

use crate::config::{Config, EngineKind};

pub enum Selector {
    Peers(PeerDirectory),
    Local(LocalEndpoint),
}

pub enum Engine {
    Http(HttpTransferEngine),
    Loopback(LoopbackEngine),
}

/// Peers over HTTP, or the server itself in loopback mode.
pub fn from_config(config: &Config, client: reqwest::Client) -> (Selector, Engine) {
    match config.engine {
        EngineKind::Http => (
            Selector::Peers(PeerDirectory::new(
                client.clone(),
                config.peers.clone(),
                config.probe_timeout,
            )),
            Engine::Http(HttpTransferEngine::new(client)),
        ),
        EngineKind::Loopback => (
            Selector::Local(LocalEndpoint::new(config.server_id.clone())),
            Engine::Loopback(LoopbackEngine),
        ),
    }
}

impl EndpointSelector for Selector {
    async fn select(&self) -> Result<Endpoint, SessionError> {
        match self {
            Self::Peers(peers) => peers.select().await,
            Self::Local(local) => local.select().await,
        }
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<Duration, SessionError> {
        match self {
            Self::Peers(peers) => peers.probe(endpoint).await,
            Self::Local(local) => local.probe(endpoint).await,
        }
    }
}

impl TransferEngine for Engine {
    fn run(
        &self,
        job: TransferJob,
    ) -> impl Future<Output = Result<TransferReport, TransferError>> + Send + 'static {
        match self {
            Self::Http(engine) => Either::Left(engine.run(job)),
            Self::Loopback(engine) => Either::Right(engine.run(job)),
        }
    }
}
