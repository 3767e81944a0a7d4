#![allow(dead_code)]

use tally::{config::ServiceConfig, server::CounterService};
use tokio::net::TcpListener;

/// A counter service serving on an ephemeral loopback port.
pub struct TestServer {
    pub addr: String,
    pub service: CounterService,
    pub serving: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServiceConfig::default()).await
    }

    pub async fn start_with(config: ServiceConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let service = CounterService::new(config).unwrap();
        let serving = {
            let service = service.clone();
            tokio::spawn(async move { service.serve(listener).await })
        };
        Self {
            addr,
            service,
            serving,
        }
    }

    pub async fn stop(self) {
        self.service.shutdown();
        self.serving.await.unwrap();
    }
}
