// Test HTTP helpers to avoid hangs: strict client timeouts and no_proxy,
// readiness polling instead of sleeps, and graceful shutdown so servers do
// not linger between tests.
use gateway::app::{AppState, build_router};
use gateway::config::GatewayConfig;
use gateway::event_types::EventType;
use hermod_broker::TopicRepository;
use hermod_log::MemoryLog;
use reqwest::{Client, redirect::Policy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub fn build_test_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(5))
        .no_proxy()
        .redirect(Policy::none())
        .build()
        .expect("build test http client")
}

pub async fn wait_for_listen(addr: SocketAddr) {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        match tokio::net::TcpStream::connect(addr).await {
            Ok(_) => return,
            Err(err) => {
                if Instant::now() >= deadline {
                    panic!("server not ready at {addr}: {err}");
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub log: MemoryLog,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let log = MemoryLog::new(3);
    let client = Arc::new(log.clone());
    let repository = Arc::new(TopicRepository::new(
        client.clone(),
        client,
        config.repository_settings(),
    ));
    let state = AppState::new(repository, config);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = build_router(state.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router.into_make_service());
        let _ = serve
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    wait_for_listen(addr).await;
    TestGateway {
        addr,
        state,
        log,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    }
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Register an event type backed by a fresh topic with the given
    /// partition count; returns the topic name.
    pub fn register_event_type(
        &self,
        name: &str,
        partitions: u32,
        read_scopes: &[&str],
        write_scopes: &[&str],
    ) -> String {
        let topic = format!("{name}-topic");
        self.log.add_topic(topic.clone(), partitions);
        self.state
            .event_types
            .insert(EventType {
                name: name.to_string(),
                topic: topic.clone(),
                read_scopes: read_scopes.iter().map(|scope| scope.to_string()).collect(),
                write_scopes: write_scopes.iter().map(|scope| scope.to_string()).collect(),
            })
            .expect("register event type");
        topic
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
