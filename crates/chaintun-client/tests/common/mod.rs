//! Scriptable in-memory transport for driving a tunnel in tests

#![allow(dead_code)]

use async_trait::async_trait;
use chaintun_client::{HopSpec, TunnelConfig};
use chaintun_transport::{
    Accepted, RemoteListener, SecureSession, SessionConnector, TransportError, TransportResult,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(String),
    ConnectVia { parent: String, host: String },
    Listen { host: String, addr: String },
    CloseListener(String),
    CloseSession(String),
}

pub enum Incoming {
    Stream(DuplexStream, String),
    Error(String),
}

#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    first_hop_dials: Arc<Mutex<Vec<Instant>>>,
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn first_hop_dials(&self) -> Vec<Instant> {
        self.first_hop_dials.lock().unwrap().clone()
    }

    /// Hosts dialed (directly or nested), in order
    pub fn dialed_hosts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Connect(host) => Some(host),
                Event::ConnectVia { host, .. } => Some(host),
                _ => None,
            })
            .collect()
    }

    pub fn closed_sessions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::CloseSession(host) => Some(host),
                _ => None,
            })
            .collect()
    }
}

type IncomingSlot = Arc<Mutex<Option<mpsc::UnboundedReceiver<Incoming>>>>;

pub struct MockConnector {
    recorder: Recorder,
    failing_hosts: HashSet<String>,
    hanging_hosts: HashSet<String>,
    refuse_listen: bool,
    hang_listen: bool,
    incoming: IncomingSlot,
}

impl MockConnector {
    pub fn new() -> (Self, Recorder, mpsc::UnboundedSender<Incoming>) {
        let recorder = Recorder::default();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                recorder: recorder.clone(),
                failing_hosts: HashSet::new(),
                hanging_hosts: HashSet::new(),
                refuse_listen: false,
                hang_listen: false,
                incoming: Arc::new(Mutex::new(Some(rx))),
            },
            recorder,
            tx,
        )
    }

    pub fn fail_host(mut self, host: &str) -> Self {
        self.failing_hosts.insert(host.to_string());
        self
    }

    /// Dialing this host never completes
    pub fn hang_host(mut self, host: &str) -> Self {
        self.hanging_hosts.insert(host.to_string());
        self
    }

    pub fn refuse_listen(mut self) -> Self {
        self.refuse_listen = true;
        self
    }

    /// Listener requests never complete
    pub fn hang_listen(mut self) -> Self {
        self.hang_listen = true;
        self
    }

    async fn dial(&self, hop: &HopSpec) -> TransportResult<MockSession> {
        if self.hanging_hosts.contains(hop.host()) {
            std::future::pending::<()>().await;
        }
        if self.failing_hosts.contains(hop.host()) {
            return Err(TransportError::ConnectionFailed(format!(
                "{}: connection refused",
                hop.host_port()
            )));
        }
        Ok(MockSession {
            host: hop.host().to_string(),
            recorder: self.recorder.clone(),
            refuse_listen: self.refuse_listen,
            hang_listen: self.hang_listen,
            incoming: self.incoming.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, hop: &HopSpec) -> TransportResult<Self::Session> {
        self.recorder.push(Event::Connect(hop.host().to_string()));
        self.recorder
            .first_hop_dials
            .lock()
            .unwrap()
            .push(Instant::now());
        self.dial(hop).await
    }

    async fn connect_via(
        &self,
        parent: &Self::Session,
        hop: &HopSpec,
    ) -> TransportResult<Self::Session> {
        self.recorder.push(Event::ConnectVia {
            parent: parent.host.clone(),
            host: hop.host().to_string(),
        });
        if parent.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        self.dial(hop).await
    }
}

pub struct MockSession {
    host: String,
    recorder: Recorder,
    refuse_listen: bool,
    hang_listen: bool,
    incoming: IncomingSlot,
    closed: AtomicBool,
}

#[async_trait]
impl SecureSession for MockSession {
    type Listener = MockListener;

    async fn listen(&self, addr: &str) -> TransportResult<Self::Listener> {
        self.recorder.push(Event::Listen {
            host: self.host.clone(),
            addr: addr.to_string(),
        });
        if self.hang_listen {
            std::future::pending::<()>().await;
        }
        if self.refuse_listen {
            return Err(TransportError::ForwardRejected(addr.to_string()));
        }
        // Later runs get a listener that is already closed
        let incoming = self.incoming.lock().unwrap().take().unwrap_or_else(|| {
            let (_, rx) = mpsc::unbounded_channel();
            rx
        });
        Ok(MockListener {
            addr: addr.to_string(),
            recorder: self.recorder.clone(),
            incoming,
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.recorder.push(Event::CloseSession(self.host.clone()));
        }
    }
}

impl MockSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockListener {
    addr: String,
    recorder: Recorder,
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl RemoteListener for MockListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> TransportResult<Option<Accepted<Self::Stream>>> {
        match self.incoming.recv().await {
            Some(Incoming::Stream(stream, peer)) => Ok(Some(Accepted { stream, peer })),
            Some(Incoming::Error(msg)) => Err(TransportError::ProtocolError(msg)),
            None => Ok(None),
        }
    }

    fn listen_addr(&self) -> &str {
        &self.addr
    }

    async fn close(&mut self) {
        self.incoming.close();
        self.recorder.push(Event::CloseListener(self.addr.clone()));
    }
}

pub fn config(hops: &[&str], target: &str) -> TunnelConfig {
    let mut builder = TunnelConfig::builder()
        .target(target)
        .remote_listen_addr("localhost:2222");
    for hop in hops {
        builder = builder.via(*hop);
    }
    builder.build().expect("valid test config")
}

pub fn three_hops() -> Vec<&'static str> {
    vec!["alice@bastion:22", "bob@middle:22", "carol@inner:22"]
}
