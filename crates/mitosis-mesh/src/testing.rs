//! Scripted transport doubles shared by the unit tests.

use crate::routing_table::RoutingTable;
use crate::transport::{ConnectionEvent, ConnectionOptions, EventSink, Link, Transport};
use mitosis_core::{Address, ConnectionError, ManualClock, MeshConfig, Message, Protocol};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) type LinkLog = Arc<Mutex<Vec<String>>>;

/// Link that records what its connection asked of it.
#[derive(Debug, Default, Clone)]
pub(crate) struct ScriptedLink {
    pub log: LinkLog,
    pub fail_open: bool,
    pub quality: f64,
}

impl ScriptedLink {
    pub(crate) fn new() -> Self {
        Self {
            quality: 1.0,
            ..Self::default()
        }
    }
}

impl Link for ScriptedLink {
    fn open(&mut self, _options: &ConnectionOptions) -> Result<(), ConnectionError> {
        self.log.lock().push("open".into());
        if self.fail_open {
            return Err(ConnectionError::Transport {
                address: "scripted".into(),
                reason: "refused".into(),
            });
        }
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().push("close".into());
    }

    fn send(&mut self, message: &Message) -> Result<(), ConnectionError> {
        self.log.lock().push(format!("send {}", message.subject()));
        Ok(())
    }

    fn quality(&self) -> f64 {
        self.quality
    }
}

/// Hands out scripted links and remembers which address each one serves.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    pub links: Mutex<Vec<(Address, LinkLog)>>,
    pub refuse: bool,
}

impl ScriptedTransport {
    pub(crate) fn log_for(&self, address: &Address) -> LinkLog {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|(a, _)| a == address)
            .map(|(_, log)| log.clone())
            .unwrap()
    }

    pub(crate) fn sends_on(&self, address: &Address) -> usize {
        self.log_for(address)
            .lock()
            .iter()
            .filter(|entry| entry.starts_with("send"))
            .count()
    }

    pub(crate) fn connects(&self) -> usize {
        self.links.lock().len()
    }
}

impl Transport for ScriptedTransport {
    fn connect(
        &self,
        _local_id: &str,
        address: &Address,
        _sink: EventSink,
    ) -> Result<Box<dyn Link>, ConnectionError> {
        let mut link = ScriptedLink::new();
        link.fail_open = self.refuse;
        self.links.lock().push((address.clone(), link.log.clone()));
        Ok(Box::new(link))
    }
}

/// A routing table for node `me` with a scripted websocket transport.
pub(crate) struct Fixture {
    pub table: RoutingTable,
    pub clock: ManualClock,
    pub transport: Arc<ScriptedTransport>,
    pub _inbox: mpsc::UnboundedReceiver<ConnectionEvent>,
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(ScriptedTransport::default())
}

pub(crate) fn fixture_with(transport: ScriptedTransport) -> Fixture {
    let clock = ManualClock::new(0);
    let (sink, inbox) = mpsc::unbounded_channel();
    let transport = Arc::new(transport);
    let mut table = RoutingTable::new(
        "me",
        Arc::new(MeshConfig::default()),
        Arc::new(clock.clone()),
        sink,
    );
    table.register_transport(Protocol::WebSocket, transport.clone());
    Fixture {
        table,
        clock,
        transport,
        _inbox: inbox,
    }
}

pub(crate) fn ws(peer: &str) -> Address {
    Address::direct(peer, Protocol::WebSocket)
}

/// Open a direct websocket connection from `me` to `peer`.
pub(crate) fn open_direct(f: &mut Fixture, peer: &str) {
    let mut pending = f
        .table
        .connect_to(ws(peer), ConnectionOptions::default())
        .unwrap();
    f.table.handle_opened(&ws(peer));
    assert_eq!(pending.try_result().unwrap().unwrap(), peer);
}
