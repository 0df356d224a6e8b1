// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Message-transport seam. The stream protocol only assumes "send a packet
// from an endpoint" and "have inbound packets for a port delivered to a
// sink"; framing, addressing and routing belong to the transport.
//
// `MemTransport` is an in-process loopback used by tests and the demo: it
// records every sent packet and lets the caller (or an installed responder
// standing in for the remote processor) deliver packets back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::proto::Packet;

/// Receives inbound packets for one registered port.
///
/// `deliver` may run on any thread, concurrently with client calls, and
/// must not block on anything a client thread holds while waiting.
pub trait PacketSink: Send + Sync {
    fn deliver(&self, pkt: &Packet);
}

/// A registered port. Dropping it deregisters the port.
pub trait Endpoint: Send + Sync {
    fn port(&self) -> u32;
    fn send(&self, pkt: &Packet) -> Result<()>;
}

/// Registration/dispatch layer the protocol sits on.
pub trait Transport: Send + Sync {
    /// Register `port`; inbound packets for it go to `sink` for as long as
    /// the returned endpoint lives and the sink is alive.
    fn register(&self, port: u32, sink: Weak<dyn PacketSink>) -> Result<Box<dyn Endpoint>>;
}

// ---------------------------------------------------------------------------
// MemTransport
// ---------------------------------------------------------------------------

/// Produces the remote side's replies to one sent packet.
pub type Responder = dyn Fn(u32, &Packet) -> Vec<Packet> + Send + Sync;

struct PortEntry {
    sink: Weak<dyn PacketSink>,
    sent: Vec<Packet>,
}

#[derive(Default)]
struct MemInner {
    ports: Mutex<BTreeMap<u32, PortEntry>>,
    /// Every packet ever sent, in order, with its source port.
    log: Mutex<Vec<(u32, Packet)>>,
    responder: Mutex<Option<Arc<Responder>>>,
    fail_sends: AtomicBool,
}

/// In-process loopback transport.
#[derive(Clone, Default)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

impl MemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a responder. Its replies are delivered to the sending port
    /// synchronously, on the sending thread, after the send is recorded.
    pub fn set_responder<F>(&self, f: F)
    where
        F: Fn(u32, &Packet) -> Vec<Packet> + Send + Sync + 'static,
    {
        *self.inner.responder.lock() = Some(Arc::new(f));
    }

    pub fn clear_responder(&self) {
        *self.inner.responder.lock() = None;
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::Release);
    }

    /// Deliver `pkt` to `port` as if it came from the remote side.
    /// Returns `false` when nobody is listening.
    pub fn deliver(&self, port: u32, pkt: &Packet) -> bool {
        let sink = {
            let ports = self.inner.ports.lock();
            match ports.get(&port) {
                Some(e) => e.sink.clone(),
                None => return false,
            }
        };
        match sink.upgrade() {
            Some(s) => {
                s.deliver(pkt);
                true
            }
            None => false,
        }
    }

    /// Packets sent from `port` so far.
    pub fn sent(&self, port: u32) -> Vec<Packet> {
        self.inner.ports.lock().get(&port).map(|e| e.sent.clone()).unwrap_or_default()
    }

    /// Every packet sent from any port, oldest first.
    pub fn sent_log(&self) -> Vec<(u32, Packet)> {
        self.inner.log.lock().clone()
    }

    /// Last packet sent from `port`.
    pub fn last_sent(&self, port: u32) -> Option<Packet> {
        self.inner.ports.lock().get(&port).and_then(|e| e.sent.last().cloned())
    }

    pub fn is_registered(&self, port: u32) -> bool {
        self.inner.ports.lock().contains_key(&port)
    }

    pub fn registered_ports(&self) -> Vec<u32> {
        self.inner.ports.lock().keys().copied().collect()
    }
}

impl Transport for MemTransport {
    fn register(&self, port: u32, sink: Weak<dyn PacketSink>) -> Result<Box<dyn Endpoint>> {
        let mut ports = self.inner.ports.lock();
        if ports.contains_key(&port) {
            return Err(Error::Transport(format!("port {port:#x} already registered")));
        }
        ports.insert(port, PortEntry { sink, sent: Vec::new() });
        Ok(Box::new(MemEndpoint { port, inner: Arc::clone(&self.inner) }))
    }
}

struct MemEndpoint {
    port: u32,
    inner: Arc<MemInner>,
}

impl Endpoint for MemEndpoint {
    fn port(&self) -> u32 {
        self.port
    }

    fn send(&self, pkt: &Packet) -> Result<()> {
        if self.inner.fail_sends.load(Ordering::Acquire) {
            return Err(Error::Transport(format!("send from port {:#x} refused", self.port)));
        }
        let sink = {
            let mut ports = self.inner.ports.lock();
            let entry = ports
                .get_mut(&self.port)
                .ok_or_else(|| Error::Transport(format!("port {:#x} not registered", self.port)))?;
            entry.sent.push(pkt.clone());
            entry.sink.clone()
        };
        self.inner.log.lock().push((self.port, pkt.clone()));

        let responder = self.inner.responder.lock().clone();
        if let Some(respond) = responder {
            let replies = respond(self.port, pkt);
            if let Some(s) = sink.upgrade() {
                for r in &replies {
                    s.deliver(r);
                }
            }
        }
        Ok(())
    }
}

impl Drop for MemEndpoint {
    fn drop(&mut self) {
        self.inner.ports.lock().remove(&self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl PacketSink for Count {
        fn deliver(&self, _pkt: &Packet) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sink(c: &Arc<Count>) -> Weak<dyn PacketSink> {
        Arc::downgrade(c) as Weak<dyn PacketSink>
    }

    #[test]
    fn port_is_exclusive_until_endpoint_drops() {
        let t = MemTransport::new();
        let c = Arc::new(Count::default());
        let ep = t.register(0x101, sink(&c)).unwrap();
        assert!(t.register(0x101, sink(&c)).is_err());
        drop(ep);
        assert!(!t.is_registered(0x101));
        assert!(t.register(0x101, sink(&c)).is_ok());
    }

    #[test]
    fn responder_replies_land_on_sender() {
        let t = MemTransport::new();
        t.set_responder(|port, pkt| vec![Packet::basic_result(pkt.token, pkt.opcode, port)]);
        let c = Arc::new(Count::default());
        let ep = t.register(0x201, sink(&c)).unwrap();
        ep.send(&Packet::new(1, 2, vec![])).unwrap();
        assert_eq!(c.0.load(Ordering::Relaxed), 1);
        assert_eq!(t.sent(0x201).len(), 1);
        assert_eq!(t.sent_log()[0].0, 0x201);
    }

    #[test]
    fn dead_sink_is_not_delivered() {
        let t = MemTransport::new();
        let c = Arc::new(Count::default());
        let _ep = t.register(0x301, sink(&c)).unwrap();
        drop(c);
        assert!(!t.deliver(0x301, &Packet::new(1, 0, vec![])));
    }
}
