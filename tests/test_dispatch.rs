// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inbound message handling: what reaches the rings and the callback, and
// what is dropped.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use libdspstream::proto::opcode::{self, *};
use libdspstream::proto::packet::{command_token, MAP_SERVICE_PORT};
use libdspstream::proto::{BusAddr, Packet, ReadDone, WriteDone};
use libdspstream::{AsmClient, ClientConfig, Direction, Event, EventCallback, HeapAllocator, MemTransport, Session};

struct Rig {
    transport: MemTransport,
    client: AsmClient,
    events: Arc<Mutex<Vec<u32>>>,
}

impl Rig {
    fn new() -> Self {
        let transport = MemTransport::new();
        transport.set_responder(|_, pkt| {
            if opcode::is_session_tracked(pkt.opcode) || opcode::is_map_tracked(pkt.opcode) {
                vec![Packet::basic_result(pkt.token, pkt.opcode, 0)]
            } else {
                Vec::new()
            }
        });
        let client = AsmClient::with_allocator(
            Arc::new(transport.clone()),
            ClientConfig::default().with_command_timeout(Duration::from_millis(300)),
            Arc::new(HeapAllocator::new()),
        );
        Self { transport, client, events: Arc::new(Mutex::new(Vec::new())) }
    }

    // Records the opcode behind every event the callback sees.
    fn session(&self) -> Session {
        let ev = Arc::clone(&self.events);
        let cb: EventCallback = Arc::new(move |_session: u8, e: &Event<'_>| {
            let op = match e {
                Event::CommandResult(r) => r.opcode,
                Event::WriteDone { .. } => DATA_EVENT_WRITE_DONE,
                Event::ReadDone { .. } => DATA_EVENT_READ_DONE,
                Event::Eos(p) | Event::ParamResponse(p) | Event::TxOverflow(p) => p.opcode,
            };
            ev.lock().push(op);
        });
        self.client.open_session(Some(cb)).unwrap()
    }

    fn events(&self) -> Vec<u32> {
        self.events.lock().clone()
    }
}

#[test]
fn write_done_with_wrong_address_is_dropped() {
    let rig = Rig::new();
    let s = rig.session();
    s.buf_alloc(Direction::In, 256, 4).unwrap();
    let g0 = s.acquire_local(Direction::In).unwrap();
    let g1 = s.acquire_local(Direction::In).unwrap();
    let (a0, a1) = (g0.bus_addr(), g1.bus_addr());
    s.write(g0, 1, 0, 0).unwrap();
    s.write(g1, 1, 0, 0).unwrap();
    rig.events.lock().clear();

    let before = (s.ring(Direction::In).cursors(), s.ring(Direction::In).outstanding());
    // buffer 1's address with buffer 0's token
    rig.transport.deliver(s.port(), &WriteDone { buf_addr: a1, status: 0 }.to_packet(0));
    // index past the ring
    rig.transport.deliver(s.port(), &WriteDone { buf_addr: a0, status: 0 }.to_packet(9));
    // unknown address
    rig.transport.deliver(s.port(), &WriteDone { buf_addr: BusAddr(0x10), status: 0 }.to_packet(1));
    assert_eq!((s.ring(Direction::In).cursors(), s.ring(Direction::In).outstanding()), before);
    assert!(rig.events().is_empty());

    rig.transport.deliver(s.port(), &WriteDone { buf_addr: a0, status: 0 }.to_packet(0));
    assert_eq!(s.ring(Direction::In).outstanding(), vec![1]);
    assert_eq!(rig.events(), vec![DATA_EVENT_WRITE_DONE]);
}

#[test]
fn duplicate_completion_is_dropped() {
    let rig = Rig::new();
    let s = rig.session();
    s.buf_alloc(Direction::Out, 256, 2).unwrap();
    let g = s.acquire_local(Direction::Out).unwrap();
    let addr = g.bus_addr();
    s.read(g).unwrap();
    rig.events.lock().clear();

    let done = ReadDone { buf_addr: addr, size: 10, ..Default::default() }.to_packet(0);
    rig.transport.deliver(s.port(), &done);
    rig.transport.deliver(s.port(), &done);
    assert_eq!(rig.events(), vec![DATA_EVENT_READ_DONE]);
    assert_eq!(s.ring(Direction::Out).cursors(), Some((1, 1)));
}

#[test]
fn result_for_another_session_is_ignored() {
    let rig = Rig::new();
    let a = rig.session();
    let b = rig.session();
    rig.transport.clear_responder();

    let b2 = Arc::new(b);
    let waiter = Arc::clone(&b2);
    let t = thread::spawn(move || waiter.pause());

    let port_b = b2.port();
    let sent = loop {
        if let Some(p) = rig.transport.last_sent(port_b) {
            break p;
        }
        thread::sleep(Duration::from_millis(5));
    };
    // right sequence, wrong session id in the token
    let forged = (sent.token & !0xFF) | a.id() as u32;
    rig.transport.deliver(port_b, &Packet::basic_result(forged, SESSION_CMD_PAUSE, 0));
    assert!(t.join().unwrap().is_err(), "forged ack must not complete the wait");
    assert!(!rig.events().contains(&SESSION_CMD_PAUSE));
}

#[test]
fn notifications_reach_the_callback() {
    let rig = Rig::new();
    let s = rig.session();
    let port = s.port();

    for op in [DATA_EVENT_EOS, DATA_CMDRSP_EOS, STREAM_CMDRSP_GET_PP_PARAMS, STREAM_CMDRSP_GET_ENCDEC_PARAM, SESSION_EVENT_TX_OVERFLOW] {
        rig.transport.deliver(port, &Packet::new(op, command_token(s.id(), 0), vec![0]));
    }
    assert_eq!(
        rig.events(),
        vec![DATA_EVENT_EOS, DATA_CMDRSP_EOS, STREAM_CMDRSP_GET_PP_PARAMS, STREAM_CMDRSP_GET_ENCDEC_PARAM, SESSION_EVENT_TX_OVERFLOW]
    );
}

#[test]
fn unknown_and_short_messages_are_dropped() {
    let rig = Rig::new();
    let s = rig.session();
    let port = s.port();

    rig.transport.deliver(port, &Packet::new(0x0001_FFFF, 0, vec![1, 2, 3]));
    rig.transport.deliver(port, &Packet::new(BASIC_RSP_RESULT, command_token(s.id(), 1), vec![SESSION_CMD_RUN]));
    rig.transport.deliver(port, &Packet::new(DATA_EVENT_READ_DONE, 0, vec![0, 0]));
    rig.transport.deliver(port, &Packet::new(DATA_EVENT_WRITE_DONE, 0, Vec::new()));
    assert!(rig.events().is_empty());

    // the session still works afterwards
    s.run(0, 0).unwrap();
}

#[test]
fn result_for_untracked_opcode_is_dropped() {
    let rig = Rig::new();
    let s = rig.session();
    rig.transport.deliver(s.port(), &Packet::basic_result(command_token(s.id(), 0), DATA_CMD_WRITE, 0));
    rig.transport.deliver(s.port(), &Packet::basic_result(command_token(s.id(), 0), 0x0001_0E66, 0));
    assert!(rig.events().is_empty());

    // a tracked result still gets through
    s.pause().unwrap();
    assert_eq!(rig.events(), vec![SESSION_CMD_PAUSE]);
}

#[test]
fn map_service_ignores_foreign_traffic() {
    let rig = Rig::new();
    let s = rig.session();

    rig.transport.deliver(MAP_SERVICE_PORT, &Packet::new(DATA_EVENT_EOS, 0, vec![]));
    rig.transport.deliver(MAP_SERVICE_PORT, &Packet::basic_result(0, SESSION_CMD_RUN, 0));
    rig.transport.deliver(MAP_SERVICE_PORT, &Packet::basic_result(command_token(0, 5), SESSION_CMD_MEMORY_MAP, 0));
    s.buf_alloc(Direction::In, 64, 2).unwrap();
}
