// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Playback walk-through against a simulated remote processor.
//
// Usage: RUST_LOG=debug demo_playback
//
// Opens a PCM write stream, sizes a 4 x 1024 input ring, fills it, shows
// the ring running dry, then lets the simulated processor consume buffers
// one by one (write-done) and keeps feeding until a fixed number of blocks
// has been played. Ends with EOS, close and free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use libdspstream::proto::opcode::{self, Format};
use libdspstream::proto::packet::session_port;
use libdspstream::proto::{BasicResult, BusAddr, MediaFormat, Packet, WriteDone};
use libdspstream::{AsmClient, ClientConfig, Direction, Error, Event, EventCallback, MemTransport};
use tracing_subscriber::EnvFilter;

const BUF_SIZE: usize = 1024;
const BUF_COUNT: usize = 4;
const BLOCKS: u64 = 16;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let transport = MemTransport::new();

    // Simulated processor: ack every tracked command, queue write buffers.
    let queued: Arc<Mutex<Vec<(u32, BusAddr)>>> = Arc::new(Mutex::new(Vec::new()));
    let q = Arc::clone(&queued);
    transport.set_responder(move |_port, pkt| match pkt.opcode {
        opcode::DATA_CMD_WRITE => {
            q.lock().push((pkt.token, BusAddr(pkt.word(0))));
            Vec::new()
        }
        op if opcode::is_session_tracked(op) || opcode::is_map_tracked(op) => {
            vec![Packet::basic_result(pkt.token, op, 0)]
        }
        _ => Vec::new(),
    });

    let played = Arc::new(AtomicU64::new(0));
    let p = Arc::clone(&played);
    let callback: EventCallback = Arc::new(move |session: u8, ev: &Event<'_>| match ev {
        Event::WriteDone { index: Some(i), .. } => {
            p.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session, index = i, "played");
        }
        Event::CommandResult(BasicResult { opcode, status }) => {
            tracing::debug!(session, opcode = format_args!("{opcode:#010x}"), status, "ack");
        }
        _ => {}
    });

    let client = AsmClient::new(Arc::new(transport.clone()), ClientConfig::default());
    let session = match client.open_session(Some(callback)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("demo: open_session failed: {e}");
            std::process::exit(1);
        }
    };

    let setup = session
        .open_write(Format::LinearPcm)
        .and_then(|_| session.set_media_format(&MediaFormat::Pcm { sample_rate: 48_000, channels: 2 }))
        .and_then(|_| session.buf_alloc(Direction::In, BUF_SIZE, BUF_COUNT))
        .and_then(|_| session.run(0, 0));
    if let Err(e) = setup {
        eprintln!("demo: stream setup failed: {e}");
        std::process::exit(1);
    }
    println!("session {} open, {} mmap reference(s)", session.id(), client.mmap_ref_count());

    let mut written = 0u64;
    let mut sample = 0u8;
    while played.load(Ordering::Relaxed) < BLOCKS {
        if written < BLOCKS {
            match session.acquire_local(Direction::In) {
                Ok(mut grant) => {
                    grant.data_mut().fill(sample);
                    sample = sample.wrapping_add(1);
                    let index = grant.index();
                    if let Err(e) = session.write(grant, BUF_SIZE as u32, 0, opcode::WRITE_FLAGS_NO_TIMESTAMP) {
                        eprintln!("demo: write failed: {e}");
                        break;
                    }
                    written += 1;
                    println!("wrote block {written} into buffer {index}");
                    continue;
                }
                Err(Error::NotReady) => println!("ring full"),
                Err(e) => {
                    eprintln!("demo: acquire failed: {e}");
                    break;
                }
            }
        }

        // let the processor finish the oldest queued buffer
        let next = {
            let mut q = queued.lock();
            if q.is_empty() { None } else { Some(q.remove(0)) }
        };
        let Some((token, addr)) = next else { break };
        println!("processor returns buffer {token}");
        let done = WriteDone { buf_addr: addr, status: 0 }.to_packet(token);
        transport.deliver(session_port(session.id()), &done);
    }

    println!("played {} blocks", played.load(Ordering::Relaxed));
    if let Err(e) = session.eos().and_then(|_| session.close()) {
        eprintln!("demo: shutdown failed: {e}");
    }
    session.free();
    println!("session freed, {} mmap reference(s)", client.mmap_ref_count());
}
