//! Event loop driving a notifier and a received packet ledger.
//!
//! A simulated device thread "receives" datagrams out of order and reports one read
//! completion per datagram. The event loop wakes on the notifier, feeds each datagram
//! into the ledger and prints the ack frame once everything arrived.
//!
//! Run:
//! - cargo run -p iowarp --example completion_demo
//! - RUST_LOG=trace cargo run -p iowarp --example completion_demo

use std::{thread, time::Duration};

use crossbeam_channel::{select, unbounded};
use iowarp::prelude::*;
use tracing_subscriber::EnvFilter;

const HANDLE: RawHandle = RawHandle(0xd00d);

/// Arrival order of the simulated datagrams; 4 and 9 never arrive.
const ARRIVALS: [u64; 8] = [1, 2, 5, 3, 6, 8, 7, 10];

fn entropy_of(packet: u64) -> u8 {
    (packet as u8).wrapping_mul(0x9d)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::default();
    let clock = SystemClock;
    let mut notifier = Notifier::with_config(&config);
    notifier.set_handle(HANDLE);
    notifier.set_enabled(true)?;
    let wakeups = notifier.wake_receiver();

    // The device layer tells the loop which datagram each operation read.
    let (datagram_sender, datagrams) = unbounded();
    let port = notifier.completion_port();
    let device = thread::spawn(move || -> iowarp::Result<()> {
        for (index, packet) in ARRIVALS.into_iter().enumerate() {
            thread::sleep(Duration::from_millis(15));
            let _ = datagram_sender.send((OperationToken(index), packet));
            port.post_completion(HANDLE, 1200, 0, OperationToken(index))?;
        }
        Ok(())
    });

    let mut ledger = ReceivedPacketLedger::new(&config);
    let mut completed = 0;
    while completed < ARRIVALS.len() {
        select! {
            recv(wakeups) -> _ => {
                if let Some(record) = notifier.process_wakeup() {
                    completed += 1;
                    let datagram = datagrams.try_iter().find(|(token, _)| *token == record.token);
                    match datagram {
                        Some((_, packet)) => {
                            ledger.record_receipt(packet, entropy_of(packet), clock.now());
                            println!(
                                "[read] {} bytes={} packet={} fresh_loss={}",
                                record.token,
                                record.bytes_transferred,
                                packet,
                                ledger.has_new_missing_packets()
                            );
                        }
                        None => eprintln!("completion {} has no datagram", record.token),
                    }
                }
            }
            default(Duration::from_secs(3)) => {
                eprintln!("no completion for 3s, giving up");
                break;
            }
        }
    }

    if let Err(err) = device.join().map_err(|_| "device thread panicked")? {
        eprintln!("device error: {}", err);
    }

    let frame = ledger.populate_ack_frame(clock.now());
    println!(
        "[ack] largest={} entropy={:#04x} missing={:?} delta={:?}",
        frame.largest_observed,
        frame.entropy_hash,
        frame.missing_ranges(),
        frame.delta_time_largest_observed
    );
    let stats = ledger.stats();
    println!(
        "[stats] received={} reordered={} max_reordering={} max_delay={:?}",
        stats.packets_received,
        stats.packets_reordered,
        stats.max_sequence_reordering,
        stats.max_time_reordering
    );
    Ok(())
}
