//! Channel throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)
//!     MESSAGES=5000000  Messages per phase

use std::env;
use std::hint;
use std::time::Instant;

use courier::{Broker, ChannelConfig, ChannelPair, PopError, PushError};

const PAYLOAD_SIZE: usize = 64;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(cpu: usize) {
    core_affinity::set_for_current(core_affinity::CoreId { id: cpu });
}

fn bench_throughput(messages: usize, producer_cpu: usize, consumer_cpu: usize) {
    let ChannelPair {
        mut producer,
        mut consumer,
    } = Broker::instance()
        .request_channel(
            "bench-throughput",
            ChannelConfig {
                capacity: 65_536,
                max_message_size: PAYLOAD_SIZE,
            },
        )
        .expect("create channel");

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        let mut received = 0usize;
        while received < messages {
            match consumer.try_pop() {
                Ok(msg) => {
                    debug_assert_eq!(msg.len(), PAYLOAD_SIZE);
                    received += 1;
                }
                Err(PopError::Empty) => hint::spin_loop(),
                Err(e) => panic!("consumer failed after {received} messages: {e}"),
            }
        }
    });

    pin_to_cpu(producer_cpu);
    let payload = [0x5Au8; PAYLOAD_SIZE];
    let start = Instant::now();
    for _ in 0..messages {
        loop {
            match producer.try_push(&payload) {
                Ok(()) => break,
                Err(PushError::QueueFull) => hint::spin_loop(),
                Err(e) => panic!("producer failed: {e}"),
            }
        }
    }
    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let rate = messages as f64 / elapsed.as_secs_f64();
    println!(
        "throughput: {messages} messages of {PAYLOAD_SIZE} B in {elapsed:.2?} ({rate:.0} msgs/s)"
    );
}

fn bench_round_trip(messages: usize, producer_cpu: usize, consumer_cpu: usize) {
    let broker = Broker::instance();
    let forward = broker
        .request_channel(
            "bench-rtt-forward",
            ChannelConfig {
                capacity: 8,
                max_message_size: PAYLOAD_SIZE,
            },
        )
        .expect("create forward channel");
    let backward = broker
        .request_channel(
            "bench-rtt-backward",
            ChannelConfig {
                capacity: 8,
                max_message_size: PAYLOAD_SIZE,
            },
        )
        .expect("create backward channel");

    let (mut ping_tx, mut pong_rx) = (forward.producer, backward.consumer);
    let (mut pong_tx, mut ping_rx) = (backward.producer, forward.consumer);

    let echo_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        for _ in 0..messages {
            let payload = loop {
                match ping_rx.try_pop() {
                    Ok(msg) => break msg.to_owned_message(),
                    Err(PopError::Empty) => hint::spin_loop(),
                    Err(e) => panic!("echo receive failed: {e}"),
                }
            };
            while push_is_full(pong_tx.try_push(payload.data())) {
                hint::spin_loop();
            }
        }
    });

    pin_to_cpu(producer_cpu);
    let payload = [0xA5u8; PAYLOAD_SIZE];
    let start = Instant::now();
    for _ in 0..messages {
        while push_is_full(ping_tx.try_push(&payload)) {
            hint::spin_loop();
        }
        loop {
            match pong_rx.try_pop() {
                Ok(msg) => {
                    debug_assert_eq!(msg.len(), PAYLOAD_SIZE);
                    break;
                }
                Err(PopError::Empty) => hint::spin_loop(),
                Err(e) => panic!("pong receive failed: {e}"),
            }
        }
    }
    let elapsed = start.elapsed();
    echo_thread.join().unwrap();

    let ns_per_rtt = elapsed.as_nanos() as f64 / messages as f64;
    println!("round-trip: {messages} echoes in {elapsed:.2?} ({ns_per_rtt:.0} ns/rtt)");
}

fn push_is_full(result: Result<(), PushError>) -> bool {
    match result {
        Ok(()) => false,
        Err(PushError::QueueFull) => true,
        Err(e) => panic!("push failed: {e}"),
    }
}

fn main() {
    courier::init_tracing();

    let messages = env_usize("MESSAGES", 5_000_000);
    let producer_cpu = env_usize("PRODUCER_CPU", 0);
    let consumer_cpu = env_usize("CONSUMER_CPU", 2);

    println!("pinning producer to CPU {producer_cpu}, consumer to CPU {consumer_cpu}");
    bench_throughput(messages, producer_cpu, consumer_cpu);
    bench_round_trip(messages / 50, producer_cpu, consumer_cpu);
}
