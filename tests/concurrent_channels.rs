//! Stress tests: many channels, many threads, one broker.

use std::thread;
use std::time::Duration;

use courier::{Broker, ChannelConfig, ChannelPair, PopError, PushError, Timeout};

fn unique_name(tag: &str) -> String {
    let nonce: u32 = rand::random();
    format!("stress-{tag}-{}-{nonce}", std::process::id())
}

#[test]
fn many_channels_in_parallel() {
    const CHANNELS: usize = 16;
    const MESSAGES: u32 = 2_000;

    let mut workers = Vec::new();
    for channel_index in 0..CHANNELS {
        let ChannelPair {
            mut producer,
            mut consumer,
        } = Broker::instance()
            .request_channel(
                &unique_name(&format!("parallel-{channel_index}")),
                ChannelConfig {
                    capacity: 32,
                    max_message_size: 64,
                },
            )
            .unwrap();

        let sender = thread::spawn(move || {
            for i in 0..MESSAGES {
                let payload = (channel_index as u32 ^ i).to_le_bytes();
                loop {
                    match producer.try_push(&payload) {
                        Ok(()) => break,
                        Err(PushError::QueueFull) => std::hint::spin_loop(),
                        Err(e) => panic!("channel {channel_index} push failed: {e}"),
                    }
                }
            }
        });

        let receiver = thread::spawn(move || {
            for i in 0..MESSAGES {
                loop {
                    match consumer.try_pop() {
                        Ok(msg) => {
                            let mut bytes = [0u8; 4];
                            bytes.copy_from_slice(msg.data());
                            assert_eq!(
                                u32::from_le_bytes(bytes),
                                channel_index as u32 ^ i,
                                "channel {channel_index} message {i} out of order"
                            );
                            break;
                        }
                        Err(PopError::Empty) => std::hint::spin_loop(),
                        Err(e) => panic!("channel {channel_index} pop failed: {e}"),
                    }
                }
            }
        });

        workers.push(sender);
        workers.push(receiver);
    }

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn concurrent_channel_creation_is_exclusive() {
    const THREADS: usize = 8;
    let name = unique_name("create-race");

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let name = name.clone();
        handles.push(thread::spawn(move || {
            Broker::instance()
                .request_channel(&name, ChannelConfig::default())
                .is_ok()
        }));
    }

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&ok| ok)
        .count();
    assert_eq!(successes, 1, "exactly one thread may win the name");
}

#[test]
fn blocking_consumers_all_wake_on_shutdown_signal() {
    // Producers dropped from another thread must wake every parked
    // consumer; none may sleep forever.
    const CHANNELS: usize = 8;

    let mut consumers = Vec::new();
    let mut producers = Vec::new();
    for i in 0..CHANNELS {
        let pair = Broker::instance()
            .request_channel(&unique_name(&format!("wake-{i}")), ChannelConfig::default())
            .unwrap();
        producers.push(pair.producer);
        consumers.push(pair.consumer);
    }

    let waiters: Vec<_> = consumers
        .into_iter()
        .map(|mut consumer| {
            thread::spawn(move || {
                let result = consumer.blocking_pop(Timeout::Infinite);
                assert_eq!(result.unwrap_err(), PopError::Closed);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    drop(producers);

    for waiter in waiters {
        waiter.join().unwrap();
    }
}

#[test]
fn interleaved_reserve_and_push_under_load() {
    let ChannelPair {
        mut producer,
        mut consumer,
    } = Broker::instance()
        .request_channel(
            &unique_name("interleave"),
            ChannelConfig {
                capacity: 16,
                max_message_size: 128,
            },
        )
        .unwrap();

    const ROUNDS: u32 = 5_000;

    let sender = thread::spawn(move || {
        for i in 0..ROUNDS {
            let payload = i.to_le_bytes();
            if i % 2 == 0 {
                loop {
                    match producer.reserve(payload.len()) {
                        Some(mut grant) => {
                            grant[..payload.len()].copy_from_slice(&payload);
                            assert!(grant.commit(payload.len()));
                            break;
                        }
                        None => std::hint::spin_loop(),
                    }
                }
            } else {
                loop {
                    match producer.try_push(&payload) {
                        Ok(()) => break,
                        Err(PushError::QueueFull) => std::hint::spin_loop(),
                        Err(e) => panic!("push failed: {e}"),
                    }
                }
            }
        }
    });

    for i in 0..ROUNDS {
        loop {
            match consumer.try_pop() {
                Ok(msg) => {
                    assert_eq!(msg.data(), i.to_le_bytes());
                    break;
                }
                Err(PopError::Empty) => std::hint::spin_loop(),
                Err(e) => panic!("pop failed: {e}"),
            }
        }
    }

    sender.join().unwrap();
}
