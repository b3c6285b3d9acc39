//! RingCast - Bounded Multi-Producer Multicast Ring Buffer
//!
//! A fixed-capacity circular buffer shared by any number of producer threads
//! and a fixed set of consumers. Every consumer observes every published
//! value in one global publish order, which lets a pool of consumer threads
//! split work by key (each consumer handles the keys pinned to it) without a
//! second queue.
//!
//! # Key Features
//!
//! - Power-of-two capacity, slots pre-allocated and overwritten in place
//! - Blocking publish (adaptive backoff) and try publish (reject when full)
//! - Per-consumer cursors, one cursor store per consumed batch
//! - Cache-padded hot fields
//!
//! # Example
//!
//! ```
//! use ringcast::{Config, RingBuffer};
//!
//! let ring = RingBuffer::<u64>::new(Config::new(1024, 1, false));
//! let consumer = ring.consumer(0).unwrap();
//!
//! ring.try_publish(42).unwrap();
//! ring.publish(43).unwrap();
//!
//! let consumed = consumer.consume_all(|seq, item: &u64| {
//!     println!("#{seq}: {item}");
//! });
//! assert_eq!(consumed, 2);
//! ```

mod backoff;
mod config;
mod invariants;
mod metrics;
mod ring;

pub use backoff::Backoff;
pub use config::Config;
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::{Consumer, ConsumerError, PublishError, RingBuffer};
