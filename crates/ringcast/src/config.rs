/// Configuration for a [`RingBuffer`](crate::RingBuffer).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Requested slot count. Rounded up to the next power of two.
    pub requested_capacity: usize,
    /// Number of consumer cursors gating the producers.
    pub consumers: usize,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with custom settings.
    pub const fn new(requested_capacity: usize, consumers: usize, enable_metrics: bool) -> Self {
        Self {
            requested_capacity,
            consumers,
            enable_metrics,
        }
    }

    /// Returns the capacity of the ring buffer (power of two, at least 2).
    #[inline]
    pub const fn capacity(&self) -> usize {
        let cap = if self.requested_capacity < 2 {
            2
        } else {
            self.requested_capacity
        };
        cap.next_power_of_two()
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requested_capacity: 1024,
            consumers: 1,
            enable_metrics: false,
        }
    }
}
