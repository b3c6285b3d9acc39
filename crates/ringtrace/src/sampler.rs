//! Root sampling policies.
//!
//! Only root spans consult a sampler; children inherit the decision of their
//! preferred parent.

use crate::config::SamplerConfig;
use crate::span::TagValue;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SAMPLER_TYPE_TAG: &str = "sampler.type";
pub const SAMPLER_PARAM_TAG: &str = "sampler.param";

const WINDOW: usize = 100;

/// What a sampler sees of a root span about to start.
#[derive(Debug, Clone, Copy)]
pub struct SamplingRequest<'a> {
    pub trace_id: &'a str,
    pub operation: &'a str,
    pub tags: &'a BTreeMap<String, TagValue>,
}

/// Sampling decision plus tags to attach to the root span.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplingStatus {
    pub sampled: bool,
    pub tags: BTreeMap<String, TagValue>,
}

/// Trait for root sampling policies.
pub trait Sampler: Send + Sync {
    fn sample(&self, request: &SamplingRequest<'_>) -> SamplingStatus;

    /// Short policy name, used in the `sampler.type` tag.
    fn type_name(&self) -> &str;
}

fn status(sampled: bool, type_name: &str, param: TagValue) -> SamplingStatus {
    let mut tags = BTreeMap::new();
    tags.insert(SAMPLER_TYPE_TAG.to_string(), TagValue::from(type_name));
    tags.insert(SAMPLER_PARAM_TAG.to_string(), param);
    SamplingStatus { sampled, tags }
}

/// Samples exactly `rate` of every 100 consecutive roots.
///
/// The decisions for a window of 100 are a shuffled bitset fixed at
/// construction; an atomic counter walks it.
#[derive(Debug)]
pub struct PercentageSampler {
    rate: u32,
    decisions: [bool; WINDOW],
    counter: AtomicUsize,
}

impl PercentageSampler {
    /// Rates above 100 are clamped.
    pub fn new(rate: u32) -> Self {
        let rate = rate.min(WINDOW as u32);
        let mut decisions = [false; WINDOW];
        for slot in decisions.iter_mut().take(rate as usize) {
            *slot = true;
        }
        decisions.shuffle(&mut rand::thread_rng());
        Self {
            rate,
            decisions,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }
}

impl Sampler for PercentageSampler {
    fn sample(&self, _request: &SamplingRequest<'_>) -> SamplingStatus {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % WINDOW;
        status(
            self.decisions[idx],
            self.type_name(),
            TagValue::Int(i64::from(self.rate)),
        )
    }

    fn type_name(&self) -> &str {
        "percentage"
    }
}

/// Samples everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSampler;

impl Sampler for AlwaysSampler {
    fn sample(&self, _request: &SamplingRequest<'_>) -> SamplingStatus {
        status(true, self.type_name(), TagValue::Bool(true))
    }

    fn type_name(&self) -> &str {
        "const"
    }
}

/// Samples nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSampler;

impl Sampler for NeverSampler {
    fn sample(&self, _request: &SamplingRequest<'_>) -> SamplingStatus {
        status(false, self.type_name(), TagValue::Bool(false))
    }

    fn type_name(&self) -> &str {
        "const"
    }
}

pub fn sampler_from_config(config: &SamplerConfig) -> Arc<dyn Sampler> {
    match config.percentage {
        0 => Arc::new(NeverSampler),
        p if p >= 100 => Arc::new(AlwaysSampler),
        p => Arc::new(PercentageSampler::new(p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tags: &BTreeMap<String, TagValue>) -> SamplingRequest<'_> {
        SamplingRequest {
            trace_id: "t",
            operation: "op",
            tags,
        }
    }

    #[test]
    fn test_percentage_is_exact_per_window() {
        let tags = BTreeMap::new();
        let sampler = PercentageSampler::new(37);

        for _ in 0..3 {
            let sampled = (0..100)
                .filter(|_| sampler.sample(&request(&tags)).sampled)
                .count();
            assert_eq!(sampled, 37);
        }
    }

    #[test]
    fn test_percentage_tags() {
        let tags = BTreeMap::new();
        let status = PercentageSampler::new(250).sample(&request(&tags));

        assert_eq!(status.tags[SAMPLER_TYPE_TAG], TagValue::from("percentage"));
        assert_eq!(status.tags[SAMPLER_PARAM_TAG], TagValue::Int(100));
        assert!(status.sampled);
    }

    #[test]
    fn test_from_config() {
        let tags = BTreeMap::new();
        let never = sampler_from_config(&SamplerConfig { percentage: 0 });
        let always = sampler_from_config(&SamplerConfig { percentage: 100 });
        let partial = sampler_from_config(&SamplerConfig { percentage: 50 });

        assert!(!never.sample(&request(&tags)).sampled);
        assert!(always.sample(&request(&tags)).sampled);
        assert_eq!(partial.type_name(), "percentage");
    }
}
