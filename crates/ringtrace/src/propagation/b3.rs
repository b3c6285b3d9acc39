use super::escape::{escape, escape_leading, unescape};
use super::{CodecError, Propagation};
use crate::context::{SpanContext, ROOT_SPAN_ID};
use std::collections::{BTreeMap, HashMap};

const TRACE_ID: &str = "X-B3-TraceId";
const SPAN_ID: &str = "X-B3-SpanId";
const PARENT_SPAN_ID: &str = "X-B3-ParentSpanId";
const SAMPLED: &str = "X-B3-Sampled";
const BAGGAGE_PREFIX: &str = "baggage-";
const SYS_BAGGAGE_PREFIX: &str = "baggage-sys-";
const SYS_KEY_PREFIX: &str = "sys-";

/// A string key/value carrier such as a header list.
pub trait TextMap {
    fn put(&mut self, key: &str, value: &str);

    /// Entries in carrier order.
    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_>;
}

impl TextMap for Vec<(String, String)> {
    fn put(&mut self, key: &str, value: &str) {
        self.push((key.to_string(), value.to_string()));
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl TextMap for HashMap<String, String> {
    fn put(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl TextMap for BTreeMap<String, String> {
    fn put(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// B3-style header codec.
///
/// Header names match case-insensitively and the first occurrence of a name
/// wins. Sampled accepts `1` or `true`. A business key beginning with `sys-`
/// has its first character hex-encoded so it cannot read back as a system
/// entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct B3HeaderCodec;

fn strip_prefix_ignore_case<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let head = key.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &key[prefix.len()..])
}

impl<C: TextMap> Propagation<C> for B3HeaderCodec {
    fn inject(&self, ctx: &SpanContext, carrier: &mut C) -> Result<(), CodecError> {
        carrier.put(TRACE_ID, ctx.trace_id());
        carrier.put(SPAN_ID, ctx.span_id());
        carrier.put(PARENT_SPAN_ID, ctx.parent_id());
        carrier.put(SAMPLED, if ctx.is_sampled() { "1" } else { "0" });
        for (key, value) in ctx.biz_baggage() {
            let key = if strip_prefix_ignore_case(key, SYS_KEY_PREFIX).is_some() {
                escape_leading(key)
            } else {
                escape(key)
            };
            carrier.put(&format!("{BAGGAGE_PREFIX}{key}"), &escape(value));
        }
        for (key, value) in ctx.sys_baggage() {
            carrier.put(&format!("{SYS_BAGGAGE_PREFIX}{}", escape(key)), &escape(value));
        }
        Ok(())
    }

    fn decode(&self, carrier: &C) -> Result<SpanContext, CodecError> {
        let mut trace_id: Option<&str> = None;
        let mut span_id: Option<&str> = None;
        let mut parent_id: Option<&str> = None;
        let mut sampled: Option<bool> = None;
        let mut biz = BTreeMap::new();
        let mut sys = BTreeMap::new();

        for (key, value) in carrier.entries() {
            if key.eq_ignore_ascii_case(TRACE_ID) {
                trace_id.get_or_insert(value);
            } else if key.eq_ignore_ascii_case(SPAN_ID) {
                span_id.get_or_insert(value);
            } else if key.eq_ignore_ascii_case(PARENT_SPAN_ID) {
                parent_id.get_or_insert(value);
            } else if key.eq_ignore_ascii_case(SAMPLED) {
                sampled.get_or_insert(value == "1" || value.eq_ignore_ascii_case("true"));
            } else if let Some(k) = strip_prefix_ignore_case(key, SYS_BAGGAGE_PREFIX) {
                sys.entry(unescape(k).into_owned())
                    .or_insert_with(|| unescape(value).into_owned());
            } else if let Some(k) = strip_prefix_ignore_case(key, BAGGAGE_PREFIX) {
                biz.entry(unescape(k).into_owned())
                    .or_insert_with(|| unescape(value).into_owned());
            }
        }

        let trace_id = trace_id
            .filter(|t| !t.is_empty())
            .ok_or(CodecError::MissingTraceId)?;
        let mut ctx = SpanContext::new(
            trace_id,
            span_id.filter(|s| !s.is_empty()).unwrap_or(ROOT_SPAN_ID),
            parent_id.unwrap_or_default(),
            sampled.unwrap_or(false),
        );
        for (key, value) in biz {
            ctx.set_baggage_item(key, value);
        }
        for (key, value) in sys {
            ctx.set_sys_baggage_item(key, value);
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_inject_writes_b3_headers() {
        let mut ctx = SpanContext::new("abc", "0.1", "0", true);
        ctx.set_baggage_item("k=1", "v&2");
        ctx.set_sys_baggage_item("mark", "T");

        let mut carrier: Vec<(String, String)> = Vec::new();
        B3HeaderCodec.inject(&ctx, &mut carrier).unwrap();

        assert_eq!(
            carrier,
            headers(&[
                ("X-B3-TraceId", "abc"),
                ("X-B3-SpanId", "0.1"),
                ("X-B3-ParentSpanId", "0"),
                ("X-B3-Sampled", "1"),
                ("baggage-k%3D1", "v%262"),
                ("baggage-sys-mark", "T"),
            ])
        );
    }

    #[test]
    fn test_round_trip() {
        let mut ctx = SpanContext::new("abc", "0.1.4", "0.1", false);
        ctx.set_baggage_item("a%b", "=&=");
        ctx.set_sys_baggage_item("zone", "gz00b");

        let mut carrier: HashMap<String, String> = HashMap::new();
        B3HeaderCodec.inject(&ctx, &mut carrier).unwrap();
        assert_eq!(B3HeaderCodec.decode(&carrier).unwrap(), ctx);
    }

    #[test]
    fn test_business_key_with_sys_prefix_stays_business() {
        let mut ctx = SpanContext::new("abc", "0.2", "0", true);
        ctx.set_baggage_item("sys-region", "eu");
        ctx.set_baggage_item("SYS-zone", "a");
        ctx.set_sys_baggage_item("region", "us");

        let mut carrier: Vec<(String, String)> = Vec::new();
        B3HeaderCodec.inject(&ctx, &mut carrier).unwrap();
        assert!(carrier.contains(&("baggage-%73ys-region".to_string(), "eu".to_string())));
        assert!(carrier.contains(&("baggage-%53YS-zone".to_string(), "a".to_string())));

        let back = B3HeaderCodec.decode(&carrier).unwrap();
        assert_eq!(back.baggage_item("sys-region"), Some("eu"));
        assert_eq!(back.baggage_item("SYS-zone"), Some("a"));
        assert_eq!(back.sys_baggage_item("region"), Some("us"));
        assert_eq!(back, ctx);
    }

    #[test]
    fn test_case_insensitive_first_wins() {
        let carrier = headers(&[
            ("x-b3-traceid", "first"),
            ("X-B3-TRACEID", "second"),
            ("x-b3-sampled", "true"),
            ("Baggage-Sys-mark", "T"),
            ("BAGGAGE-user", "one"),
            ("baggage-user", "two"),
        ]);

        let ctx = B3HeaderCodec.decode(&carrier).unwrap();
        assert_eq!(ctx.trace_id(), "first");
        assert_eq!(ctx.span_id(), ROOT_SPAN_ID);
        assert!(ctx.is_sampled());
        assert!(ctx.is_load_test());
        assert_eq!(ctx.baggage_item("user"), Some("one"));
        assert!(ctx.baggage_item("sys-mark").is_none());
    }

    #[test]
    fn test_missing_trace_id() {
        let carrier = headers(&[("X-B3-SpanId", "0.1"), ("X-B3-Sampled", "1")]);
        assert_eq!(
            B3HeaderCodec.decode(&carrier),
            Err(CodecError::MissingTraceId)
        );
    }

    #[test]
    fn test_unrecognized_sampled_value_is_false() {
        let carrier = headers(&[("X-B3-TraceId", "t"), ("X-B3-Sampled", "yes")]);
        assert!(!B3HeaderCodec.decode(&carrier).unwrap().is_sampled());
    }
}
