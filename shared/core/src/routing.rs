use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Expert assignments recorded for one token at sampling time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRouting {
    pub experts: Vec<u32>,
}

impl TokenRouting {
    pub fn new(experts: Vec<u32>) -> Self {
        Self { experts }
    }
}

/// One entry per training-time token position; `None` marks positions with
/// no recorded routing (prompt tokens in legacy traces).
pub type AlignedRouting = Vec<Option<TokenRouting>>;

/// Re-indexes a sampling-time routing trace onto training-time token
/// positions.
///
/// Two trace shapes exist: "echo" traces cover the full token sequence and
/// pass through unchanged; "legacy" traces cover only the completion, i.e.
/// `model_input_len - (prompt_len - 1)` entries, and get the prompt
/// positions filled with empty markers. A trace matching neither length is
/// aligned best-effort along the legacy path with a diagnostic warning;
/// this path is lenient, not an error.
///
/// The output always has exactly `model_input_len` entries. No trace, no
/// alignment: routing replay is skipped for that example.
pub fn align_routing_trace(
    trace: Option<&[TokenRouting]>,
    prompt_len: usize,
    model_input_len: usize,
) -> Option<AlignedRouting> {
    let trace = trace?;

    if trace.len() == model_input_len {
        return Some(trace.iter().cloned().map(Some).collect());
    }

    let prompt_pad = prompt_len.saturating_sub(1);
    let expected_legacy = model_input_len.saturating_sub(prompt_pad);
    if trace.len() != expected_legacy {
        warn!(
            trace_len = trace.len(),
            expected_legacy,
            model_input_len,
            "routing trace length matches neither echo nor legacy layout, aligning best-effort"
        );
    }

    let mut aligned: AlignedRouting = Vec::with_capacity(model_input_len);
    aligned.extend(std::iter::repeat_with(|| None).take(prompt_pad));
    aligned.extend(trace.iter().cloned().map(Some));
    aligned.resize(model_input_len, None);
    Some(aligned)
}

/// Routing traces keyed by the completion that produced them. A trace is
/// consumed by exactly one training example, so reads are take-semantics.
#[derive(Debug, Default)]
pub struct RoutingTraceStore {
    traces: HashMap<String, Vec<TokenRouting>>,
}

impl RoutingTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, completion_id: impl Into<String>, trace: Vec<TokenRouting>) {
        let completion_id = completion_id.into();
        if self.traces.insert(completion_id.clone(), trace).is_some() {
            warn!(%completion_id, "replacing unconsumed routing trace");
        }
    }

    /// Removes and returns the trace for a completion. A second take for the
    /// same completion returns `None`.
    pub fn take(&mut self, completion_id: &str) -> Option<Vec<TokenRouting>> {
        self.traces.remove(completion_id)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn trace(len: usize) -> Vec<TokenRouting> {
        (0..len as u32).map(|i| TokenRouting::new(vec![i])).collect()
    }

    #[test]
    fn test_absent_trace_skips_alignment() {
        assert_eq!(align_routing_trace(None, 3, 7), None);
    }

    #[test]
    fn test_full_length_trace_passes_through() {
        let t = trace(7);
        let aligned = align_routing_trace(Some(&t), 3, 7).unwrap();
        assert_eq!(aligned.len(), 7);
        assert_eq!(
            aligned,
            t.into_iter().map(Some).collect::<AlignedRouting>()
        );
    }

    #[test]
    fn test_legacy_trace_left_pads_prompt() {
        // completion trace of 5 tokens, prompt of 3, full input of 7
        let t = trace(5);
        let aligned = align_routing_trace(Some(&t), 3, 7).unwrap();
        assert_eq!(aligned.len(), 7);
        assert_eq!(&aligned[..2], &[None, None]);
        for (i, entry) in aligned[2..].iter().enumerate() {
            assert_eq!(entry.as_ref().unwrap().experts, vec![i as u32]);
        }
    }

    #[rstest]
    #[case(1, 1)]
    #[case(1, 8)]
    #[case(3, 7)]
    #[case(7, 7)]
    #[case(5, 32)]
    fn test_aligned_length_invariant(#[case] prompt_len: usize, #[case] model_input_len: usize) {
        for trace_len in [0usize, 1, 3, model_input_len, model_input_len + 4] {
            let t = trace(trace_len);
            let aligned = align_routing_trace(Some(&t), prompt_len, model_input_len).unwrap();
            assert_eq!(
                aligned.len(),
                model_input_len,
                "trace_len={trace_len} prompt_len={prompt_len}"
            );
        }
    }

    #[test]
    fn test_overlong_mismatched_trace_truncates() {
        let t = trace(10);
        let aligned = align_routing_trace(Some(&t), 3, 7).unwrap();
        assert_eq!(aligned.len(), 7);
        // prompt pad then as much of the trace as fits
        assert_eq!(&aligned[..2], &[None, None]);
        assert_eq!(aligned[2].as_ref().unwrap().experts, vec![0]);
    }

    #[test]
    fn test_store_consumes_exactly_once() {
        let mut store = RoutingTraceStore::new();
        store.insert("c-1", trace(4));
        assert_eq!(store.len(), 1);
        assert_eq!(store.take("c-1").unwrap().len(), 4);
        assert_eq!(store.take("c-1"), None);
        assert!(store.is_empty());
    }
}
