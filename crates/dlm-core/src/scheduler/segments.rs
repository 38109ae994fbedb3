//! Segment-count selection (§4.5 invariant: segments partition `[0,
//! total_size)` exactly when resumable and size is known; otherwise a
//! single open-ended segment).

use crate::config::EngineConfig;
use crate::model::Segment;

/// Adaptive count within `[min_segments, max_segments]`, further capped by
/// the job's own `max_connections` and by `total_size` itself (never split
/// a file into more segments than bytes).
pub(super) fn choose_segment_count(total_size: u64, max_connections: usize, cfg: &EngineConfig) -> usize {
    let by_hint = (total_size / cfg.segment_size_hint_bytes.max(1)).max(1) as usize;
    let n = by_hint.clamp(cfg.min_segments.max(1), cfg.max_segments.max(1));
    n.min(max_connections.max(1)).min(total_size.max(1) as usize)
}

/// Builds the frozen segment set for a job once Probe has run (§4.5: "the
/// set of segments is frozen at job admission").
pub(super) fn plan_segments(total_size: Option<u64>, resumable: bool, max_connections: usize, cfg: &EngineConfig) -> Vec<Segment> {
    match (resumable, total_size) {
        (true, Some(size)) if size > 0 => {
            let count = choose_segment_count(size, max_connections, cfg);
            let base = size / count as u64;
            let remainder = size % count as u64;
            let mut segments = Vec::with_capacity(count);
            let mut start = 0u64;
            for i in 0..count {
                let extra = if (i as u64) < remainder { 1 } else { 0 };
                let end = start + base + extra;
                segments.push(Segment::new_range(i, start, end));
                start = end;
            }
            segments
        }
        // Unknown size or non-resumable: exactly one open-ended segment
        // (end == 0 is the sentinel the Worker reads as "no upper bound").
        _ => vec![Segment::new_range(0, 0, 0)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        let mut c = EngineConfig::default();
        c.min_segments = 4;
        c.max_segments = 16;
        c.segment_size_hint_bytes = 1024;
        c
    }

    #[test]
    fn plan_segments_partitions_exactly_with_no_overlap() {
        let segments = plan_segments(Some(10_000), true, 8, &cfg());
        let total: u64 = segments.iter().map(|s| s.range_len()).sum();
        assert_eq!(total, 10_000);
        for w in segments.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments.last().unwrap().end, 10_000);
    }

    #[test]
    fn plan_segments_single_open_ended_when_not_resumable() {
        let segments = plan_segments(Some(10_000), false, 8, &cfg());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end, 0);
    }

    #[test]
    fn plan_segments_single_open_ended_when_size_unknown() {
        let segments = plan_segments(None, true, 8, &cfg());
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn choose_segment_count_never_exceeds_max_connections() {
        let n = choose_segment_count(100_000_000, 2, &cfg());
        assert!(n <= 2);
    }

    #[test]
    fn choose_segment_count_never_exceeds_total_size() {
        let n = choose_segment_count(3, 8, &cfg());
        assert!(n <= 3);
    }
}
