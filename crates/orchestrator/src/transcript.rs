//! Transcript aggregation: fragments arrive in any order and possibly more
//! than once, the stored transcript stays ordered and duplicate-free.

use callbridge_core::TranscriptEntry;

/// Insert `fragment` at its timestamp position.
///
/// Returns `false` without touching the transcript when an identical
/// utterance (speaker, timestamp, text) is already present. Ties on
/// timestamp keep arrival order.
pub fn insert_fragment(transcript: &mut Vec<TranscriptEntry>, mut fragment: TranscriptEntry) -> bool {
    if transcript.iter().any(|e| e.same_utterance(&fragment)) {
        return false;
    }

    fragment.arrival_seq = transcript
        .iter()
        .map(|e| e.arrival_seq + 1)
        .max()
        .unwrap_or(0);

    let key = (fragment.timestamp, fragment.arrival_seq);
    let position = transcript.partition_point(|e| (e.timestamp, e.arrival_seq) <= key);
    transcript.insert(position, fragment);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::Speaker;
    use chrono::{Duration, Utc};

    #[test]
    fn test_out_of_order_fragments_sorted_by_timestamp() {
        let t0 = Utc::now();
        let mut transcript = Vec::new();

        insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Agent, "one", t0 + Duration::seconds(1)));
        insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Agent, "three", t0 + Duration::seconds(3)));
        insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Caller, "two", t0 + Duration::seconds(2)));

        let texts: Vec<_> = transcript.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_duplicate_fragment_is_dropped() {
        let t0 = Utc::now();
        let mut transcript = Vec::new();
        let fragment = TranscriptEntry::new(Speaker::Caller, "hello", t0);

        assert!(insert_fragment(&mut transcript, fragment.clone()));
        assert!(!insert_fragment(&mut transcript, fragment));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let t0 = Utc::now();
        let mut transcript = Vec::new();

        insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Agent, "first", t0));
        insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Caller, "second", t0));
        insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Agent, "earlier", t0 - Duration::seconds(1)));

        let texts: Vec<_> = transcript.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["earlier", "first", "second"]);
        assert_eq!(transcript[2].arrival_seq, 1);
    }

    #[test]
    fn test_same_text_different_speaker_is_kept() {
        let t0 = Utc::now();
        let mut transcript = Vec::new();

        assert!(insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Agent, "ok", t0)));
        assert!(insert_fragment(&mut transcript, TranscriptEntry::new(Speaker::Caller, "ok", t0)));
        assert_eq!(transcript.len(), 2);
    }
}
