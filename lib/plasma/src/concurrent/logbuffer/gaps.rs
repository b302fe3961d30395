use crate::concurrent::bits::align;
use crate::concurrent::logbuffer::frames;
use crate::concurrent::AtomicBuffer;
use crate::protocol::frame;

/// A run of missing bytes within a term, as reported in a NAK.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Gap {
    pub term_id: u32,
    pub offset: u32,
    pub length: u32,
}

/// Finds the first gap in `[rebuild_offset, limit_offset)`. Frames start on
/// 32 byte boundaries and unreceived regions are zero, so the scan walks
/// committed frames until a zero length word, then measures the hole in
/// alignment steps up to the next committed frame.
pub fn scan_for_gap(
    term: &AtomicBuffer,
    term_id: u32,
    rebuild_offset: u32,
    limit_offset: u32,
) -> Option<Gap> {
    let mut offset = rebuild_offset;

    while offset < limit_offset {
        let frame_length = frames::length_volatile(term, offset as usize);
        if frame_length == 0 {
            break;
        }
        offset += align(frame_length as usize, frame::FRAME_ALIGNMENT) as u32;
    }

    if offset >= limit_offset {
        return None;
    }

    let gap_start = offset;
    let mut gap_end = offset;

    while gap_end < limit_offset && frames::length_volatile(term, gap_end as usize) == 0 {
        gap_end += frame::FRAME_ALIGNMENT as u32;
    }

    Some(Gap {
        term_id,
        offset: gap_start,
        length: gap_end.min(limit_offset) - gap_start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::logbuffer::rebuilder;
    use crate::concurrent::logbuffer::{LogAppender, LogBuffers};

    fn frames_of(messages: &[&[u8]]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let log = LogBuffers::create(dir.path().join("scratch"), 64 * 1024, 0, 4096).unwrap();
        let appender = LogAppender::new(&log, 1, 10);
        for message in messages {
            appender.append(message);
        }
        let length = log.meta().raw_tail(0) as u32;
        log.term(0).bytes(0, length as usize).to_vec()
    }

    #[test]
    fn test_no_gap_when_contiguous() {
        let packet = frames_of(&[b"a", b"b"]);
        let mut backing = vec![0u8; 64 * 1024];
        let term = AtomicBuffer::wrap(&mut backing);

        let end = rebuilder::insert(&term, 0, &packet);
        assert_eq!(scan_for_gap(&term, 5, 0, end), None);
    }

    #[test]
    fn test_detects_gap_between_frames() {
        let packet = frames_of(&[b"late"]);
        let mut backing = vec![0u8; 64 * 1024];
        let term = AtomicBuffer::wrap(&mut backing);

        // A 64 byte frame lands at 128, leaving [0, 128) missing.
        let hwm = rebuilder::insert(&term, 128, &packet);

        assert_eq!(
            scan_for_gap(&term, 5, 0, hwm),
            Some(Gap {
                term_id: 5,
                offset: 0,
                length: 128,
            })
        );
    }

    #[test]
    fn test_gap_scan_starts_at_rebuild_point() {
        let head = frames_of(&[b"head"]);
        let tail = frames_of(&[b"tail"]);

        let mut backing = vec![0u8; 64 * 1024];
        let term = AtomicBuffer::wrap(&mut backing);

        rebuilder::insert(&term, 0, &head);
        let hwm = rebuilder::insert(&term, 192, &tail);

        assert_eq!(
            scan_for_gap(&term, 5, 0, hwm),
            Some(Gap {
                term_id: 5,
                offset: 64,
                length: 128,
            })
        );
    }

    #[test]
    fn test_gap_to_limit_when_nothing_beyond() {
        let mut backing = vec![0u8; 64 * 1024];
        let term = AtomicBuffer::wrap(&mut backing);

        // High-water mark known to be 96 via a heartbeat, nothing received.
        assert_eq!(
            scan_for_gap(&term, 5, 0, 96),
            Some(Gap {
                term_id: 5,
                offset: 0,
                length: 96,
            })
        );
    }
}
