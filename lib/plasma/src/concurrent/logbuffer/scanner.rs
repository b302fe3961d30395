use crate::concurrent::bits::align;
use crate::concurrent::logbuffer::frames;
use crate::concurrent::AtomicBuffer;
use crate::protocol::frame::{self, FrameHeader};

/// Consumer-side scan: dispatches committed data frames from `offset`,
/// skipping padding, stopping at the first uncommitted slot, the term end or
/// the frame limit. Returns the frames dispatched and the new scan offset.
/// The term is never mutated.
pub fn read<F: FnMut(&FrameHeader, &[u8])>(
    term: &AtomicBuffer,
    mut offset: u32,
    term_length: u32,
    limit: usize,
    mut handler: F,
) -> (usize, u32) {
    let mut count = 0;

    while count < limit && offset < term_length {
        let frame_length = frames::length_volatile(term, offset as usize);
        if frame_length == 0 {
            break;
        }

        let aligned = align(frame_length as usize, frame::FRAME_ALIGNMENT) as u32;

        if !frames::is_padding(term, offset as usize) {
            if let Ok(header) = FrameHeader::decode(term.bytes(offset as usize, frame::BASE_HEADER_LENGTH)) {
                let payload = term.bytes(
                    offset as usize + frame::HEADER_LENGTH,
                    frame_length as usize - frame::HEADER_LENGTH,
                );
                handler(&header, payload);
                count += 1;
            }
        }

        offset += aligned;
    }

    (count, offset)
}

/// Sender-side scan: the number of contiguous committed bytes available from
/// `offset`, keeping frames whole and staying within `max_bytes`. The block
/// is transmitted verbatim, padding frames included, so receivers stay
/// offset-aligned with the sender.
pub fn available(term: &AtomicBuffer, offset: u32, max_bytes: u32, term_length: u32) -> u32 {
    let mut sum = 0u32;

    loop {
        if offset + sum >= term_length {
            break;
        }

        let frame_length = frames::length_volatile(term, (offset + sum) as usize);
        if frame_length == 0 {
            break;
        }

        let aligned = align(frame_length as usize, frame::FRAME_ALIGNMENT) as u32;
        if sum + aligned > max_bytes {
            break;
        }

        sum += aligned;
    }

    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::logbuffer::{LogAppender, LogBuffers};

    fn filled_log(dir: &tempfile::TempDir, messages: &[&[u8]]) -> LogBuffers {
        let log = LogBuffers::create(dir.path().join("log"), 64 * 1024, 0, 4096).unwrap();
        let appender = LogAppender::new(&log, 1, 10);
        for message in messages {
            appender.append(message);
        }
        log
    }

    #[test]
    fn test_read_stops_at_uncommitted() {
        let dir = tempfile::tempdir().unwrap();
        let log = filled_log(&dir, &[b"one", b"two"]);

        let mut seen = Vec::new();
        let (count, offset) = read(&log.term(0), 0, 64 * 1024, 10, |_, payload| {
            seen.push(payload.to_vec())
        });

        assert_eq!(count, 2);
        assert_eq!(offset, 128);
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);

        // Nothing further is committed.
        let (count, offset) = read(&log.term(0), offset, 64 * 1024, 10, |_, _| {});
        assert_eq!(count, 0);
        assert_eq!(offset, 128);
    }

    #[test]
    fn test_read_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let log = filled_log(&dir, &[b"one", b"two", b"three"]);

        let mut seen = 0;
        let (count, offset) = read(&log.term(0), 0, 64 * 1024, 2, |_, _| seen += 1);

        assert_eq!(count, 2);
        assert_eq!(seen, 2);
        assert_eq!(offset, 128);
    }

    #[test]
    fn test_available_bounded_by_mtu() {
        let dir = tempfile::tempdir().unwrap();
        let log = filled_log(&dir, &[&[0u8; 1000], &[0u8; 1000], &[0u8; 1000]]);

        // Each message is a 1032 byte frame, 1056 aligned.
        let term = log.term(0);
        assert_eq!(available(&term, 0, 4096, 64 * 1024), 3 * 1056);
        assert_eq!(available(&term, 0, 2200, 64 * 1024), 2 * 1056);
        assert_eq!(available(&term, 0, 1000, 64 * 1024), 0);
    }

    #[test]
    fn test_available_stops_at_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = filled_log(&dir, &[b"only"]);

        assert_eq!(available(&log.term(0), 0, 4096, 64 * 1024), 64);
        assert_eq!(available(&log.term(0), 64, 4096, 64 * 1024), 0);
    }
}
