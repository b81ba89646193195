// MIT License - Copyright (c) 2026 Peter Wright
// Splits the serial byte stream into checksummed frames

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::watch;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::codec::{checksum, MAX_FRAME_LEN};
use crate::error::ParadoxError;
use crate::event::ConnectionState;

/// Size of every frame on fixed-length panels, and of handshake frames on all panels.
pub const FIXED_FRAME_LEN: usize = 37;

/// Smallest variable-length frame: header, length and checksum.
const MIN_FRAME_LEN: usize = 3;

/// Longest reply of any short command class.
const SHORT_REPLY_LEN: usize = FIXED_FRAME_LEN;

/// Longest memory read reply: six header bytes, 64 data bytes, checksum.
const MEMORY_REPLY_LEN: usize = 71;

/// Largest length a panel frame of `command` may declare, or `None` when the
/// panel never sends that command class in variable mode.
fn max_declared_len(command: u8) -> Option<usize> {
    match command {
        0x1 | 0x3 | 0x4 | 0x7 | 0xD => Some(SHORT_REPLY_LEN),
        0x5 => Some(MEMORY_REPLY_LEN),
        0xE => Some(MAX_FRAME_LEN),
        _ => None,
    }
}

/// Shared switch between fixed and variable frame sizing.
///
/// The coordinator flips it once login identifies the panel family; the
/// reader task's codec observes it on the next frame.
#[derive(Debug, Clone, Default)]
pub struct FramingMode {
    variable: Arc<AtomicBool>,
}

impl FramingMode {
    pub fn new(variable: bool) -> Self {
        Self {
            variable: Arc::new(AtomicBool::new(variable)),
        }
    }

    pub fn set_variable(&self, variable: bool) {
        self.variable.store(variable, Ordering::Relaxed);
    }

    pub fn is_variable(&self) -> bool {
        self.variable.load(Ordering::Relaxed)
    }
}

/// Counts of bytes and frames rejected by the framing stage.
#[derive(Debug, Default)]
pub struct FramingStats {
    pub discarded_bytes: AtomicU64,
    pub frames: AtomicU64,
}

/// Decoder for panel frames.
///
/// Garbage before a valid frame is dropped one byte at a time until a
/// candidate with a matching checksum lines up.
pub struct FrameCodec {
    mode: FramingMode,
    stats: Arc<FramingStats>,
    state: Option<watch::Receiver<ConnectionState>>,
}

impl FrameCodec {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            stats: Arc::new(FramingStats::default()),
            state: None,
        }
    }

    /// Attach the coordinator state so rejects are logged with it.
    pub fn with_state(mut self, state: watch::Receiver<ConnectionState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn stats(&self) -> Arc<FramingStats> {
        self.stats.clone()
    }

    /// Length of the frame starting at `buf[0]`, or `None` when no frame can
    /// start there.
    fn candidate_len(&self, buf: &[u8]) -> Option<usize> {
        if !self.mode.is_variable() {
            return Some(FIXED_FRAME_LEN);
        }
        let command = buf[0] >> 4;
        if command == 0x0 || buf[1] == 0xFF {
            return Some(FIXED_FRAME_LEN);
        }
        let declared = usize::from(buf[1]);
        let max = max_declared_len(command)?;
        (MIN_FRAME_LEN..=max).contains(&declared).then_some(declared)
    }

    fn current_state(&self) -> String {
        self.state
            .as_ref()
            .map(|s| s.borrow().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ParadoxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ParadoxError> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }
            let Some(len) = self.candidate_len(src) else {
                debug!(
                    header = %hex::encode(&src[..2]),
                    state = %self.current_state(),
                    "No frame starts here, skipping one byte"
                );
                self.stats.discarded_bytes.fetch_add(1, Ordering::Relaxed);
                src.advance(1);
                continue;
            };
            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }
            let expected = checksum(&src[..len - 1]);
            if expected == src[len - 1] {
                self.stats.frames.fetch_add(1, Ordering::Relaxed);
                let frame = src.split_to(len).freeze();
                debug!("<- {}", hex::encode(&frame));
                return Ok(Some(frame));
            }
            warn!(
                frame = %hex::encode(&src[..len]),
                expected = expected,
                actual = src[len - 1],
                state = %self.current_state(),
                "Checksum mismatch, skipping one byte"
            );
            self.stats.discarded_bytes.fetch_add(1, Ordering::Relaxed);
            src.advance(1);
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ParadoxError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ParadoxError> {
        debug!("-> {}", hex::encode(&item));
        dst.reserve(item.len());
        dst.put(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable() -> FrameCodec {
        FrameCodec::new(FramingMode::new(true))
    }

    #[test]
    fn test_decode_variable_length_frame() {
        let mut codec = variable();
        let mut buf = BytesMut::from(&[0x70, 0x04, 0x10, 0x84, 0x70][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x70, 0x04, 0x10, 0x84]);
        assert_eq!(buf.len(), 1);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let mut codec = variable();
        let mut buf = BytesMut::from(&[0x70, 0x04, 0x10][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0x84]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_skips_garbage() {
        let mut codec = FrameCodec::new(FramingMode::new(false));
        let mut frame = vec![0xE0, 0x14];
        frame.resize(36, 0);
        frame.push(checksum(&frame));
        let mut buf = BytesMut::from(&[0x13][..]);
        buf.extend_from_slice(&frame);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), frame.as_slice());
        assert_eq!(codec.stats().discarded_bytes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_live_event_is_fixed_size() {
        let mut codec = variable();
        let mut frame = vec![0xE2, 0xFF];
        frame.resize(36, 0);
        frame.push(checksum(&frame));
        let mut buf = BytesMut::from(&frame[..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.len(), FIXED_FRAME_LEN);
    }

    #[test]
    fn test_three_byte_reply() {
        let mut codec = variable();
        let mut buf = BytesMut::from(&[0xD0, 0x03, 0xD3, 0x30, 0x03, 0x33][..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), &[0xD0, 0x03, 0xD3]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), &[0x30, 0x03, 0x33]);
    }

    #[test]
    fn test_oversized_length_resyncs_without_waiting() {
        let mut codec = variable();
        // 0x40 cannot declare 200 bytes, and 0xC8 is no reply class.
        let mut buf = BytesMut::from(&[0x40, 0xC8, 0x70, 0x04, 0x10, 0x84][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x70, 0x04, 0x10, 0x84]);
        assert_eq!(codec.stats().discarded_bytes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_memory_reply_length_limit() {
        let mut codec = variable();
        let mut buf = BytesMut::from(&[0x50, 72][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), &[72]);

        let mut frame = vec![0x50, 71, 0x00, 0x00, 0x00, 0x00];
        frame.resize(70, 0x11);
        frame.push(checksum(&frame));
        let mut buf = BytesMut::from(&frame[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 71);
    }

    #[test]
    fn test_fixed_mode_ignores_length_byte() {
        let mut codec = FrameCodec::new(FramingMode::new(false));
        let mut frame = vec![0xE0, 0x14];
        frame.resize(36, 0);
        frame.push(checksum(&frame));
        let mut buf = BytesMut::from(&frame[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), FIXED_FRAME_LEN);
    }
}
