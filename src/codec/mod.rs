// MIT License - Copyright (c) 2026 Peter Wright
// Frame codec: grammar nodes, checksummed frames and stream framing

pub mod bits;
pub mod framing;
pub mod grammar;
pub mod value;

use bytes::Bytes;

use crate::codec::grammar::{Context, Grammar};
use crate::codec::value::{Record, Value};
use crate::error::FrameError;

/// Largest frame the panel sends or accepts, checksum included.
pub const MAX_FRAME_LEN: usize = 255;

/// Sum of all bytes modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Whether the last byte of `frame` is the checksum of the rest.
pub fn verify_checksum(frame: &[u8]) -> Result<(), FrameError> {
    let Some((&actual, body)) = frame.split_last() else {
        return Err(FrameError::Truncated { needed: 1, available: 0 });
    };
    let expected = checksum(body);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// A complete frame schema: every byte except the trailing checksum.
#[derive(Debug, Clone)]
pub struct FrameDef {
    pub name: &'static str,
    pub grammar: Grammar,
}

impl FrameDef {
    pub fn new(name: &'static str, grammar: Grammar) -> Self {
        Self { name, grammar }
    }

    /// Verify the checksum and decode all fields.
    pub fn parse(&self, frame: &[u8]) -> Result<Record, FrameError> {
        verify_checksum(frame)?;
        let body = &frame[..frame.len() - 1];
        let mut ctx = Context {
            frame_len: frame.len(),
            length_at: None,
        };
        let (value, used) = self.grammar.parse(body, &mut ctx)?;
        if used != body.len() {
            return Err(FrameError::LengthMismatch {
                declared: used + 1,
                actual: frame.len(),
            });
        }
        match value {
            Some(Value::Record(rec)) => Ok(rec),
            _ => Ok(Record::new()),
        }
    }

    /// Encode `fields`, fill in the length byte if the schema has one, and
    /// append the checksum.
    pub fn build(&self, fields: &Record) -> Result<Bytes, FrameError> {
        let mut ctx = Context::default();
        let mut out = Vec::with_capacity(self.grammar.size().unwrap_or(64) + 1);
        self.grammar
            .build(Some(&Value::Record(fields.clone())), &mut out, &mut ctx)?;
        let total = out.len() + 1;
        if total > MAX_FRAME_LEN {
            return Err(FrameError::LengthMismatch {
                declared: MAX_FRAME_LEN,
                actual: total,
            });
        }
        if let Some(at) = ctx.length_at {
            out[at] = total as u8;
        }
        out.push(checksum(&out));
        Ok(Bytes::from(out))
    }

    /// Frame size when the schema is fixed-length.
    pub fn size(&self) -> Option<usize> {
        self.grammar.size().map(|s| s + 1)
    }
}
