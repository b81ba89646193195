// MIT License - Copyright (c) 2026 Peter Wright
// Declarative frame grammar: one schema drives both parse and build

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike, Datelike};

use crate::codec::bits::{swap_bits, BitReader, BitWriter};
use crate::codec::value::{Record, Value};
use crate::error::FrameError;

/// A grammar node. Every variant supports `parse`, `build` and `size`.
#[derive(Debug, Clone)]
pub enum Grammar {
    /// Big-endian unsigned integer of 1 to 4 bytes.
    UInt(usize),
    /// Fixed bytes. Verified on parse, emitted on build.
    Const(Vec<u8>),
    Bytes(usize),
    /// Everything up to the end of the body.
    Greedy,
    Padding(usize),
    /// Bit fields spanning whole bytes, MSB-first.
    Bits(Vec<BitField>),
    Struct(Vec<Field>),
    Array(usize, Box<Grammar>),
    DictArray(Box<DictArray>),
    /// One flag per entry, bit order reversed over the whole span.
    FlagArray { count: usize, first_index: u32 },
    /// One 4-bit integer per entry, MSB-first.
    NibbleArray { count: usize, first_index: u32 },
    /// Reverses the byte order of a fixed-size inner grammar.
    ByteSwapped(Box<Grammar>),
    /// Century, year, month, day, hour, minute and optionally second.
    Date { seconds: bool, optional: bool },
    /// `[group, pack, m1, m2]` with the high bits of both minors in `pack`.
    Event,
    PartitionStatus(Box<PartitionStatusLayout>),
    /// One byte scaled to a voltage rounded to 0.1.
    Scaled { factor: f64, offset: f64 },
    /// The 12-byte bit-packed event-log record.
    CompressedEvent,
    /// The frame length byte, filled in by the frame builder.
    Length,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub grammar: Grammar,
}

impl Field {
    /// Names with a leading underscore are parsed but never surfaced.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('_')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitKind {
    Flag,
    Int,
    Padding,
    Const(u64),
}

#[derive(Debug, Clone)]
pub struct BitField {
    pub name: &'static str,
    pub width: usize,
    pub kind: BitKind,
}

#[derive(Debug, Clone)]
pub struct DictArray {
    pub count: usize,
    pub first_index: u32,
    pub record: Grammar,
    /// Surface only this field of each record.
    pub project: Option<&'static str>,
}

/// Bit layout of one partition's status: a 16-bit first half and a 32-bit last half.
#[derive(Debug, Clone)]
pub struct PartitionStatusLayout {
    pub size: usize,
    pub first_half: Vec<BitField>,
    pub last_half: Vec<BitField>,
}

const FIRST_HALF_BYTES: usize = 2;
const LAST_HALF_BYTES: usize = 4;

/// Per-frame state shared by all nodes during one parse or build.
#[derive(Debug, Default)]
pub struct Context {
    /// Total frame length including the checksum.
    pub frame_len: usize,
    /// Offset of the length byte, recorded on build.
    pub length_at: Option<usize>,
}

// --- Constructors ---

pub fn u8() -> Grammar {
    Grammar::UInt(1)
}

pub fn u16() -> Grammar {
    Grammar::UInt(2)
}

pub fn u24() -> Grammar {
    Grammar::UInt(3)
}

pub fn u32() -> Grammar {
    Grammar::UInt(4)
}

pub fn field(name: &'static str, grammar: Grammar) -> Field {
    Field { name, grammar }
}

pub fn structure(fields: Vec<Field>) -> Grammar {
    Grammar::Struct(fields)
}

pub fn bits(fields: Vec<BitField>) -> Grammar {
    Grammar::Bits(fields)
}

pub fn flag(name: &'static str) -> BitField {
    BitField { name, width: 1, kind: BitKind::Flag }
}

pub fn int_bits(name: &'static str, width: usize) -> BitField {
    BitField { name, width, kind: BitKind::Int }
}

pub fn pad_bits(width: usize) -> BitField {
    BitField { name: "_padding", width, kind: BitKind::Padding }
}

pub fn const_bits(name: &'static str, width: usize, value: u64) -> BitField {
    BitField { name, width, kind: BitKind::Const(value) }
}

/// Bit fields from a list of flag names, MSB-first.
pub fn flag_bits(names: &[&'static str]) -> Vec<BitField> {
    names.iter().map(|name| flag(name)).collect()
}

pub fn dict_array(count: usize, first_index: u32, record: Grammar) -> Grammar {
    Grammar::DictArray(Box::new(DictArray { count, first_index, record, project: None }))
}

pub fn projected_dict_array(
    count: usize,
    first_index: u32,
    record: Grammar,
    project: &'static str,
) -> Grammar {
    Grammar::DictArray(Box::new(DictArray {
        count,
        first_index,
        record,
        project: Some(project),
    }))
}

pub fn flag_array(count: usize, first_index: u32) -> Grammar {
    Grammar::FlagArray { count, first_index }
}

impl Grammar {
    /// Static size in bytes, or `None` when it depends on the input.
    pub fn size(&self) -> Option<usize> {
        match self {
            Grammar::UInt(n) | Grammar::Bytes(n) | Grammar::Padding(n) => Some(*n),
            Grammar::Const(bytes) => Some(bytes.len()),
            Grammar::Greedy => None,
            Grammar::Bits(fields) => Some(bit_width(fields).div_ceil(8)),
            Grammar::Struct(fields) => fields.iter().map(|f| f.grammar.size()).sum(),
            Grammar::Array(count, inner) => inner.size().map(|s| s * count),
            Grammar::DictArray(d) => d.record.size().map(|s| s * d.count),
            Grammar::FlagArray { count, .. } => Some(count.div_ceil(8)),
            Grammar::NibbleArray { count, .. } => Some(count.div_ceil(2)),
            Grammar::ByteSwapped(inner) => inner.size(),
            Grammar::Date { seconds, .. } => Some(if *seconds { 7 } else { 6 }),
            Grammar::Event => Some(4),
            Grammar::PartitionStatus(layout) => Some(layout.size),
            Grammar::Scaled { .. } | Grammar::Length => Some(1),
            Grammar::CompressedEvent => Some(12),
        }
    }

    /// Parse from the front of `input`. Returns the value (if any) and bytes consumed.
    pub fn parse(&self, input: &[u8], ctx: &mut Context) -> Result<(Option<Value>, usize), FrameError> {
        if let Some(size) = self.size() {
            if input.len() < size {
                return Err(FrameError::Truncated { needed: size, available: input.len() });
            }
        }
        match self {
            Grammar::UInt(n) => {
                let v = input[..*n].iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                Ok((Some(Value::Int(v)), *n))
            }
            Grammar::Const(expected) => {
                let got = &input[..expected.len()];
                if got != expected.as_slice() {
                    return Err(FrameError::InvalidValue {
                        field: "const".to_string(),
                        details: format!("expected {}, got {}", hex::encode(expected), hex::encode(got)),
                    });
                }
                Ok((None, expected.len()))
            }
            Grammar::Bytes(n) => Ok((Some(Value::Bytes(input[..*n].to_vec())), *n)),
            Grammar::Greedy => Ok((Some(Value::Bytes(input.to_vec())), input.len())),
            Grammar::Padding(n) => Ok((None, *n)),
            Grammar::Bits(fields) => {
                let len = bit_width(fields).div_ceil(8);
                let rec = parse_bits(fields, &input[..len])?;
                Ok((Some(Value::Record(rec)), len))
            }
            Grammar::Struct(fields) => {
                let mut rec = Record::new();
                let mut offset = 0;
                for f in fields {
                    let (value, used) = f.grammar.parse(&input[offset..], ctx).map_err(|e| in_field(f.name, e))?;
                    offset += used;
                    if let (false, Some(value)) = (f.is_hidden(), value) {
                        rec.insert(f.name.to_string(), value);
                    }
                }
                Ok((Some(Value::Record(rec)), offset))
            }
            Grammar::Array(count, inner) => {
                let mut items = Vec::with_capacity(*count);
                let mut offset = 0;
                for _ in 0..*count {
                    let (value, used) = inner.parse(&input[offset..], ctx)?;
                    offset += used;
                    items.push(value.unwrap_or(Value::Int(0)));
                }
                Ok((Some(Value::List(items)), offset))
            }
            Grammar::DictArray(d) => {
                let mut map = BTreeMap::new();
                let mut offset = 0;
                for i in 0..d.count {
                    let (value, used) = d.record.parse(&input[offset..], ctx)?;
                    offset += used;
                    let value = value.unwrap_or(Value::Record(Record::new()));
                    let value = match (d.project, value) {
                        (Some(name), Value::Record(mut rec)) => rec
                            .remove(name)
                            .ok_or_else(|| FrameError::MissingField(name.to_string()))?,
                        (_, value) => value,
                    };
                    map.insert(d.first_index + i as u32, value);
                }
                Ok((Some(Value::Map(map)), offset))
            }
            Grammar::FlagArray { count, first_index } => {
                let len = count.div_ceil(8);
                let swapped = swap_bits(&input[..len]);
                let mut reader = BitReader::new(&swapped);
                let mut map = BTreeMap::new();
                for i in 0..*count {
                    map.insert(first_index + i as u32, Value::Bool(reader.read_flag()?));
                }
                Ok((Some(Value::Map(map)), len))
            }
            Grammar::NibbleArray { count, first_index } => {
                let len = count.div_ceil(2);
                let mut reader = BitReader::new(&input[..len]);
                let mut map = BTreeMap::new();
                for i in 0..*count {
                    map.insert(first_index + i as u32, Value::Int(reader.read(4)?));
                }
                Ok((Some(Value::Map(map)), len))
            }
            Grammar::ByteSwapped(inner) => {
                let len = inner.size().ok_or_else(|| unsized_node("byte_swapped"))?;
                let reversed: Vec<u8> = input[..len].iter().rev().copied().collect();
                let (value, _) = inner.parse(&reversed, ctx)?;
                Ok((value, len))
            }
            Grammar::Date { seconds, .. } => {
                let len = if *seconds { 7 } else { 6 };
                Ok((Some(Value::Time(decode_date(&input[..len])?)), len))
            }
            Grammar::Event => Ok((Some(Value::Record(decode_event(&input[..4]))), 4)),
            Grammar::PartitionStatus(layout) => {
                let map = parse_partition_status(layout, &input[..layout.size])?;
                Ok((Some(Value::Map(map)), layout.size))
            }
            Grammar::Scaled { factor, offset } => {
                let v = f64::from(input[0]) * factor + offset;
                Ok((Some(Value::Float((v * 10.0).round() / 10.0)), 1))
            }
            Grammar::CompressedEvent => {
                Ok((Some(Value::Record(decode_compressed_event(&input[..12])?)), 12))
            }
            Grammar::Length => {
                let declared = usize::from(input[0]);
                if ctx.frame_len != 0 && declared != ctx.frame_len {
                    return Err(FrameError::LengthMismatch { declared, actual: ctx.frame_len });
                }
                Ok((Some(Value::Int(declared as u64)), 1))
            }
        }
    }

    /// Append the encoding of `value` to `out`. A missing value encodes as zero.
    pub fn build(&self, value: Option<&Value>, out: &mut Vec<u8>, ctx: &mut Context) -> Result<(), FrameError> {
        match self {
            Grammar::UInt(n) => {
                let v = match value {
                    Some(v) => v.as_u64().ok_or_else(|| expected("integer", v))?,
                    None => 0,
                };
                if *n < 8 && v >> (n * 8) != 0 {
                    return Err(FrameError::InvalidValue {
                        field: "uint".to_string(),
                        details: format!("{v} does not fit in {n} bytes"),
                    });
                }
                out.extend((0..*n).rev().map(|i| (v >> (i * 8)) as u8));
            }
            Grammar::Const(bytes) => out.extend_from_slice(bytes),
            Grammar::Bytes(n) => match value {
                Some(v) => {
                    let bytes = v.as_bytes().ok_or_else(|| expected("bytes", v))?;
                    if bytes.len() != *n {
                        return Err(FrameError::InvalidValue {
                            field: "bytes".to_string(),
                            details: format!("expected {n} bytes, got {}", bytes.len()),
                        });
                    }
                    out.extend_from_slice(bytes);
                }
                None => out.extend(std::iter::repeat(0).take(*n)),
            },
            Grammar::Greedy => {
                if let Some(v) = value {
                    out.extend_from_slice(v.as_bytes().ok_or_else(|| expected("bytes", v))?);
                }
            }
            Grammar::Padding(n) => out.extend(std::iter::repeat(0).take(*n)),
            Grammar::Bits(fields) => {
                let empty = Record::new();
                let rec = match value {
                    Some(v) => v.as_record().ok_or_else(|| expected("record", v))?,
                    None => &empty,
                };
                out.extend(build_bits(fields, rec)?);
            }
            Grammar::Struct(fields) => {
                let empty = Record::new();
                let rec = match value {
                    Some(v) => v.as_record().ok_or_else(|| expected("record", v))?,
                    None => &empty,
                };
                for f in fields {
                    let child = if f.is_hidden() { None } else { rec.get(f.name) };
                    f.grammar.build(child, out, ctx).map_err(|e| in_field(f.name, e))?;
                }
            }
            Grammar::Array(count, inner) => {
                let items = match value {
                    Some(v) => v.as_list().ok_or_else(|| expected("list", v))?,
                    None => &[],
                };
                for i in 0..*count {
                    inner.build(items.get(i), out, ctx)?;
                }
            }
            Grammar::DictArray(d) => {
                let empty = BTreeMap::new();
                let map = match value {
                    Some(v) => v.as_map().ok_or_else(|| expected("map", v))?,
                    None => &empty,
                };
                for i in 0..d.count {
                    let entry = map.get(&(d.first_index + i as u32));
                    match (d.project, entry) {
                        (Some(name), Some(v)) => {
                            let wrapped = Value::Record(Record::from([(name.to_string(), v.clone())]));
                            d.record.build(Some(&wrapped), out, ctx)?;
                        }
                        (_, entry) => d.record.build(entry, out, ctx)?,
                    }
                }
            }
            Grammar::FlagArray { count, first_index } => {
                let empty = BTreeMap::new();
                let map = match value {
                    Some(v) => v.as_map().ok_or_else(|| expected("map", v))?,
                    None => &empty,
                };
                let mut writer = BitWriter::new();
                for i in 0..*count {
                    let on = map
                        .get(&(first_index + i as u32))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    writer.write_flag(on)?;
                }
                writer.pad(count.div_ceil(8) * 8 - count)?;
                out.extend(swap_bits(&writer.into_bytes()));
            }
            Grammar::NibbleArray { count, first_index } => {
                let empty = BTreeMap::new();
                let map = match value {
                    Some(v) => v.as_map().ok_or_else(|| expected("map", v))?,
                    None => &empty,
                };
                let mut writer = BitWriter::new();
                for i in 0..*count {
                    let v = map.get(&(first_index + i as u32)).and_then(Value::as_u64).unwrap_or(0);
                    writer.write(v, 4)?;
                }
                writer.pad(count.div_ceil(2) * 8 - count * 4)?;
                out.extend(writer.into_bytes());
            }
            Grammar::ByteSwapped(inner) => {
                let mut tmp = Vec::new();
                inner.build(value, &mut tmp, ctx)?;
                out.extend(tmp.iter().rev());
            }
            Grammar::Date { seconds, optional } => {
                let time = match value {
                    Some(Value::Time(t)) => *t,
                    Some(v) => return Err(expected("time", v)),
                    None => None,
                };
                match time {
                    Some(t) => out.extend(encode_date(&t, *seconds)?),
                    None if *optional => out.extend(std::iter::repeat(0).take(if *seconds { 7 } else { 6 })),
                    None => return Err(FrameError::MissingField("time".to_string())),
                }
            }
            Grammar::Event => {
                let empty = Record::new();
                let rec = match value {
                    Some(v) => v.as_record().ok_or_else(|| expected("record", v))?,
                    None => &empty,
                };
                out.extend(encode_event(rec)?);
            }
            Grammar::PartitionStatus(layout) => {
                let empty = BTreeMap::new();
                let map = match value {
                    Some(v) => v.as_map().ok_or_else(|| expected("map", v))?,
                    None => &empty,
                };
                out.extend(build_partition_status(layout, map)?);
            }
            Grammar::Scaled { factor, offset } => {
                let v = match value {
                    Some(v) => v.as_f64().ok_or_else(|| expected("number", v))?,
                    None => *offset,
                };
                let raw = ((v - offset) / factor).round().clamp(0.0, 255.0);
                out.push(raw as u8);
            }
            Grammar::CompressedEvent => {
                let empty = Record::new();
                let rec = match value {
                    Some(v) => v.as_record().ok_or_else(|| expected("record", v))?,
                    None => &empty,
                };
                out.extend(encode_compressed_event(rec)?);
            }
            Grammar::Length => {
                ctx.length_at = Some(out.len());
                out.push(0);
            }
        }
        Ok(())
    }
}

fn bit_width(fields: &[BitField]) -> usize {
    fields.iter().map(|f| f.width).sum()
}

fn parse_bits(fields: &[BitField], data: &[u8]) -> Result<Record, FrameError> {
    let mut reader = BitReader::new(data);
    let mut rec = Record::new();
    for f in fields {
        match f.kind {
            BitKind::Flag => {
                let v = reader.read_flag()?;
                rec.insert(f.name.to_string(), Value::Bool(v));
            }
            BitKind::Int => {
                let v = reader.read(f.width)?;
                rec.insert(f.name.to_string(), Value::Int(v));
            }
            BitKind::Padding => reader.skip(f.width)?,
            BitKind::Const(expected) => {
                let got = reader.read(f.width)?;
                if got != expected {
                    return Err(FrameError::InvalidValue {
                        field: f.name.to_string(),
                        details: format!("expected 0x{expected:x}, got 0x{got:x}"),
                    });
                }
            }
        }
    }
    Ok(rec)
}

fn build_bits(fields: &[BitField], rec: &Record) -> Result<Vec<u8>, FrameError> {
    let mut writer = BitWriter::new();
    for f in fields {
        match f.kind {
            BitKind::Flag => {
                let on = rec.get(f.name).and_then(Value::as_bool).unwrap_or(false);
                writer.write_flag(on)?;
            }
            BitKind::Int => {
                let v = rec.get(f.name).and_then(Value::as_u64).unwrap_or(0);
                writer.write(v, f.width).map_err(|e| in_field(f.name, e))?;
            }
            BitKind::Padding => writer.pad(f.width)?,
            BitKind::Const(v) => writer.write(v, f.width)?,
        }
    }
    let rem = writer.position() % 8;
    if rem != 0 {
        writer.pad(8 - rem)?;
    }
    Ok(writer.into_bytes())
}

/// Decode a 6- or 7-byte panel date. A zero month means "no date".
pub fn decode_date(data: &[u8]) -> Result<Option<NaiveDateTime>, FrameError> {
    if data[2] == 0 {
        return Ok(None);
    }
    let year = i32::from(data[0]) * 100 + i32::from(data[1]);
    let second = data.get(6).copied().unwrap_or(0);
    NaiveDate::from_ymd_opt(year, u32::from(data[2]), u32::from(data[3]))
        .and_then(|d| d.and_hms_opt(u32::from(data[4]), u32::from(data[5]), u32::from(second)))
        .map(Some)
        .ok_or_else(|| FrameError::InvalidValue {
            field: "date".to_string(),
            details: hex::encode(data),
        })
}

pub fn encode_date(t: &NaiveDateTime, seconds: bool) -> Result<Vec<u8>, FrameError> {
    let year = u32::try_from(t.year()).map_err(|_| FrameError::InvalidValue {
        field: "date".to_string(),
        details: format!("year {} before 0", t.year()),
    })?;
    let mut out = vec![
        (year / 100) as u8,
        (year % 100) as u8,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
    ];
    if seconds {
        out.push(t.second() as u8);
    }
    Ok(out)
}

pub fn decode_event(data: &[u8]) -> Record {
    let minor = u64::from(data[2]) + u64::from(data[1] >> 6) * 256;
    let minor2 = u64::from(data[3]) + u64::from((data[1] >> 4) & 0x03) * 256;
    let mut rec = Record::new();
    rec.insert("major".to_string(), Value::Int(u64::from(data[0])));
    rec.insert("minor".to_string(), Value::Int(minor));
    rec.insert("minor2".to_string(), Value::Int(minor2));
    rec.insert("partition".to_string(), Value::Int(u64::from(data[1] & 0x0F)));
    rec
}

pub fn encode_event(rec: &Record) -> Result<Vec<u8>, FrameError> {
    let get = |name: &str| rec.get(name).and_then(Value::as_u64).unwrap_or(0);
    let (major, minor, minor2, partition) = (get("major"), get("minor"), get("minor2"), get("partition"));
    if major > 0xFF || minor > 0x3FF || minor2 > 0x3FF || partition > 0x0F {
        return Err(FrameError::InvalidValue {
            field: "event".to_string(),
            details: format!("major={major} minor={minor} minor2={minor2} partition={partition}"),
        });
    }
    let pack = partition | ((minor >> 8) << 6) | ((minor2 >> 8) << 4);
    Ok(vec![major as u8, pack as u8, minor as u8, minor2 as u8])
}

fn parse_partition_status(
    layout: &PartitionStatusLayout,
    data: &[u8],
) -> Result<BTreeMap<u32, Value>, FrameError> {
    let mut map = BTreeMap::new();
    let mut offset = 0;
    let mut take = |fields: &[BitField], len: usize| -> Result<Record, FrameError> {
        let rec = parse_bits(fields, &data[offset..offset + len])?;
        offset += len;
        Ok(rec)
    };
    match layout.size {
        32 => {
            for partition in 1..=5u32 {
                let mut rec = take(&layout.first_half, FIRST_HALF_BYTES)?;
                rec.extend(take(&layout.last_half, LAST_HALF_BYTES)?);
                map.insert(partition, Value::Record(rec));
            }
            map.insert(6, Value::Record(take(&layout.first_half, FIRST_HALF_BYTES)?));
        }
        16 => {
            map.insert(6, Value::Record(take(&layout.last_half, LAST_HALF_BYTES)?));
            for partition in 7..=8u32 {
                let mut rec = take(&layout.first_half, FIRST_HALF_BYTES)?;
                rec.extend(take(&layout.last_half, LAST_HALF_BYTES)?);
                map.insert(partition, Value::Record(rec));
            }
        }
        other => return Err(partition_status_size(other)),
    }
    Ok(map)
}

fn build_partition_status(
    layout: &PartitionStatusLayout,
    map: &BTreeMap<u32, Value>,
) -> Result<Vec<u8>, FrameError> {
    let empty = Record::new();
    let rec_of = |k: u32| map.get(&k).and_then(Value::as_record).unwrap_or(&empty);
    let mut out = Vec::with_capacity(layout.size);
    match layout.size {
        32 => {
            for partition in 1..=5u32 {
                out.extend(build_bits(&layout.first_half, rec_of(partition))?);
                out.extend(build_bits(&layout.last_half, rec_of(partition))?);
            }
            out.extend(build_bits(&layout.first_half, rec_of(6))?);
        }
        16 => {
            out.extend(build_bits(&layout.last_half, rec_of(6))?);
            for partition in 7..=8u32 {
                out.extend(build_bits(&layout.first_half, rec_of(partition))?);
                out.extend(build_bits(&layout.last_half, rec_of(partition))?);
            }
        }
        other => return Err(partition_status_size(other)),
    }
    Ok(out)
}

fn partition_status_size(size: usize) -> FrameError {
    FrameError::InvalidValue {
        field: "partition_status".to_string(),
        details: format!("block size {size}, expected 32 or 16"),
    }
}

fn decode_compressed_event(data: &[u8]) -> Result<Record, FrameError> {
    let mut r = BitReader::new(data);
    let day = r.read(5)?;
    let month = r.read(4)?;
    let century = r.read(7)?;
    let year = r.read(7)?;
    let hour = r.read(5)?;
    let minute = r.read(6)?;
    let group = r.read(6)?;
    let partition = r.read(4)?;
    let m1_hi = r.read(2)?;
    let m2_hi = r.read(2)?;
    let m1 = r.read(8)?;
    let m2 = r.read(8)?;
    let serial = r.read(32)?;

    let date = [century, year, month, day, hour, minute].map(|v| v as u8);
    let mut event = Record::new();
    event.insert("major".to_string(), Value::Int(group));
    event.insert("minor".to_string(), Value::Int(m1 + (m1_hi << 8)));
    event.insert("minor2".to_string(), Value::Int(m2 + (m2_hi << 8)));
    event.insert("partition".to_string(), Value::Int(partition));

    let mut rec = Record::new();
    rec.insert("time".to_string(), Value::Time(decode_date(&date)?));
    rec.insert("event".to_string(), Value::Record(event));
    rec.insert("module_serial".to_string(), Value::Int(serial));
    Ok(rec)
}

fn encode_compressed_event(rec: &Record) -> Result<Vec<u8>, FrameError> {
    let date = match rec.get("time") {
        Some(Value::Time(Some(t))) => encode_date(t, false)?,
        _ => vec![0; 6],
    };
    let empty = Record::new();
    let event = rec.get("event").and_then(Value::as_record).unwrap_or(&empty);
    let get = |name: &str| event.get(name).and_then(Value::as_u64).unwrap_or(0);
    let (minor, minor2) = (get("minor"), get("minor2"));
    let serial = rec.get("module_serial").and_then(Value::as_u64).unwrap_or(0);

    let mut w = BitWriter::new();
    w.write(u64::from(date[3]), 5)?;
    w.write(u64::from(date[2]), 4)?;
    w.write(u64::from(date[0]), 7)?;
    w.write(u64::from(date[1]), 7)?;
    w.write(u64::from(date[4]), 5)?;
    w.write(u64::from(date[5]), 6)?;
    w.write(get("major"), 6)?;
    w.write(get("partition"), 4)?;
    w.write(minor >> 8, 2)?;
    w.write(minor2 >> 8, 2)?;
    w.write(minor & 0xFF, 8)?;
    w.write(minor2 & 0xFF, 8)?;
    w.write(serial, 32)?;
    Ok(w.into_bytes())
}

fn expected(what: &str, got: &Value) -> FrameError {
    FrameError::InvalidValue {
        field: what.to_string(),
        details: format!("expected {what}, got {got}"),
    }
}

fn unsized_node(name: &str) -> FrameError {
    FrameError::InvalidValue {
        field: name.to_string(),
        details: "inner grammar has no static size".to_string(),
    }
}

fn in_field(name: &str, err: FrameError) -> FrameError {
    match err {
        FrameError::InvalidValue { field, details } if field != name => FrameError::InvalidValue {
            field: format!("{name}.{field}"),
            details,
        },
        other => other,
    }
}
