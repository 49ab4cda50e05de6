//! The MessagePack-based binary value encoding.
//!
//! Every non-scalar value is a msgpack array starting with a numeric
//! code; scalars use the native msgpack encodings. Decoders reject
//! unknown codes and unexpected shapes; the non-reconstructible kinds
//! (classes, type aliases, int sequences, functions) decode to null
//! placeholders.

use std::io::Write;

use rmp::encode;

use crate::{
    error::{EvalError, EvalResult},
    external_reader::{read_value, MsgValue},
    types::{DataSize, DataSizeUnit, Duration, DurationUnit},
    value::Exported,
};

pub const CODE_OBJECT: u8 = 0x1;
pub const CODE_MAP: u8 = 0x2;
pub const CODE_MAPPING: u8 = 0x3;
pub const CODE_LIST: u8 = 0x4;
pub const CODE_LISTING: u8 = 0x5;
pub const CODE_SET: u8 = 0x6;
pub const CODE_DURATION: u8 = 0x7;
pub const CODE_DATA_SIZE: u8 = 0x8;
pub const CODE_PAIR: u8 = 0x9;
pub const CODE_INT_SEQ: u8 = 0xA;
pub const CODE_REGEX: u8 = 0xB;
pub const CODE_CLASS: u8 = 0xC;
pub const CODE_TYPE_ALIAS: u8 = 0xD;
pub const CODE_FUNCTION: u8 = 0xE;
pub const CODE_BYTES: u8 = 0xF;
pub const CODE_PROPERTY: u8 = 0x10;
pub const CODE_ENTRY: u8 = 0x11;
pub const CODE_ELEMENT: u8 = 0x12;

/// Encodes a fully materialized value.
pub fn encode_value(value: &Exported) -> EvalResult<Vec<u8>> {
    let mut out = Vec::new();
    write_exported(&mut out, value)?;
    Ok(out)
}

fn io_err(detail: impl std::fmt::Display) -> Box<EvalError> {
    EvalError::io(format!("Cannot encode value: {detail}."))
}

fn write_exported<W: Write>(w: &mut W, value: &Exported) -> EvalResult<()> {
    match value {
        Exported::Null => {
            encode::write_nil(w).map_err(|_| io_err("write failed"))?;
        }
        Exported::Bool(b) => {
            encode::write_bool(w, *b).map_err(|_| io_err("write failed"))?;
        }
        Exported::Int(i) => {
            encode::write_sint(w, *i).map_err(|_| io_err("write failed"))?;
        }
        Exported::Float(f) => {
            encode::write_f64(w, *f).map_err(|_| io_err("write failed"))?;
        }
        Exported::String(s) => {
            encode::write_str(w, s).map_err(|_| io_err("write failed"))?;
        }
        Exported::Duration(d) => {
            write_code_array(w, CODE_DURATION, 2)?;
            encode::write_f64(w, d.value).map_err(|_| io_err("write failed"))?;
            encode::write_str(w, &d.unit.to_string()).map_err(|_| io_err("write failed"))?;
        }
        Exported::DataSize(d) => {
            write_code_array(w, CODE_DATA_SIZE, 2)?;
            encode::write_f64(w, d.value).map_err(|_| io_err("write failed"))?;
            encode::write_str(w, &d.unit.to_string()).map_err(|_| io_err("write failed"))?;
        }
        Exported::Pair(p) => {
            write_code_array(w, CODE_PAIR, 2)?;
            write_exported(w, &p.0)?;
            write_exported(w, &p.1)?;
        }
        Exported::Regex(pattern) => {
            write_code_array(w, CODE_REGEX, 1)?;
            encode::write_str(w, pattern).map_err(|_| io_err("write failed"))?;
        }
        Exported::Bytes(bytes) => {
            write_code_array(w, CODE_BYTES, 1)?;
            encode::write_bin(w, bytes).map_err(|_| io_err("write failed"))?;
        }
        Exported::List(items) => {
            write_code_array(w, CODE_LIST, 1)?;
            write_items(w, items)?;
        }
        Exported::Set(items) => {
            write_code_array(w, CODE_SET, 1)?;
            write_items(w, items)?;
        }
        Exported::Map(entries) => {
            write_code_array(w, CODE_MAP, 1)?;
            encode::write_map_len(w, length(entries.len())?).map_err(|_| io_err("write failed"))?;
            for (k, v) in entries {
                write_exported(w, k)?;
                write_exported(w, v)?;
            }
        }
        Exported::Object {
            class_name,
            properties,
            elements,
            entries,
        } => {
            write_code_array(w, CODE_OBJECT, 2)?;
            encode::write_str(w, class_name).map_err(|_| io_err("write failed"))?;
            let member_count = properties.len() + entries.len() + elements.len();
            encode::write_array_len(w, length(member_count)?).map_err(|_| io_err("write failed"))?;
            for (name, value) in properties {
                write_code_array(w, CODE_PROPERTY, 2)?;
                encode::write_str(w, name).map_err(|_| io_err("write failed"))?;
                write_exported(w, value)?;
            }
            for (key, value) in entries {
                write_code_array(w, CODE_ENTRY, 2)?;
                write_exported(w, key)?;
                write_exported(w, value)?;
            }
            for value in elements {
                write_code_array(w, CODE_ELEMENT, 1)?;
                write_exported(w, value)?;
            }
        }
        Exported::Class(_) => write_code_array(w, CODE_CLASS, 0)?,
        Exported::TypeAlias(_) => write_code_array(w, CODE_TYPE_ALIAS, 0)?,
    }
    Ok(())
}

fn write_items<W: Write>(w: &mut W, items: &[Exported]) -> EvalResult<()> {
    encode::write_array_len(w, length(items.len())?).map_err(|_| io_err("write failed"))?;
    for item in items {
        write_exported(w, item)?;
    }
    Ok(())
}

fn write_code_array<W: Write>(w: &mut W, code: u8, extra: u32) -> EvalResult<()> {
    encode::write_array_len(w, extra + 1).map_err(|_| io_err("write failed"))?;
    encode::write_uint(w, u64::from(code)).map_err(|_| io_err("write failed"))?;
    Ok(())
}

fn length(len: usize) -> EvalResult<u32> {
    u32::try_from(len).map_err(|_| io_err("collection too large"))
}

fn decode_err(detail: impl std::fmt::Display) -> Box<EvalError> {
    EvalError::protocol(format!("Cannot decode value: {detail}."))
}

/// Decodes one encoded value.
pub fn decode_value(bytes: &[u8]) -> EvalResult<Exported> {
    let mut reader = bytes;
    let value =
        read_value(&mut reader).map_err(|e| decode_err(e.message().trim_end_matches('.')))?;
    if !reader.is_empty() {
        return Err(decode_err("trailing bytes after value"));
    }
    convert(&value)
}

fn convert(value: &MsgValue) -> EvalResult<Exported> {
    match value {
        MsgValue::Null => Ok(Exported::Null),
        MsgValue::Bool(b) => Ok(Exported::Bool(*b)),
        MsgValue::Int(i) => Ok(Exported::Int(*i)),
        MsgValue::Float(f) => Ok(Exported::Float(*f)),
        MsgValue::Str(s) => Ok(Exported::String(s.clone())),
        MsgValue::Bin(_) => Err(decode_err("bare binary data outside a `Bytes` wrapper")),
        MsgValue::Map(_) => Err(decode_err("bare map outside a `Map` wrapper")),
        MsgValue::Array(parts) => convert_tagged(parts),
    }
}

fn convert_tagged(parts: &[MsgValue]) -> EvalResult<Exported> {
    let Some(MsgValue::Int(code)) = parts.first() else {
        return Err(decode_err("value array does not start with a code"));
    };
    let code = u8::try_from(*code).map_err(|_| decode_err(format!("unknown value code {code}")))?;
    let arg = |i: usize| parts.get(i).ok_or_else(|| decode_err("value array is too short"));
    match code {
        CODE_LIST | CODE_LISTING | CODE_SET => {
            let MsgValue::Array(items) = arg(1)? else {
                return Err(decode_err("expected an element array"));
            };
            let converted: EvalResult<Vec<Exported>> = items.iter().map(convert).collect();
            Ok(if code == CODE_SET {
                Exported::Set(converted?)
            } else {
                Exported::List(converted?)
            })
        }
        CODE_MAP | CODE_MAPPING => {
            let MsgValue::Map(pairs) = arg(1)? else {
                return Err(decode_err("expected an entry map"));
            };
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((convert(k)?, convert(v)?));
            }
            Ok(Exported::Map(out))
        }
        CODE_DURATION => {
            let value = number(arg(1)?)?;
            let MsgValue::Str(unit) = arg(2)? else {
                return Err(decode_err("expected a duration unit string"));
            };
            let unit: DurationUnit = unit
                .parse()
                .map_err(|_| decode_err(format!("unknown duration unit `{unit}`")))?;
            Ok(Exported::Duration(Duration::new(value, unit)))
        }
        CODE_DATA_SIZE => {
            let value = number(arg(1)?)?;
            let MsgValue::Str(unit) = arg(2)? else {
                return Err(decode_err("expected a data size unit string"));
            };
            let unit: DataSizeUnit = unit
                .parse()
                .map_err(|_| decode_err(format!("unknown data size unit `{unit}`")))?;
            Ok(Exported::DataSize(DataSize::new(value, unit)))
        }
        CODE_PAIR => Ok(Exported::Pair(Box::new((convert(arg(1)?)?, convert(arg(2)?)?)))),
        CODE_REGEX => {
            let MsgValue::Str(pattern) = arg(1)? else {
                return Err(decode_err("expected a regex pattern string"));
            };
            Ok(Exported::Regex(pattern.clone()))
        }
        CODE_BYTES => {
            let MsgValue::Bin(bytes) = arg(1)? else {
                return Err(decode_err("expected binary data"));
            };
            Ok(Exported::Bytes(bytes.clone()))
        }
        CODE_OBJECT => {
            let MsgValue::Str(class_name) = arg(1)? else {
                return Err(decode_err("expected a class name"));
            };
            let MsgValue::Array(members) = arg(2)? else {
                return Err(decode_err("expected a member array"));
            };
            let mut properties = Vec::new();
            let mut entries = Vec::new();
            let mut elements = Vec::new();
            for member in members {
                let MsgValue::Array(parts) = member else {
                    return Err(decode_err("expected a member array"));
                };
                let Some(MsgValue::Int(member_code)) = parts.first() else {
                    return Err(decode_err("member array does not start with a code"));
                };
                match u8::try_from(*member_code).ok() {
                    Some(CODE_PROPERTY) => {
                        let MsgValue::Str(name) = parts
                            .get(1)
                            .ok_or_else(|| decode_err("property is missing a name"))?
                        else {
                            return Err(decode_err("expected a property name string"));
                        };
                        let value = parts.get(2).ok_or_else(|| decode_err("property is missing a value"))?;
                        properties.push((name.clone(), convert(value)?));
                    }
                    Some(CODE_ENTRY) => {
                        let key = parts.get(1).ok_or_else(|| decode_err("entry is missing a key"))?;
                        let value = parts.get(2).ok_or_else(|| decode_err("entry is missing a value"))?;
                        entries.push((convert(key)?, convert(value)?));
                    }
                    Some(CODE_ELEMENT) => {
                        let value = parts.get(1).ok_or_else(|| decode_err("element is missing a value"))?;
                        elements.push(convert(value)?);
                    }
                    _ => return Err(decode_err(format!("unknown member code {member_code}"))),
                }
            }
            Ok(Exported::Object {
                class_name: class_name.clone(),
                properties,
                elements,
                entries,
            })
        }
        // Non-reconstructible kinds decode to null placeholders.
        CODE_CLASS | CODE_TYPE_ALIAS | CODE_INT_SEQ | CODE_FUNCTION => Ok(Exported::Null),
        other => Err(decode_err(format!("unknown value code {other:#x}"))),
    }
}

fn number(value: &MsgValue) -> EvalResult<f64> {
    match value {
        MsgValue::Int(i) => Ok(*i as f64),
        MsgValue::Float(f) => Ok(*f),
        _ => Err(decode_err("expected a number")),
    }
}
