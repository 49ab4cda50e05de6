//! External-reader sub-process protocol.
//!
//! An external reader is a child process that serves custom URI schemes.
//! Parent and child exchange MessagePack-encoded messages over the
//! child's stdin/stdout; every message is a two-element array
//! `[code, body]` where `body` is a map keyed by field name. Requests
//! and responses are correlated by a random `requestId`. Any unexpected
//! message is a protocol error and closes the transport.

use std::{
    fmt,
    io::{BufReader, Read, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use rmp::{encode, Marker};

use crate::{
    error::{EvalError, EvalResult},
    resolver::PathElement,
    uri::ModuleUri,
};

pub const CODE_READ_RESOURCE_REQUEST: u32 = 0x26;
pub const CODE_READ_RESOURCE_RESPONSE: u32 = 0x27;
pub const CODE_READ_MODULE_REQUEST: u32 = 0x28;
pub const CODE_READ_MODULE_RESPONSE: u32 = 0x29;
pub const CODE_LIST_RESOURCES_REQUEST: u32 = 0x2a;
pub const CODE_LIST_RESOURCES_RESPONSE: u32 = 0x2b;
pub const CODE_LIST_MODULES_REQUEST: u32 = 0x2c;
pub const CODE_LIST_MODULES_RESPONSE: u32 = 0x2d;
pub const CODE_INITIALIZE_MODULE_READER_REQUEST: u32 = 0x2e;
pub const CODE_INITIALIZE_MODULE_READER_RESPONSE: u32 = 0x2f;
pub const CODE_INITIALIZE_RESOURCE_READER_REQUEST: u32 = 0x30;
pub const CODE_INITIALIZE_RESOURCE_READER_RESPONSE: u32 = 0x31;
pub const CODE_CLOSE_EXTERNAL_PROCESS: u32 = 0x32;

/// Module-reader capabilities advertised by the child in
/// `InitializeModuleReaderResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReaderSpec {
    pub scheme: String,
    pub has_hierarchical_uris: bool,
    pub is_globbable: bool,
    pub is_local: bool,
}

/// Resource-reader capabilities advertised by the child in
/// `InitializeResourceReaderResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReaderSpec {
    pub scheme: String,
    pub has_hierarchical_uris: bool,
    pub is_globbable: bool,
}

/// A dynamically-typed MessagePack value, as read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MsgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<MsgValue>),
    Map(Vec<(MsgValue, MsgValue)>),
}

impl MsgValue {
    fn field<'a>(&'a self, name: &str) -> Option<&'a MsgValue> {
        match self {
            Self::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| matches!(k, Self::Str(s) if s == name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
}

fn protocol_error(detail: impl fmt::Display) -> Box<EvalError> {
    EvalError::protocol(format!("External reader protocol error: {detail}."))
}

fn malformed(detail: impl fmt::Display) -> Box<EvalError> {
    EvalError::protocol(format!("Malformed MessagePack data: {detail}."))
}

pub(crate) fn read_value<R: Read>(r: &mut R) -> EvalResult<MsgValue> {
    let marker = Marker::from_u8(read_be::<1, R>(r)?[0]);
    Ok(match marker {
        Marker::Null => MsgValue::Null,
        Marker::True => MsgValue::Bool(true),
        Marker::False => MsgValue::Bool(false),
        Marker::FixPos(n) => MsgValue::Int(i64::from(n)),
        Marker::FixNeg(n) => MsgValue::Int(i64::from(n)),
        Marker::U8 => MsgValue::Int(i64::from(read_be::<1, R>(r)?[0])),
        Marker::U16 => MsgValue::Int(i64::from(u16::from_be_bytes(read_be::<2, R>(r)?))),
        Marker::U32 => MsgValue::Int(i64::from(u32::from_be_bytes(read_be::<4, R>(r)?))),
        Marker::U64 => {
            let value = u64::from_be_bytes(read_be::<8, R>(r)?);
            MsgValue::Int(i64::try_from(value).map_err(|_| malformed("integer out of range"))?)
        }
        Marker::I8 => MsgValue::Int(i64::from(i8::from_be_bytes(read_be::<1, R>(r)?))),
        Marker::I16 => MsgValue::Int(i64::from(i16::from_be_bytes(read_be::<2, R>(r)?))),
        Marker::I32 => MsgValue::Int(i64::from(i32::from_be_bytes(read_be::<4, R>(r)?))),
        Marker::I64 => MsgValue::Int(i64::from_be_bytes(read_be::<8, R>(r)?)),
        Marker::F32 => MsgValue::Float(f64::from(f32::from_be_bytes(read_be::<4, R>(r)?))),
        Marker::F64 => MsgValue::Float(f64::from_be_bytes(read_be::<8, R>(r)?)),
        Marker::FixStr(len) => read_str(r, usize::from(len))?,
        Marker::Str8 => {
            let len = read_be::<1, R>(r)?[0];
            read_str(r, usize::from(len))?
        }
        Marker::Str16 => {
            let len = u16::from_be_bytes(read_be::<2, R>(r)?);
            read_str(r, usize::from(len))?
        }
        Marker::Str32 => {
            let len = u32::from_be_bytes(read_be::<4, R>(r)?);
            read_str(r, usize::try_from(len).map_err(|_| malformed("string too long"))?)?
        }
        Marker::Bin8 => {
            let len = read_be::<1, R>(r)?[0];
            read_bin(r, usize::from(len))?
        }
        Marker::Bin16 => {
            let len = u16::from_be_bytes(read_be::<2, R>(r)?);
            read_bin(r, usize::from(len))?
        }
        Marker::Bin32 => {
            let len = u32::from_be_bytes(read_be::<4, R>(r)?);
            read_bin(r, usize::try_from(len).map_err(|_| malformed("binary too long"))?)?
        }
        Marker::FixArray(len) => read_array(r, usize::from(len))?,
        Marker::Array16 => {
            let len = u16::from_be_bytes(read_be::<2, R>(r)?);
            read_array(r, usize::from(len))?
        }
        Marker::Array32 => {
            let len = u32::from_be_bytes(read_be::<4, R>(r)?);
            read_array(r, usize::try_from(len).map_err(|_| malformed("array too long"))?)?
        }
        Marker::FixMap(len) => read_map(r, usize::from(len))?,
        Marker::Map16 => {
            let len = u16::from_be_bytes(read_be::<2, R>(r)?);
            read_map(r, usize::from(len))?
        }
        Marker::Map32 => {
            let len = u32::from_be_bytes(read_be::<4, R>(r)?);
            read_map(r, usize::try_from(len).map_err(|_| malformed("map too long"))?)?
        }
        other => return Err(malformed(format!("unexpected marker {other:?}"))),
    })
}

/// Reads `N` big-endian payload bytes.
fn read_be<const N: usize, R: Read>(r: &mut R) -> EvalResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|_| malformed("truncated message"))?;
    Ok(buf)
}

fn read_str<R: Read>(r: &mut R, len: usize) -> EvalResult<MsgValue> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| malformed("truncated string"))?;
    String::from_utf8(buf)
        .map(MsgValue::Str)
        .map_err(|_| malformed("string is not UTF-8"))
}

fn read_bin<R: Read>(r: &mut R, len: usize) -> EvalResult<MsgValue> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| malformed("truncated binary"))?;
    Ok(MsgValue::Bin(buf))
}

fn read_array<R: Read>(r: &mut R, len: usize) -> EvalResult<MsgValue> {
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(read_value(r)?);
    }
    Ok(MsgValue::Array(out))
}

fn read_map<R: Read>(r: &mut R, len: usize) -> EvalResult<MsgValue> {
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        let key = read_value(r)?;
        let value = read_value(r)?;
        out.push((key, value));
    }
    Ok(MsgValue::Map(out))
}

/// One field of an outgoing message body.
enum Field<'a> {
    Str(&'a str, &'a str),
    U64(&'a str, u64),
}

fn write_message<W: Write>(w: &mut W, code: u32, fields: &[Field<'_>]) -> EvalResult<()> {
    let map_io = || EvalError::io("Cannot write to the external reader.");
    encode::write_array_len(w, 2).map_err(|_| map_io())?;
    encode::write_uint(w, u64::from(code)).map_err(|_| map_io())?;
    encode::write_map_len(w, u32::try_from(fields.len()).expect("few fields")).map_err(|_| map_io())?;
    for field in fields {
        match field {
            Field::Str(key, value) => {
                encode::write_str(w, key).map_err(|_| map_io())?;
                encode::write_str(w, value).map_err(|_| map_io())?;
            }
            Field::U64(key, value) => {
                encode::write_str(w, key).map_err(|_| map_io())?;
                encode::write_uint(w, *value).map_err(|_| map_io())?;
            }
        }
    }
    w.flush().map_err(|_| map_io())?;
    Ok(())
}

/// The message-level transport, generic over the byte streams so tests
/// can drive it over in-memory buffers.
#[derive(Debug)]
pub struct ExternalReaderTransport<R: Read, W: Write> {
    reader: R,
    writer: W,
    /// Set once a protocol violation poisons the stream.
    broken: bool,
}

impl<R: Read, W: Write> ExternalReaderTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            broken: false,
        }
    }

    fn round_trip(&mut self, code: u32, expected_response: u32, fields: &[Field<'_>]) -> EvalResult<MsgValue> {
        if self.broken {
            return Err(protocol_error("transport is closed"));
        }
        write_message(&mut self.writer, code, fields)?;
        let message = read_value(&mut self.reader).inspect_err(|_| self.broken = true)?;
        let MsgValue::Array(parts) = &message else {
            self.broken = true;
            return Err(protocol_error("message is not an array"));
        };
        let (Some(code_value), Some(body)) = (parts.first(), parts.get(1)) else {
            self.broken = true;
            return Err(protocol_error("message is missing code or body"));
        };
        if code_value.as_u64() != Some(u64::from(expected_response)) {
            self.broken = true;
            return Err(protocol_error(format!(
                "unexpected message code {code_value:?}, expected {expected_response:#x}"
            )));
        }
        Ok(body.clone())
    }

    fn checked_request_id(&mut self, body: &MsgValue, request_id: u64) -> EvalResult<()> {
        let found = body.field("requestId").and_then(MsgValue::as_u64);
        if found == Some(request_id) {
            Ok(())
        } else {
            self.broken = true;
            Err(protocol_error(format!(
                "response for request {found:?} does not match request {request_id}"
            )))
        }
    }

    /// Asks the child whether it reads modules for `scheme`.
    pub fn initialize_module_reader(&mut self, scheme: &str) -> EvalResult<Option<ModuleReaderSpec>> {
        let request_id = rand::random();
        let body = self.round_trip(
            CODE_INITIALIZE_MODULE_READER_REQUEST,
            CODE_INITIALIZE_MODULE_READER_RESPONSE,
            &[Field::U64("requestId", request_id), Field::Str("scheme", scheme)],
        )?;
        self.checked_request_id(&body, request_id)?;
        match body.field("spec") {
            None | Some(MsgValue::Null) => Ok(None),
            Some(spec) => Ok(Some(ModuleReaderSpec {
                scheme: spec
                    .field("scheme")
                    .and_then(MsgValue::as_str)
                    .unwrap_or(scheme)
                    .to_owned(),
                has_hierarchical_uris: spec
                    .field("hasHierarchicalUris")
                    .and_then(MsgValue::as_bool)
                    .unwrap_or(false),
                is_globbable: spec.field("isGlobbable").and_then(MsgValue::as_bool).unwrap_or(false),
                is_local: spec.field("isLocal").and_then(MsgValue::as_bool).unwrap_or(false),
            })),
        }
    }

    /// Asks the child whether it reads resources for `scheme`.
    pub fn initialize_resource_reader(&mut self, scheme: &str) -> EvalResult<Option<ResourceReaderSpec>> {
        let request_id = rand::random();
        let body = self.round_trip(
            CODE_INITIALIZE_RESOURCE_READER_REQUEST,
            CODE_INITIALIZE_RESOURCE_READER_RESPONSE,
            &[Field::U64("requestId", request_id), Field::Str("scheme", scheme)],
        )?;
        self.checked_request_id(&body, request_id)?;
        match body.field("spec") {
            None | Some(MsgValue::Null) => Ok(None),
            Some(spec) => Ok(Some(ResourceReaderSpec {
                scheme: spec
                    .field("scheme")
                    .and_then(MsgValue::as_str)
                    .unwrap_or(scheme)
                    .to_owned(),
                has_hierarchical_uris: spec
                    .field("hasHierarchicalUris")
                    .and_then(MsgValue::as_bool)
                    .unwrap_or(false),
                is_globbable: spec.field("isGlobbable").and_then(MsgValue::as_bool).unwrap_or(false),
            })),
        }
    }

    /// Reads module source through the child.
    pub fn read_module(&mut self, uri: &ModuleUri) -> EvalResult<String> {
        let request_id = rand::random();
        let body = self.round_trip(
            CODE_READ_MODULE_REQUEST,
            CODE_READ_MODULE_RESPONSE,
            &[Field::U64("requestId", request_id), Field::Str("uri", uri.as_str())],
        )?;
        self.checked_request_id(&body, request_id)?;
        if let Some(error) = body.field("error").and_then(MsgValue::as_str) {
            return Err(EvalError::io(format!("Cannot read module `{uri}`: {error}.")));
        }
        body.field("contents")
            .and_then(MsgValue::as_str)
            .map(str::to_owned)
            .ok_or_else(|| protocol_error("read-module response carries neither contents nor error"))
    }

    /// Reads resource bytes through the child.
    pub fn read_resource(&mut self, uri: &ModuleUri) -> EvalResult<Vec<u8>> {
        let request_id = rand::random();
        let body = self.round_trip(
            CODE_READ_RESOURCE_REQUEST,
            CODE_READ_RESOURCE_RESPONSE,
            &[Field::U64("requestId", request_id), Field::Str("uri", uri.as_str())],
        )?;
        self.checked_request_id(&body, request_id)?;
        if let Some(error) = body.field("error").and_then(MsgValue::as_str) {
            return Err(EvalError::io(format!("Cannot read resource `{uri}`: {error}.")));
        }
        match body.field("contents") {
            Some(MsgValue::Bin(bytes)) => Ok(bytes.clone()),
            Some(MsgValue::Str(text)) => Ok(text.clone().into_bytes()),
            _ => Err(protocol_error("read-resource response carries neither contents nor error")),
        }
    }

    /// Lists module path elements through the child.
    pub fn list_modules(&mut self, uri: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        self.list(uri, CODE_LIST_MODULES_REQUEST, CODE_LIST_MODULES_RESPONSE)
    }

    /// Lists resource path elements through the child.
    pub fn list_resources(&mut self, uri: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        self.list(uri, CODE_LIST_RESOURCES_REQUEST, CODE_LIST_RESOURCES_RESPONSE)
    }

    fn list(&mut self, uri: &ModuleUri, request: u32, response: u32) -> EvalResult<Vec<PathElement>> {
        let request_id = rand::random();
        let body = self.round_trip(
            request,
            response,
            &[Field::U64("requestId", request_id), Field::Str("uri", uri.as_str())],
        )?;
        self.checked_request_id(&body, request_id)?;
        if let Some(error) = body.field("error").and_then(MsgValue::as_str) {
            return Err(EvalError::io(format!("Cannot list `{uri}`: {error}.")));
        }
        let Some(MsgValue::Array(elements)) = body.field("pathElements") else {
            return Err(protocol_error("list response carries neither pathElements nor error"));
        };
        elements
            .iter()
            .map(|element| {
                let name = element
                    .field("name")
                    .and_then(MsgValue::as_str)
                    .ok_or_else(|| protocol_error("path element is missing a name"))?
                    .to_owned();
                let is_directory = element
                    .field("isDirectory")
                    .and_then(MsgValue::as_bool)
                    .unwrap_or(false);
                Ok(PathElement { name, is_directory })
            })
            .collect()
    }

    /// Tells the child to exit. Fire-and-forget: the child owes no
    /// response to this message.
    pub fn send_close(&mut self) {
        let _ = write_message(&mut self.writer, CODE_CLOSE_EXTERNAL_PROCESS, &[]);
        self.broken = true;
    }
}

/// An external reader running as a spawned child process.
#[derive(Debug)]
pub struct ExternalReaderProcess {
    child: Child,
    transport: ExternalReaderTransport<BufReader<ChildStdout>, ChildStdin>,
}

impl ExternalReaderProcess {
    /// Spawns `command args…` with piped stdin/stdout.
    pub fn spawn(command: &str, args: &[String]) -> EvalResult<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| EvalError::io(format!("Cannot spawn external reader `{command}`: {e}.")))?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        Ok(Self {
            child,
            transport: ExternalReaderTransport::new(BufReader::new(stdout), stdin),
        })
    }

    pub fn transport(&mut self) -> &mut ExternalReaderTransport<BufReader<ChildStdout>, ChildStdin> {
        &mut self.transport
    }

    /// Closes the transport and reaps the child.
    pub fn close(&mut self) {
        self.transport.send_close();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ExternalReaderProcess {
    fn drop(&mut self) {
        self.close();
    }
}
