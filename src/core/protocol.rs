//! Wire messages.
//!
//! A message body is `HEADER[|||field]*[|||payload]`. Bodies travel inside
//! length-prefixed frames (see [`crate::network::Transport`]), so the payload
//! may contain any bytes, including the separator itself.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

use crate::core::{NodeId, PeerRecord};
use crate::utils::{P2PError, Result};

pub const MESSAGE_SEPARATOR: &[u8] = b"|||";

const STATUS_OK: &[u8] = b"OK";
const STATUS_NOK: &[u8] = b"NOK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Liveness
    Hello,
    HelloBack,

    // Admission
    AddMe,
    Ack,
    Nack,

    // Gossip
    BroadcastRequest,
    BroadcastResponse,

    // Files
    FileList,
    FileListResponse,
    FileGet,
    FileGetResponse,
}

impl MessageType {
    pub fn header(self) -> &'static [u8] {
        match self {
            MessageType::Hello => b"HELLO",
            MessageType::HelloBack => b"HELLOBACK",
            MessageType::AddMe => b"ADDME",
            MessageType::Ack => b"ACK",
            MessageType::Nack => b"NACK",
            MessageType::BroadcastRequest => b"BROADCASTREQUEST",
            MessageType::BroadcastResponse => b"BROADCASTRESPONSE",
            MessageType::FileList => b"FILELIST",
            MessageType::FileListResponse => b"FILELISTRESPONSE",
            MessageType::FileGet => b"FILEGET",
            MessageType::FileGetResponse => b"FILEGETRESPONSE",
        }
    }

    pub fn from_header(header: &[u8]) -> Result<Self> {
        let kind = match header {
            b"HELLO" => MessageType::Hello,
            b"HELLOBACK" => MessageType::HelloBack,
            b"ADDME" => MessageType::AddMe,
            b"ACK" => MessageType::Ack,
            b"NACK" => MessageType::Nack,
            b"BROADCASTREQUEST" => MessageType::BroadcastRequest,
            b"BROADCASTRESPONSE" => MessageType::BroadcastResponse,
            b"FILELIST" => MessageType::FileList,
            b"FILELISTRESPONSE" => MessageType::FileListResponse,
            b"FILEGET" => MessageType::FileGet,
            b"FILEGETRESPONSE" => MessageType::FileGetResponse,
            other => {
                return Err(P2PError::ProtocolError(format!(
                    "unknown header {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.header()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello,
    /// `port` is the port the requester claims to listen on.
    AddMe { uid: NodeId, port: u16 },
    BroadcastRequest,
    FileList,
    FileGet { filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileGetStatus {
    Found(Vec<u8>),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    HelloBack,
    Ack { uid: NodeId },
    Nack,
    BroadcastResponse { peers: Vec<PeerRecord> },
    FileListResponse { uid: NodeId, files: Vec<String> },
    FileGetResponse(FileGetStatus),
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Hello => MessageType::Hello,
            Request::AddMe { .. } => MessageType::AddMe,
            Request::BroadcastRequest => MessageType::BroadcastRequest,
            Request::FileList => MessageType::FileList,
            Request::FileGet { .. } => MessageType::FileGet,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let header = self.message_type().header();
        match self {
            Request::Hello | Request::BroadcastRequest | Request::FileList => header.to_vec(),
            Request::AddMe { uid, port } => join(
                header,
                &[uid.as_str().as_bytes(), port.to_string().as_bytes()],
            ),
            Request::FileGet { filename } => join(header, &[filename.as_bytes()]),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (header, rest) = split_once(body);
        let kind = MessageType::from_header(header)?;

        match kind {
            MessageType::Hello => no_fields(kind, rest).map(|_| Request::Hello),
            MessageType::BroadcastRequest => {
                no_fields(kind, rest).map(|_| Request::BroadcastRequest)
            }
            MessageType::FileList => no_fields(kind, rest).map(|_| Request::FileList),
            MessageType::AddMe => {
                let (uid, port) = split_once(required(kind, rest)?);
                let port = port.ok_or_else(|| missing_field(kind, "port"))?;
                Ok(Request::AddMe {
                    uid: parse_uid(kind, uid)?,
                    port: parse_port(kind, port)?,
                })
            }
            MessageType::FileGet => {
                let filename = text(kind, required(kind, rest)?)?;
                if filename.is_empty() {
                    return Err(missing_field(kind, "filename"));
                }
                Ok(Request::FileGet {
                    filename: filename.to_string(),
                })
            }
            MessageType::HelloBack
            | MessageType::Ack
            | MessageType::Nack
            | MessageType::BroadcastResponse
            | MessageType::FileListResponse
            | MessageType::FileGetResponse => Err(P2PError::ProtocolError(format!(
                "{} is a response, not a request",
                kind
            ))),
        }
    }
}

impl Response {
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::HelloBack => MessageType::HelloBack,
            Response::Ack { .. } => MessageType::Ack,
            Response::Nack => MessageType::Nack,
            Response::BroadcastResponse { .. } => MessageType::BroadcastResponse,
            Response::FileListResponse { .. } => MessageType::FileListResponse,
            Response::FileGetResponse(_) => MessageType::FileGetResponse,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = self.message_type().header();
        let body = match self {
            Response::HelloBack | Response::Nack => header.to_vec(),
            Response::Ack { uid } => join(header, &[uid.as_str().as_bytes()]),
            Response::BroadcastResponse { peers } => {
                let triples: Vec<(&str, &str, u16)> = peers
                    .iter()
                    .map(|p| (p.uid.as_str(), p.ip.as_str(), p.port))
                    .collect();
                let json = serde_json::to_vec(&triples)?;
                join(header, &[json.as_slice()])
            }
            Response::FileListResponse { uid, files } => {
                let json = serde_json::to_vec(files)?;
                join(header, &[uid.as_str().as_bytes(), json.as_slice()])
            }
            Response::FileGetResponse(FileGetStatus::Found(data)) => {
                join(header, &[STATUS_OK, STANDARD.encode(data).as_bytes()])
            }
            Response::FileGetResponse(FileGetStatus::Missing) => join(header, &[STATUS_NOK]),
        };
        Ok(body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let (header, rest) = split_once(body);
        let kind = MessageType::from_header(header)?;

        match kind {
            MessageType::HelloBack => no_fields(kind, rest).map(|_| Response::HelloBack),
            MessageType::Nack => no_fields(kind, rest).map(|_| Response::Nack),
            MessageType::Ack => Ok(Response::Ack {
                uid: parse_uid(kind, required(kind, rest)?)?,
            }),
            MessageType::BroadcastResponse => {
                let triples: Vec<(String, String, u16)> =
                    serde_json::from_slice(required(kind, rest)?).map_err(|e| {
                        P2PError::ProtocolError(format!("{}: bad peer list: {}", kind, e))
                    })?;
                let peers = triples
                    .into_iter()
                    .map(|(uid, ip, port)| -> Result<PeerRecord> {
                        Ok(PeerRecord::new(parse_uid(kind, uid.as_bytes())?, ip, port))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Response::BroadcastResponse { peers })
            }
            MessageType::FileListResponse => {
                let (uid, files) = split_once(required(kind, rest)?);
                let files = files.ok_or_else(|| missing_field(kind, "file list"))?;
                let files: Vec<String> = serde_json::from_slice(files).map_err(|e| {
                    P2PError::ProtocolError(format!("{}: bad file list: {}", kind, e))
                })?;
                Ok(Response::FileListResponse {
                    uid: parse_uid(kind, uid)?,
                    files,
                })
            }
            MessageType::FileGetResponse => {
                let (status, payload) = split_once(required(kind, rest)?);
                if status == STATUS_OK {
                    let payload = payload.ok_or_else(|| missing_field(kind, "file data"))?;
                    let data = STANDARD.decode(payload).map_err(|e| {
                        P2PError::ProtocolError(format!("{}: bad file data: {}", kind, e))
                    })?;
                    Ok(Response::FileGetResponse(FileGetStatus::Found(data)))
                } else if status == STATUS_NOK && payload.is_none() {
                    Ok(Response::FileGetResponse(FileGetStatus::Missing))
                } else {
                    Err(P2PError::ProtocolError(format!(
                        "{}: bad status field {:?}",
                        kind,
                        String::from_utf8_lossy(status)
                    )))
                }
            }
            MessageType::Hello
            | MessageType::AddMe
            | MessageType::BroadcastRequest
            | MessageType::FileList
            | MessageType::FileGet => Err(P2PError::ProtocolError(format!(
                "{} is a request, not a response",
                kind
            ))),
        }
    }
}

fn join(header: &[u8], fields: &[&[u8]]) -> Vec<u8> {
    let len = header.len()
        + fields
            .iter()
            .map(|f| f.len() + MESSAGE_SEPARATOR.len())
            .sum::<usize>();
    let mut body = Vec::with_capacity(len);
    body.extend_from_slice(header);
    for field in fields {
        body.extend_from_slice(MESSAGE_SEPARATOR);
        body.extend_from_slice(field);
    }
    body
}

/// Split at the first separator. The remainder may itself contain separators.
fn split_once(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    match data
        .windows(MESSAGE_SEPARATOR.len())
        .position(|w| w == MESSAGE_SEPARATOR)
    {
        Some(pos) => (&data[..pos], Some(&data[pos + MESSAGE_SEPARATOR.len()..])),
        None => (data, None),
    }
}

fn no_fields(kind: MessageType, rest: Option<&[u8]>) -> Result<()> {
    match rest {
        None => Ok(()),
        Some(_) => Err(P2PError::ProtocolError(format!(
            "{} takes no fields",
            kind
        ))),
    }
}

fn required(kind: MessageType, rest: Option<&[u8]>) -> Result<&[u8]> {
    rest.ok_or_else(|| missing_field(kind, "payload"))
}

fn missing_field(kind: MessageType, what: &str) -> P2PError {
    P2PError::ProtocolError(format!("{}: missing {}", kind, what))
}

fn text(kind: MessageType, field: &[u8]) -> Result<&str> {
    std::str::from_utf8(field)
        .map_err(|_| P2PError::ProtocolError(format!("{}: field is not UTF-8", kind)))
}

fn parse_uid(kind: MessageType, field: &[u8]) -> Result<NodeId> {
    NodeId::parse(text(kind, field)?)
        .map_err(|e| P2PError::ProtocolError(format!("{}: {}", kind, e)))
}

fn parse_port(kind: MessageType, field: &[u8]) -> Result<u16> {
    let raw = text(kind, field)?;
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(P2PError::ProtocolError(format!(
            "{}: invalid port {:?}",
            kind, raw
        ))),
    }
}
