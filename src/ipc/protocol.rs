//! Wire types and the line codec shared by the client and the server.
//!
//! # Wire format
//!
//! Every message is a single line of JSON followed by `\n`, in both
//! directions:
//!
//! ```json
//! {"command":"APPLY_LAYOUT","payload":{"layout_name":"columns","tile_now":true}}
//! {"status":"OK"}
//! {"status":"ERROR","error":"layout_name is required"}
//! ```
//!
//! Compact JSON escapes every control character inside strings, so an
//! encoded record never contains a raw newline and the line is its own
//! frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The record is not valid JSON or does not match the envelope.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// The `command` field names no known command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    /// The payload or response data does not match the command's schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(serde_json::Error),
}

//  Commands

/// The closed set of daemon commands.
///
/// Anything else arriving on the wire decodes to [`Unknown`](CommandType::Unknown)
/// so the server can answer it with an ERROR response instead of dropping
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandType {
    Reload,
    GetStatus,
    GetMonitors,
    PreviewLayout,
    ListLayouts,
    ApplyLayout,
    SetDefaultLayout,
    Undo,
    Unknown(String),
}

impl CommandType {
    /// Map a wire literal to its command.  Never fails.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "RELOAD" => CommandType::Reload,
            "GET_STATUS" => CommandType::GetStatus,
            "GET_MONITORS" => CommandType::GetMonitors,
            "PREVIEW_LAYOUT" => CommandType::PreviewLayout,
            "LIST_LAYOUTS" => CommandType::ListLayouts,
            "APPLY_LAYOUT" => CommandType::ApplyLayout,
            "SET_DEFAULT_LAYOUT" => CommandType::SetDefaultLayout,
            "UNDO" => CommandType::Undo,
            other => CommandType::Unknown(other.to_string()),
        }
    }

    /// The string literal used on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            CommandType::Reload => "RELOAD",
            CommandType::GetStatus => "GET_STATUS",
            CommandType::GetMonitors => "GET_MONITORS",
            CommandType::PreviewLayout => "PREVIEW_LAYOUT",
            CommandType::ListLayouts => "LIST_LAYOUTS",
            CommandType::ApplyLayout => "APPLY_LAYOUT",
            CommandType::SetDefaultLayout => "SET_DEFAULT_LAYOUT",
            CommandType::Undo => "UNDO",
            CommandType::Unknown(s) => s,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_wire(s))
    }
}

impl Serialize for CommandType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(CommandType::from_wire(&s))
    }
}

//  Envelopes

/// A client request: a command plus its command-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Request {
    /// A request without payload.
    pub fn new(command: CommandType) -> Self {
        Self {
            command,
            payload: None,
        }
    }

    /// A request carrying `payload`.  A payload serializing to `{}` is
    /// left off the wire.
    pub fn with_payload<P: Serialize>(command: CommandType, payload: &P) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(payload)?;
        let empty = matches!(&value, Value::Object(map) if map.is_empty()) || value.is_null();
        Ok(Self {
            command,
            payload: (!empty).then_some(value),
        })
    }

    /// Decode the payload into `P`.  A missing payload decodes as `P`'s
    /// default.
    pub fn payload<P: DeserializeOwned + Default>(&self) -> Result<P, ProtocolError> {
        match &self.payload {
            None | Some(Value::Null) => Ok(P::default()),
            Some(value) => P::deserialize(value).map_err(ProtocolError::InvalidPayload),
        }
    }
}

/// Outcome flag of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// A daemon response.
///
/// `data` is only present on success for commands that return something;
/// `error` is only present on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Success without data.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            data: None,
            error: None,
        }
    }

    /// Success carrying `data`.
    pub fn ok_with<D: Serialize>(data: &D) -> Result<Self, ProtocolError> {
        Ok(Self {
            status: Status::Ok,
            data: Some(serde_json::to_value(data)?),
            error: None,
        })
    }

    /// Failure with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Decode the response data into `D`.
    pub fn data<D: DeserializeOwned>(&self) -> Result<D, ProtocolError> {
        let value = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(ProtocolError::InvalidPayload)
    }
}

//  Codec

/// Encode a message as one newline-terminated JSON record.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    debug_assert!(!line.contains('\n'));
    line.push('\n');
    Ok(line)
}

/// Decode one record.  Surrounding whitespace (including the terminating
/// newline) is ignored.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

//  Payloads

fn is_false(b: &bool) -> bool {
    !*b
}

/// Payload of `PREVIEW_LAYOUT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewLayoutPayload {
    /// Layout to preview; empty means the configured default.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub layout_name: String,
    /// Requested preview length.  Clamped by the daemon.
    pub duration_seconds: i64,
}

/// Payload of `APPLY_LAYOUT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyLayoutPayload {
    pub layout_name: String,
    #[serde(skip_serializing_if = "is_false")]
    pub tile_now: bool,
    /// Explicit window ordering used when tiling immediately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_order: Option<Vec<u32>>,
}

/// Payload of `SET_DEFAULT_LAYOUT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetDefaultLayoutPayload {
    pub layout_name: String,
    #[serde(skip_serializing_if = "is_false")]
    pub tile_now: bool,
}

//  Response data

/// Data of a `GET_STATUS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    pub active_layout: String,
    pub terminal_count: u64,
    pub uptime_seconds: u64,
    pub daemon_running: bool,
}

/// One monitor in a `GET_MONITORS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorData {
    pub id: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Data of a `GET_MONITORS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorsData {
    pub monitors: Vec<MonitorData>,
}

/// Data of a `LIST_LAYOUTS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutsData {
    /// Configured layout names, sorted.
    pub layouts: Vec<String>,
    pub default_layout: String,
    pub active_layout: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let requests = vec![
            Request::new(CommandType::Reload),
            Request::new(CommandType::Unknown("FROB".into())),
            Request::with_payload(
                CommandType::ApplyLayout,
                &ApplyLayoutPayload {
                    layout_name: "columns".into(),
                    tile_now: true,
                    window_order: Some(vec![0x0140_0003, 7, u32::MAX]),
                },
            )
            .unwrap(),
            Request::with_payload(
                CommandType::PreviewLayout,
                &PreviewLayoutPayload {
                    layout_name: "tab\tand\nnewline".into(),
                    duration_seconds: -5,
                },
            )
            .unwrap(),
        ];
        for req in requests {
            let line = encode(&req).unwrap();
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1, "embedded newline in {line:?}");
            assert_eq!(decode::<Request>(&line).unwrap(), req);
        }
    }

    #[test]
    fn command_literals_on_the_wire() {
        let all = [
            (CommandType::Reload, "RELOAD"),
            (CommandType::GetStatus, "GET_STATUS"),
            (CommandType::GetMonitors, "GET_MONITORS"),
            (CommandType::PreviewLayout, "PREVIEW_LAYOUT"),
            (CommandType::ListLayouts, "LIST_LAYOUTS"),
            (CommandType::ApplyLayout, "APPLY_LAYOUT"),
            (CommandType::SetDefaultLayout, "SET_DEFAULT_LAYOUT"),
            (CommandType::Undo, "UNDO"),
        ];
        for (cmd, literal) in all {
            assert_eq!(serde_json::to_value(&cmd).unwrap(), json!(literal));
            assert_eq!(literal.parse::<CommandType>().unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_command_is_preserved() {
        let req: Request = decode(r#"{"command":"SHUTDOWN"}"#).unwrap();
        assert_eq!(req.command, CommandType::Unknown("SHUTDOWN".into()));
    }

    #[test]
    fn empty_payload_is_omitted() {
        let req = Request::with_payload(CommandType::Reload, &json!({})).unwrap();
        assert_eq!(req.payload, None);
        assert_eq!(encode(&req).unwrap(), "{\"command\":\"RELOAD\"}\n");
    }

    #[test]
    fn missing_payload_decodes_as_default() {
        let req: Request = decode(r#"{"command":"SET_DEFAULT_LAYOUT"}"#).unwrap();
        let p: SetDefaultLayoutPayload = req.payload().unwrap();
        assert_eq!(p, SetDefaultLayoutPayload::default());
    }

    #[test]
    fn wrongly_typed_payload_is_invalid() {
        let req: Request =
            decode(r#"{"command":"APPLY_LAYOUT","payload":{"layout_name":42}}"#).unwrap();
        let err = req.payload::<ApplyLayoutPayload>().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload(_)));
    }

    #[test]
    fn malformed_record_is_protocol_error() {
        for bad in ["", "not json", "{\"command\":", "[1,2,3]", "{\"payload\":{}}"] {
            let err = decode::<Request>(bad).unwrap_err();
            assert!(matches!(err, ProtocolError::Json(_)), "{bad:?}");
        }
    }

    #[test]
    fn error_response_shape() {
        let resp = Response::error("layout_name is required");
        assert_eq!(
            encode(&resp).unwrap(),
            "{\"status\":\"ERROR\",\"error\":\"layout_name is required\"}\n"
        );
    }

    #[test]
    fn ok_response_without_data_has_only_status() {
        assert_eq!(encode(&Response::ok()).unwrap(), "{\"status\":\"OK\"}\n");
    }

    #[test]
    fn status_data_field_order() {
        let resp = Response::ok_with(&StatusData {
            active_layout: String::new(),
            terminal_count: 0,
            uptime_seconds: 12,
            daemon_running: true,
        })
        .unwrap();
        assert_eq!(
            encode(&resp).unwrap(),
            "{\"status\":\"OK\",\"data\":{\"active_layout\":\"\",\"terminal_count\":0,\"uptime_seconds\":12,\"daemon_running\":true}}\n"
        );
        let data: StatusData = resp.data().unwrap();
        assert_eq!(data.uptime_seconds, 12);
    }

    #[test]
    fn window_order_accepts_only_u32() {
        let req: Request = decode(
            r#"{"command":"APPLY_LAYOUT","payload":{"layout_name":"a","window_order":[4294967296]}}"#,
        )
        .unwrap();
        assert!(req.payload::<ApplyLayoutPayload>().is_err());
    }
}
