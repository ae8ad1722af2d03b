#![forbid(unsafe_code)]

use lm_core::model::LicenseRecord;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Hard cap on a single request line. Anything longer is a protocol violation
/// and drops the connection rather than buffering without bound.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Decoded request header: the command name plus the original header object,
/// which is echoed back verbatim so clients keep their correlation fields.
#[derive(Clone, Debug)]
pub struct Header {
    command: String,
    raw: Value,
}

impl Header {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn echo(&self) -> Value {
        self.raw.clone()
    }

    #[cfg(test)]
    pub fn for_command(command: &str) -> Self {
        Self {
            command: command.to_string(),
            raw: serde_json::json!({ "command": command }),
        }
    }
}

#[derive(Debug)]
pub enum EnvelopeError {
    Json(serde_json::Error),
    NotAnArray,
    EmptyEnvelope,
    HeaderNotAnObject,
    MissingCommand,
    UnknownCommand(String),
    MalformedPayload(String),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid json: {err}"),
            Self::NotAnArray => write!(f, "message must be a json array"),
            Self::EmptyEnvelope => write!(f, "message array is empty"),
            Self::HeaderNotAnObject => write!(f, "header must be a json object"),
            Self::MissingCommand => write!(f, "header is missing a command name"),
            Self::UnknownCommand(name) => write!(f, "unknown command '{name}'"),
            Self::MalformedPayload(detail) => write!(f, "malformed payload: {detail}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<serde_json::Error> for EnvelopeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Splits one request line into its header and (optional) payload element.
/// Extra trailing elements are tolerated and ignored.
pub fn parse_envelope(raw: &str) -> Result<(Header, Value), EnvelopeError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Array(mut items) = value else {
        return Err(EnvelopeError::NotAnArray);
    };
    if items.is_empty() {
        return Err(EnvelopeError::EmptyEnvelope);
    }
    let payload = if items.len() > 1 {
        items.swap_remove(1)
    } else {
        Value::Null
    };
    let raw_header = items.swap_remove(0);
    let command = raw_header
        .as_object()
        .ok_or(EnvelopeError::HeaderNotAnObject)?
        .get("command")
        .and_then(|v| v.as_str())
        .ok_or(EnvelopeError::MissingCommand)?
        .to_string();
    Ok((
        Header {
            command,
            raw: raw_header,
        },
        payload,
    ))
}

/// Response shape: the echoed header followed by zero or more license
/// objects. Failures of any kind still produce this envelope, just empty.
pub fn response_envelope(header: &Header, licenses: &[LicenseView]) -> Value {
    let mut items = Vec::with_capacity(1 + licenses.len());
    items.push(header.echo());
    for license in licenses {
        items.push(serde_json::to_value(license).unwrap_or(Value::Null));
    }
    Value::Array(items)
}

pub fn write_newline_json<W: Write>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    writeln!(writer, "{value}")?;
    writer.flush()?;
    Ok(())
}

/// Wire view of a license record.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseView {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
    pub expires_at: String,
    pub state: String,
    pub is_default: bool,
    pub serial_number: String,
}

impl LicenseView {
    pub fn from_record(record: &LicenseRecord) -> Self {
        Self {
            id: record.id.as_u32(),
            kind: record.kind.as_str().to_string(),
            created_at: record.created_at.clone(),
            expires_at: record.expires_at.clone(),
            state: record.state.as_str().to_string(),
            is_default: record.is_default,
            serial_number: record.serial_number.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lm_core::ids::LicenseId;
    use lm_core::model::{LicenseState, LicenseType};
    use serde_json::json;

    #[test]
    fn parse_envelope_extracts_header_and_payload() {
        let (header, payload) =
            parse_envelope(r#"[{"command":"Lock","requestId":"r-1"},{"id":1234567}]"#)
                .expect("parse");
        assert_eq!(header.command(), "Lock");
        assert_eq!(header.echo(), json!({"command":"Lock","requestId":"r-1"}));
        assert_eq!(payload, json!({"id":1234567}));
    }

    #[test]
    fn parse_envelope_tolerates_missing_payload() {
        let (header, payload) =
            parse_envelope(r#"[{"command":"GetAllLicenses"}]"#).expect("parse");
        assert_eq!(header.command(), "GetAllLicenses");
        assert_eq!(payload, Value::Null);
    }

    #[test]
    fn parse_envelope_rejects_non_arrays_and_bad_headers() {
        assert!(matches!(
            parse_envelope(r#"{"command":"Lock"}"#),
            Err(EnvelopeError::NotAnArray)
        ));
        assert!(matches!(parse_envelope("[]"), Err(EnvelopeError::EmptyEnvelope)));
        assert!(matches!(
            parse_envelope(r#"["Lock"]"#),
            Err(EnvelopeError::HeaderNotAnObject)
        ));
        assert!(matches!(
            parse_envelope(r#"[{"name":"Lock"}]"#),
            Err(EnvelopeError::MissingCommand)
        ));
        assert!(matches!(
            parse_envelope("not json"),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn response_envelope_echoes_header_and_serializes_views() {
        let (header, _) =
            parse_envelope(r#"[{"command":"GetAllLicenses","requestId":42}]"#).expect("parse");
        let record = LicenseRecord {
            id: LicenseId::new(1_234_567),
            kind: LicenseType::Basic,
            created_at: "2020/01/01".to_string(),
            expires_at: "2099/12/31".to_string(),
            state: LicenseState::Inactive,
            is_default: false,
            serial_number: "serial-1".to_string(),
        };
        let resp = response_envelope(&header, &[LicenseView::from_record(&record)]);
        assert_eq!(
            resp,
            json!([
                {"command":"GetAllLicenses","requestId":42},
                {
                    "id": 1234567,
                    "type": "Basic",
                    "createdAt": "2020/01/01",
                    "expiresAt": "2099/12/31",
                    "state": "Inactive",
                    "isDefault": false,
                    "serialNumber": "serial-1"
                }
            ])
        );
    }
}
