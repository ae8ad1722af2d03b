#![forbid(unsafe_code)]

use crate::handler::{self, LicenseError, LicenseHandler};
use crate::protocol::{EnvelopeError, Header, LicenseView};
use lm_core::dates::CalendarDate;
use lm_core::ids::LicenseId;
use lm_core::model::{LicenseRecord, LicenseState, LicenseType};
use serde::Deserialize;
use serde_json::Value;

/// Every accepted command name, in wire spelling. Kept next to the enum so
/// the sync test below can prove the two never drift apart.
pub const COMMAND_NAMES: &[&str] = &[
    "Activate",
    "Deactivate",
    "GetAllLicenses",
    "AddLicense",
    "ExtendExpirationDate",
    "Lock",
    "LockAll",
    "Unlock",
    "Delete",
    "GetActiveLicense",
];

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdPayload {
    pub id: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLicensePayload {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub expires_at: String,
    pub serial_number: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendPayload {
    pub id: u32,
    pub expires_at: String,
}

/// The closed command set. Dispatch is an exhaustive match; only the
/// name-to-variant mapping in [`Command::parse`] can fail at runtime.
#[derive(Clone, Debug)]
pub enum Command {
    Activate(IdPayload),
    Deactivate(IdPayload),
    GetAllLicenses,
    AddLicense(AddLicensePayload),
    ExtendExpirationDate(ExtendPayload),
    Lock(IdPayload),
    LockAll,
    Unlock(IdPayload),
    Delete(IdPayload),
    GetActiveLicense,
}

impl Command {
    pub fn parse(header: &Header, payload: Value) -> Result<Self, EnvelopeError> {
        match header.command() {
            "Activate" => Ok(Self::Activate(decode(payload)?)),
            "Deactivate" => Ok(Self::Deactivate(decode(payload)?)),
            "GetAllLicenses" => Ok(Self::GetAllLicenses),
            "AddLicense" => {
                let payload: AddLicensePayload = decode(payload)?;
                require_date(&payload.expires_at)?;
                if let Some(created_at) = &payload.created_at {
                    require_date(created_at)?;
                }
                Ok(Self::AddLicense(payload))
            }
            "ExtendExpirationDate" => {
                let payload: ExtendPayload = decode(payload)?;
                require_date(&payload.expires_at)?;
                Ok(Self::ExtendExpirationDate(payload))
            }
            "Lock" => Ok(Self::Lock(decode(payload)?)),
            "LockAll" => Ok(Self::LockAll),
            "Unlock" => Ok(Self::Unlock(decode(payload)?)),
            "Delete" => Ok(Self::Delete(decode(payload)?)),
            "GetActiveLicense" => Ok(Self::GetActiveLicense),
            other => Err(EnvelopeError::UnknownCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate(_) => "Activate",
            Self::Deactivate(_) => "Deactivate",
            Self::GetAllLicenses => "GetAllLicenses",
            Self::AddLicense(_) => "AddLicense",
            Self::ExtendExpirationDate(_) => "ExtendExpirationDate",
            Self::Lock(_) => "Lock",
            Self::LockAll => "LockAll",
            Self::Unlock(_) => "Unlock",
            Self::Delete(_) => "Delete",
            Self::GetActiveLicense => "GetActiveLicense",
        }
    }

    /// Executes exactly one state-machine operation. Queries return license
    /// views, mutations return nothing.
    pub fn execute(
        self,
        handler: &mut LicenseHandler,
    ) -> Result<Option<Vec<LicenseView>>, LicenseError> {
        match self {
            Self::Activate(payload) => {
                handler.activate_license(LicenseId::new(payload.id))?;
                Ok(None)
            }
            Self::Deactivate(payload) => {
                handler.deactivate_license(LicenseId::new(payload.id))?;
                Ok(None)
            }
            Self::GetAllLicenses => Ok(Some(views(handler.get_all_licenses()?))),
            Self::AddLicense(payload) => {
                let created_at = payload
                    .created_at
                    .unwrap_or_else(|| handler::today().to_string());
                let record = LicenseRecord {
                    id: LicenseId::new(payload.id),
                    kind: LicenseType::parse_lossy(&payload.kind),
                    created_at,
                    expires_at: payload.expires_at,
                    // Clients never inject an active or default record.
                    state: LicenseState::Inactive,
                    is_default: false,
                    serial_number: payload.serial_number,
                };
                handler.add_license(record)?;
                Ok(None)
            }
            Self::ExtendExpirationDate(payload) => {
                handler
                    .extend_expiration_date(LicenseId::new(payload.id), &payload.expires_at)?;
                Ok(None)
            }
            Self::Lock(payload) => {
                handler.lock_license(LicenseId::new(payload.id))?;
                Ok(None)
            }
            Self::LockAll => {
                handler.lock_all_licenses()?;
                Ok(None)
            }
            Self::Unlock(payload) => {
                handler.unlock_license(LicenseId::new(payload.id))?;
                Ok(None)
            }
            Self::Delete(payload) => {
                handler.delete_license(LicenseId::new(payload.id))?;
                Ok(None)
            }
            Self::GetActiveLicense => Ok(Some(views(handler.get_active_license()?))),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, EnvelopeError> {
    serde_json::from_value(payload).map_err(|err| EnvelopeError::MalformedPayload(err.to_string()))
}

fn require_date(value: &str) -> Result<(), EnvelopeError> {
    CalendarDate::parse(value)
        .map(|_| ())
        .map_err(|err| EnvelopeError::MalformedPayload(err.to_string()))
}

fn views(records: Vec<LicenseRecord>) -> Vec<LicenseView> {
    records.iter().map(LicenseView::from_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(command: &str, payload: Value) -> Result<Command, EnvelopeError> {
        Command::parse(&Header::for_command(command), payload)
    }

    #[test]
    fn command_names_and_parse_stay_in_sync() {
        let payload = json!({
            "id": 1_234_567,
            "type": "Basic",
            "expiresAt": "2099/12/31",
            "serialNumber": "serial",
        });
        for name in COMMAND_NAMES {
            let command = parse(name, payload.clone())
                .unwrap_or_else(|err| panic!("'{name}' must parse: {err}"));
            assert_eq!(command.name(), *name);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            parse("Frobnicate", Value::Null),
            Err(EnvelopeError::UnknownCommand(_))
        ));
        // Names match exactly, including case.
        assert!(matches!(
            parse("lock", json!({"id": 1})),
            Err(EnvelopeError::UnknownCommand(_))
        ));
    }

    #[test]
    fn id_commands_need_an_id_payload() {
        assert!(matches!(
            parse("Lock", Value::Null),
            Err(EnvelopeError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse("Lock", json!({"licenseId": 1})),
            Err(EnvelopeError::MalformedPayload(_))
        ));
        assert!(parse("Lock", json!({"id": 1_234_567})).is_ok());
    }

    #[test]
    fn payload_dates_must_parse() {
        assert!(matches!(
            parse("ExtendExpirationDate", json!({"id": 1, "expiresAt": "31.12.2099"})),
            Err(EnvelopeError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse(
                "AddLicense",
                json!({
                    "id": 1_234_567,
                    "type": "Basic",
                    "expiresAt": "2099/12/31",
                    "serialNumber": "serial",
                    "createdAt": "yesterday"
                })
            ),
            Err(EnvelopeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn query_commands_ignore_payloads() {
        assert!(parse("GetAllLicenses", Value::Null).is_ok());
        assert!(parse("GetAllLicenses", json!({"anything": true})).is_ok());
        assert!(parse("LockAll", Value::Null).is_ok());
        assert!(parse("GetActiveLicense", Value::Null).is_ok());
    }
}
