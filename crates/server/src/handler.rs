#![forbid(unsafe_code)]

use lm_core::dates::CalendarDate;
use lm_core::ids::{LicenseId, SEVEN_DIGIT_MAX, SEVEN_DIGIT_MIN};
use lm_core::model::{LicenseRecord, LicenseState};
use lm_storage::{LicenseStore, StoreError};
use rand::Rng;
use tracing::{info, warn};

#[derive(Debug)]
pub enum LicenseError {
    NotFound(u32),
    DuplicateId(u32),
    SerialMismatch,
    InvalidIdLength { digits: u32 },
    DefaultImmutable,
    AlreadyLocked(u32),
    Store(StoreError),
}

impl std::fmt::Display for LicenseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "license {id} does not exist"),
            Self::DuplicateId(id) => write!(f, "license {id} already added"),
            Self::SerialMismatch => write!(f, "serial number does not match the master serial"),
            Self::InvalidIdLength { digits } => {
                write!(f, "license id must be 7 digits, got {digits}")
            }
            Self::DefaultImmutable => write!(f, "the default license cannot be changed"),
            Self::AlreadyLocked(id) => write!(f, "license {id} is already locked"),
            Self::Store(err) => write!(f, "store: {err}"),
        }
    }
}

impl std::error::Error for LicenseError {}

impl From<StoreError> for LicenseError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Owns every business rule over the license table. All mutations funnel
/// through here; after each one the relevant consistency pass re-establishes
/// the invariants (exactly one default, at most one active, default never
/// locked, expired records locked).
#[derive(Debug)]
pub struct LicenseHandler {
    store: LicenseStore,
    master_serial: String,
}

impl LicenseHandler {
    pub fn new(store: LicenseStore, master_serial: String) -> Self {
        Self {
            store,
            master_serial,
        }
    }

    pub fn store(&self) -> &LicenseStore {
        &self.store
    }

    /// Runs once before the listener accepts commands. Order matters: the
    /// default-license check assumes expired records are already locked, and
    /// the active-uniqueness check assumes the default record exists.
    pub fn startup(&mut self) -> Result<(), LicenseError> {
        self.sweep_expired()?;
        self.ensure_default()?;
        self.ensure_single_active()?;
        info!("license table consistent");
        Ok(())
    }

    /// Never returns an empty list: with no active record the default record
    /// is (re)created if necessary, forced active, and returned.
    pub fn get_active_license(&mut self) -> Result<Vec<LicenseRecord>, LicenseError> {
        let records = self.store.all_records()?;
        if let Some(active) = records.into_iter().find(|r| r.state == LicenseState::Active) {
            return Ok(vec![active]);
        }

        warn!("no license active, activating the default license");
        self.ensure_default()?;
        self.store.activate_default()?;

        let fallback = self
            .store
            .all_records()?
            .into_iter()
            .find(|r| r.is_default)
            .ok_or(LicenseError::Store(StoreError::InvalidInput(
                "default license missing after consistency pass",
            )))?;
        Ok(vec![fallback])
    }

    pub fn get_all_licenses(&self) -> Result<Vec<LicenseRecord>, LicenseError> {
        Ok(self.store.all_records()?)
    }

    /// Inserts a client-supplied record. The caller has already forced
    /// `state=Inactive` and `is_default=false`; this checks the business
    /// rules in order: duplicate id, serial match, id length.
    pub fn add_license(&mut self, record: LicenseRecord) -> Result<(), LicenseError> {
        if self.store.record_by_id(record.id)?.is_some() {
            return Err(LicenseError::DuplicateId(record.id.as_u32()));
        }
        if record.serial_number != self.master_serial {
            return Err(LicenseError::SerialMismatch);
        }
        if !record.id.is_seven_digits() {
            return Err(LicenseError::InvalidIdLength {
                digits: record.id.digit_count(),
            });
        }

        self.store.insert(&record)?;
        info!(id = record.id.as_u32(), "license added");
        self.sweep_expired()
    }

    /// Re-dates a non-default record. The sweep runs afterwards, so a new
    /// date that is already in the past locks the record immediately.
    pub fn extend_expiration_date(
        &mut self,
        id: LicenseId,
        expires_at: &str,
    ) -> Result<(), LicenseError> {
        let record = self.require(id)?;
        if record.is_default {
            return Err(LicenseError::DefaultImmutable);
        }

        self.store.update_expiry(id, expires_at)?;
        info!(id = id.as_u32(), expires_at, "expiration date changed");
        self.sweep_expired()
    }

    pub fn lock_license(&mut self, id: LicenseId) -> Result<(), LicenseError> {
        let record = self.require(id)?;
        if record.state == LicenseState::Locked {
            return Err(LicenseError::AlreadyLocked(id.as_u32()));
        }
        if record.is_default {
            return Err(LicenseError::DefaultImmutable);
        }

        let was_active = record.state == LicenseState::Active;
        self.store.update_state(id, LicenseState::Locked)?;
        info!(id = id.as_u32(), "license locked");

        // Never leave the system without an active license.
        if was_active {
            self.store.activate_default()?;
        }
        Ok(())
    }

    /// Locks every non-default record and falls back to the default license.
    /// Applying it twice is a no-op the second time.
    pub fn lock_all_licenses(&mut self) -> Result<(), LicenseError> {
        let targets: Vec<LicenseId> = self
            .store
            .all_records()?
            .into_iter()
            .filter(|r| !r.is_default && r.state != LicenseState::Locked)
            .map(|r| r.id)
            .collect();

        for id in targets {
            self.store.update_state(id, LicenseState::Locked)?;
        }
        self.store.activate_default()?;
        info!("all licenses locked, default license activated");
        Ok(())
    }

    /// Unlocking an expired record is a net no-op: the sweep afterwards locks
    /// it right back.
    pub fn unlock_license(&mut self, id: LicenseId) -> Result<(), LicenseError> {
        let record = self.require(id)?;
        if record.state != LicenseState::Locked {
            warn!(id = id.as_u32(), "license is not locked, nothing to unlock");
            return Ok(());
        }

        self.store.update_state(id, LicenseState::Inactive)?;
        info!(id = id.as_u32(), "license unlocked");
        self.sweep_expired()
    }

    pub fn deactivate_license(&mut self, id: LicenseId) -> Result<(), LicenseError> {
        let record = self.require(id)?;
        if record.state != LicenseState::Active {
            warn!(id = id.as_u32(), "license is not active, nothing to deactivate");
            return Ok(());
        }

        self.store.update_state(id, LicenseState::Inactive)?;
        info!(id = id.as_u32(), "license deactivated");
        self.ensure_single_active()
    }

    /// Activates the target unconditionally after deactivating every active
    /// record. A locked target becomes active too; lock state is only checked
    /// by the lock/unlock paths.
    pub fn activate_license(&mut self, id: LicenseId) -> Result<(), LicenseError> {
        self.require(id)?;

        let active: Vec<LicenseId> = self
            .store
            .all_records()?
            .into_iter()
            .filter(|r| r.state == LicenseState::Active)
            .map(|r| r.id)
            .collect();
        for other in active {
            self.store.update_state(other, LicenseState::Inactive)?;
        }

        self.store.update_state(id, LicenseState::Active)?;
        info!(id = id.as_u32(), "license activated");
        Ok(())
    }

    pub fn delete_license(&mut self, id: LicenseId) -> Result<(), LicenseError> {
        let record = self.require(id)?;
        if record.is_default {
            return Err(LicenseError::DefaultImmutable);
        }

        let was_active = record.state == LicenseState::Active;
        self.store.delete(id)?;
        info!(id = id.as_u32(), "license deleted");

        if was_active {
            self.store.activate_default()?;
        }
        Ok(())
    }

    fn require(&self, id: LicenseId) -> Result<LicenseRecord, LicenseError> {
        self.store
            .record_by_id(id)?
            .ok_or(LicenseError::NotFound(id.as_u32()))
    }

    /// Locks every non-default, non-locked record whose expiry date is on or
    /// before today. Expiry text that does not parse counts as expired: one
    /// corrupt row must not wedge the whole command stream.
    pub fn sweep_expired(&mut self) -> Result<(), LicenseError> {
        let today = today();
        let mut expired = Vec::new();

        for record in self.store.all_records()? {
            if record.is_default || record.state == LicenseState::Locked {
                continue;
            }
            let is_expired = match CalendarDate::parse(&record.expires_at) {
                Ok(date) => date.is_expired_by(today),
                Err(err) => {
                    warn!(
                        id = record.id.as_u32(),
                        expires_at = %record.expires_at,
                        %err,
                        "unreadable expiry date, treating as expired"
                    );
                    true
                }
            };
            if is_expired {
                warn!(id = record.id.as_u32(), "license expired");
                expired.push(record.id);
            }
        }

        for id in expired {
            self.store.update_state(id, LicenseState::Locked)?;
        }
        Ok(())
    }

    /// Guarantees a default record exists and is not locked. Creation here is
    /// the single code path for both first boot and later healing; it never
    /// inserts a second default record.
    pub fn ensure_default(&mut self) -> Result<(), LicenseError> {
        let default = self
            .store
            .all_records()?
            .into_iter()
            .find(|r| r.is_default);

        match default {
            Some(record) if record.state == LicenseState::Locked => {
                warn!(id = record.id.as_u32(), "default license is locked, unlocking");
                self.store.update_state(record.id, LicenseState::Inactive)?;
            }
            Some(_) => {}
            None => {
                warn!("default license is missing, creating it");
                let record = self.new_default_record(false);
                self.store.insert(&record)?;
            }
        }
        Ok(())
    }

    /// Restores the at-most-one-active invariant: with zero or several active
    /// records, every non-default active record is deactivated and the
    /// default record forced active.
    pub fn ensure_single_active(&mut self) -> Result<(), LicenseError> {
        let records = self.store.all_records()?;
        let active: Vec<&LicenseRecord> = records
            .iter()
            .filter(|r| r.state == LicenseState::Active)
            .collect();
        if active.len() == 1 {
            return Ok(());
        }

        for record in active {
            if !record.is_default {
                self.store.update_state(record.id, LicenseState::Inactive)?;
            }
        }
        self.store.activate_default()?;
        Ok(())
    }

    fn new_default_record(&self, activated: bool) -> LicenseRecord {
        let id = rand::thread_rng().gen_range(SEVEN_DIGIT_MIN..=SEVEN_DIGIT_MAX);
        LicenseRecord::default_license(
            LicenseId::new(id),
            self.master_serial.clone(),
            activated,
        )
    }
}

/// "Today" for the expiration sweep, as plain (year, month, day) components.
pub fn today() -> CalendarDate {
    let now = time::OffsetDateTime::now_utc().date();
    CalendarDate::new(now.year(), u8::from(now.month()), now.day())
}
