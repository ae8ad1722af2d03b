#![forbid(unsafe_code)]

pub mod ids {
    /// License ids are seven decimal digits on the accept path; values outside
    /// that range stay representable because they arrive from the wire and from
    /// stored rows before any validation runs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct LicenseId(u32);

    pub const SEVEN_DIGIT_MIN: u32 = 1_000_000;
    pub const SEVEN_DIGIT_MAX: u32 = 9_999_999;

    impl LicenseId {
        pub fn new(value: u32) -> Self {
            Self(value)
        }

        pub fn as_u32(self) -> u32 {
            self.0
        }

        pub fn seven_digit(value: u32) -> Result<Self, LicenseIdError> {
            if !(SEVEN_DIGIT_MIN..=SEVEN_DIGIT_MAX).contains(&value) {
                return Err(LicenseIdError::NotSevenDigits {
                    digits: digit_count(value),
                });
            }
            Ok(Self(value))
        }

        pub fn digit_count(self) -> u32 {
            digit_count(self.0)
        }

        pub fn is_seven_digits(self) -> bool {
            (SEVEN_DIGIT_MIN..=SEVEN_DIGIT_MAX).contains(&self.0)
        }
    }

    impl std::fmt::Display for LicenseId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum LicenseIdError {
        NotSevenDigits { digits: u32 },
    }

    fn digit_count(value: u32) -> u32 {
        if value == 0 {
            return 1;
        }
        value.ilog10() + 1
    }
}

pub mod model {
    use crate::ids::LicenseId;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum LicenseState {
        Active,
        Inactive,
        Locked,
    }

    impl LicenseState {
        pub fn as_str(self) -> &'static str {
            match self {
                LicenseState::Active => "Active",
                LicenseState::Inactive => "Inactive",
                LicenseState::Locked => "Locked",
            }
        }

        /// Read-path mapping for stored text: anything unrecognized counts as
        /// locked so corrupt rows can never act as a usable license.
        pub fn parse_lossy(value: &str) -> Self {
            match value {
                "Active" => LicenseState::Active,
                "Inactive" => LicenseState::Inactive,
                _ => LicenseState::Locked,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum LicenseType {
        Default,
        Basic,
        Extended,
        Advanced,
        Full,
    }

    impl LicenseType {
        pub fn as_str(self) -> &'static str {
            match self {
                LicenseType::Default => "Default",
                LicenseType::Basic => "Basic",
                LicenseType::Extended => "Extended",
                LicenseType::Advanced => "Advanced",
                LicenseType::Full => "Full",
            }
        }

        /// Read-path mapping for stored text: unrecognized tiers fall back to
        /// the lowest paid tier.
        pub fn parse_lossy(value: &str) -> Self {
            match value {
                "Default" => LicenseType::Default,
                "Extended" => LicenseType::Extended,
                "Advanced" => LicenseType::Advanced,
                "Full" => LicenseType::Full,
                _ => LicenseType::Basic,
            }
        }
    }

    /// The sole persisted entity. Dates stay as `YYYY/MM/DD` text and are only
    /// ever compared component-wise (see [`crate::dates`]).
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct LicenseRecord {
        pub id: LicenseId,
        pub kind: LicenseType,
        pub created_at: String,
        pub expires_at: String,
        pub state: LicenseState,
        pub is_default: bool,
        pub serial_number: String,
    }

    pub const DEFAULT_LICENSE_CREATED_AT: &str = "2019/01/01";
    pub const DEFAULT_LICENSE_EXPIRES_AT: &str = "2099/12/31";

    impl LicenseRecord {
        /// Template for the always-present fallback record. The id is chosen by
        /// the caller (a fresh seven-digit value).
        pub fn default_license(id: LicenseId, serial_number: String, activated: bool) -> Self {
            Self {
                id,
                kind: LicenseType::Default,
                created_at: DEFAULT_LICENSE_CREATED_AT.to_string(),
                expires_at: DEFAULT_LICENSE_EXPIRES_AT.to_string(),
                state: if activated {
                    LicenseState::Active
                } else {
                    LicenseState::Inactive
                },
                is_default: true,
                serial_number,
            }
        }
    }
}

pub mod dates {
    /// A calendar date as three integers. Ordering derives lexicographically
    /// over (year, month, day), which is exactly the component-wise rule the
    /// expiration sweep requires; no real calendar arithmetic happens anywhere.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub struct CalendarDate {
        pub year: i32,
        pub month: u8,
        pub day: u8,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum DateParseError {
        WrongShape,
        InvalidComponent,
    }

    impl std::fmt::Display for DateParseError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::WrongShape => write!(f, "date must look like YYYY/MM/DD"),
                Self::InvalidComponent => write!(f, "date component is not a number"),
            }
        }
    }

    impl std::error::Error for DateParseError {}

    impl CalendarDate {
        pub fn new(year: i32, month: u8, day: u8) -> Self {
            Self { year, month, day }
        }

        pub fn parse(value: &str) -> Result<Self, DateParseError> {
            let mut parts = value.trim().split('/');
            let (Some(year), Some(month), Some(day), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(DateParseError::WrongShape);
            };
            let year = year
                .parse::<i32>()
                .map_err(|_| DateParseError::InvalidComponent)?;
            let month = month
                .parse::<u8>()
                .map_err(|_| DateParseError::InvalidComponent)?;
            let day = day
                .parse::<u8>()
                .map_err(|_| DateParseError::InvalidComponent)?;
            Ok(Self { year, month, day })
        }

        /// A record expires on the day printed on it: an expiry equal to today
        /// is already expired, only a strictly later expiry still protects.
        pub fn is_expired_by(self, today: CalendarDate) -> bool {
            self <= today
        }
    }

    impl std::fmt::Display for CalendarDate {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:04}/{:02}/{:02}", self.year, self.month, self.day)
        }
    }
}
