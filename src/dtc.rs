//! Module for OBD-II (SAE J2012) diagnostic trouble codes

use std::fmt::{Display, Formatter};

use strum_macros::{Display as StrumDisplay, EnumIter, FromRepr};

use crate::{ObdError, ObdResult};

/// System a DTC belongs to. Encoded in the top 2 bits of the first DTC byte
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, FromRepr, StrumDisplay)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DtcPrefix {
    /// Engine and transmission
    #[strum(to_string = "P")]
    Powertrain = 0b00,
    /// Chassis
    #[strum(to_string = "C")]
    Chassis = 0b01,
    /// Body
    #[strum(to_string = "B")]
    Body = 0b10,
    /// Network and vehicle integration
    #[strum(to_string = "U")]
    Network = 0b11,
}

/// Diagnostic trouble code, such as `P0301`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dtc {
    prefix: DtcPrefix,
    digits: [u8; 4],
}

impl Dtc {
    /// Creates a DTC. The first digit must be 0-3, the others 0x0-0xF
    pub fn new(prefix: DtcPrefix, digits: [u8; 4]) -> ObdResult<Self> {
        if digits[0] > 3 || digits[1..].iter().any(|d| *d > 0x0F) {
            return Err(ObdError::InvalidParameter);
        }
        Ok(Self { prefix, digits })
    }

    /// Decodes the 2 byte wire form
    ///
    /// ```text
    /// byte 0: PP DD dddd   (prefix, digit 1, digit 2)
    /// byte 1: dddd dddd    (digit 3, digit 4)
    /// ```
    pub fn from_bytes(raw: [u8; 2]) -> Self {
        let prefix = DtcPrefix::from_repr(raw[0] >> 6).unwrap_or(DtcPrefix::Network);
        Self {
            prefix,
            digits: [
                (raw[0] >> 4) & 0x03,
                raw[0] & 0x0F,
                raw[1] >> 4,
                raw[1] & 0x0F,
            ],
        }
    }

    /// Encodes to the 2 byte wire form
    pub fn to_bytes(&self) -> [u8; 2] {
        [
            (self.prefix as u8) << 6 | self.digits[0] << 4 | self.digits[1],
            self.digits[2] << 4 | self.digits[3],
        ]
    }

    /// System the DTC belongs to
    pub fn prefix(&self) -> DtcPrefix {
        self.prefix
    }

    /// The 4 digits following the prefix
    pub fn digits(&self) -> [u8; 4] {
        self.digits
    }
}

impl Display for Dtc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix)?;
        for d in self.digits {
            write!(f, "{d:X}")?;
        }
        Ok(())
    }
}

/// Renders the 5 character form of a DTC (e.g. `"P0301"`)
pub fn dtc_to_string(dtc: &Dtc) -> String {
    dtc.to_string()
}
