//! CNR (Case Number Record) identifier handling.
//!
//! A CNR is a fixed 16-character alphanumeric key, e.g. `KLER150000052020`:
//! state code (2), district code (2), establishment code (4), then the
//! case serial and year. The portal's history endpoints want the segments
//! separately, so they are exposed as accessors instead of being re-split
//! at every call site.

use serde::{Deserialize, Serialize};

use crate::core::error::HarvestError;

pub const CNR_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CnrNumber(String);

impl CnrNumber {
    pub fn parse(raw: &str) -> Result<Self, HarvestError> {
        let trimmed = raw.trim().to_ascii_uppercase();
        if trimmed.len() != CNR_LEN {
            return Err(HarvestError::InvalidCnr {
                value: raw.to_string(),
                reason: format!("expected {} characters, got {}", CNR_LEN, trimmed.len()),
            });
        }
        if !trimmed.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(HarvestError::InvalidCnr {
                value: raw.to_string(),
                reason: "contains non-alphanumeric characters".to_string(),
            });
        }
        if !trimmed.as_bytes()[..2].iter().all(u8::is_ascii_alphabetic) {
            return Err(HarvestError::InvalidCnr {
                value: raw.to_string(),
                reason: "state code must be alphabetic".to_string(),
            });
        }
        Ok(CnrNumber(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn state_code(&self) -> &str {
        &self.0[0..2]
    }

    pub fn district_code(&self) -> &str {
        &self.0[2..4]
    }

    pub fn establishment_code(&self) -> &str {
        &self.0[4..8]
    }

    /// Case serial + year remainder, as the `viewBusiness` endpoint wants it.
    pub fn case_part(&self) -> &str {
        &self.0[8..16]
    }
}

impl std::fmt::Display for CnrNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CnrNumber {
    type Error = HarvestError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        CnrNumber::parse(&value)
    }
}

impl From<CnrNumber> for String {
    fn from(value: CnrNumber) -> Self {
        value.0
    }
}

/// Expands `PREFIX:START-END:YEAR` into consecutive CNRs, zero-padding the
/// serial to six digits (`KLHC01:125960-125970:2025` → `KLHC011259602025` …).
#[derive(Debug, Clone)]
pub struct CnrRange {
    pub prefix: String,
    pub start: u32,
    pub end: u32,
    pub year: String,
}

impl CnrRange {
    pub fn parse(spec: &str) -> Result<Self, HarvestError> {
        let bad = |reason: &str| HarvestError::InvalidCnr {
            value: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = spec.split(':');
        let prefix = parts.next().ok_or_else(|| bad("missing prefix"))?.trim();
        let serials = parts.next().ok_or_else(|| bad("missing serial range"))?;
        let year = parts.next().ok_or_else(|| bad("missing year"))?.trim();
        if parts.next().is_some() {
            return Err(bad("too many ':' separators"));
        }

        let (start, end) = serials
            .split_once('-')
            .ok_or_else(|| bad("serial range must be START-END"))?;
        let start: u32 = start.trim().parse().map_err(|_| bad("bad start serial"))?;
        let end: u32 = end.trim().parse().map_err(|_| bad("bad end serial"))?;
        if end < start {
            return Err(bad("end serial before start serial"));
        }
        if prefix.len() + 6 + year.len() != CNR_LEN {
            return Err(bad("prefix + 6-digit serial + year must total 16 characters"));
        }

        Ok(CnrRange {
            prefix: prefix.to_ascii_uppercase(),
            start,
            end,
            year: year.to_string(),
        })
    }

    pub fn expand(&self) -> Result<Vec<CnrNumber>, HarvestError> {
        (self.start..=self.end)
            .map(|serial| {
                CnrNumber::parse(&format!("{}{:06}{}", self.prefix, serial, self.year))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_segments_valid_cnr() {
        let cnr = CnrNumber::parse(" kler150000052020 ").unwrap();
        assert_eq!(cnr.as_str(), "KLER150000052020");
        assert_eq!(cnr.state_code(), "KL");
        assert_eq!(cnr.district_code(), "ER");
        assert_eq!(cnr.establishment_code(), "1500");
        assert_eq!(cnr.case_part(), "00052020");
    }

    #[test]
    fn rejects_wrong_length_and_bad_characters() {
        assert!(CnrNumber::parse("KL123").is_err());
        assert!(CnrNumber::parse("KLER15-000052020").is_err());
        assert!(CnrNumber::parse("12ER150000052020").is_err());
    }

    #[test]
    fn range_expansion_pads_serials() {
        let range = CnrRange::parse("KLHC01:125960-125962:2025").unwrap();
        let cnrs = range.expand().unwrap();
        assert_eq!(cnrs.len(), 3);
        assert_eq!(cnrs[0].as_str(), "KLHC011259602025");
        assert_eq!(cnrs[2].as_str(), "KLHC011259622025");
    }

    #[test]
    fn range_rejects_malformed_specs() {
        assert!(CnrRange::parse("KLHC01:125970-125960:2025").is_err());
        assert!(CnrRange::parse("KLHC01:125960:2025").is_err());
        assert!(CnrRange::parse("TOOLONGPREFIX:1-2:2025").is_err());
    }

    #[test]
    fn serde_round_trip_validates() {
        let cnr: CnrNumber = serde_json::from_str("\"KLWD030000802019\"").unwrap();
        assert_eq!(cnr.as_str(), "KLWD030000802019");
        assert!(serde_json::from_str::<CnrNumber>("\"nope\"").is_err());
    }
}
