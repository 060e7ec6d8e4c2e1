use chrono::NaiveDate;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::AdapterError;

/// Converts a 12-hour time like "7:30pm" to "19:30". Empty input stays empty.
pub fn to_24hr(value: &str) -> Result<String, AdapterError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }

    let lower = value.to_ascii_lowercase();
    let (clock, offset) = if let Some(clock) = lower.strip_suffix("am") {
        (clock, 0)
    } else if let Some(clock) = lower.strip_suffix("pm") {
        (clock, 12)
    } else {
        return Err(AdapterError::decoding("time", format!("missing am/pm suffix in {value:?}")));
    };

    let (hours, minutes) = clock
        .trim()
        .split_once(':')
        .ok_or_else(|| AdapterError::decoding("time", format!("expected h:mm in {value:?}")))?;
    let hours: u32 = hours
        .parse()
        .map_err(|e| AdapterError::decoding("time", format!("{value:?}: {e}")))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|e| AdapterError::decoding("time", format!("{value:?}: {e}")))?;
    if !(1..=12).contains(&hours) || minutes > 59 {
        return Err(AdapterError::decoding("time", format!("out of range: {value:?}")));
    }

    // 12am is midnight, 12pm is noon.
    let hours = hours % 12 + offset;
    Ok(format!("{hours:02}:{minutes:02}"))
}

/// Truncates upstream timestamps such as "2022-08-31-00.00.00.000000" to
/// "2022-08-31". Empty input stays empty.
pub fn iso_date(value: &str) -> Result<String, AdapterError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    let date = value
        .get(..10)
        .ok_or_else(|| AdapterError::decoding("date", format!("too short: {value:?}")))?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| AdapterError::decoding("date", format!("{value:?}: {e}")))?;
    Ok(date.to_string())
}

/// "2022 Fall" -> "Fall 2022".
pub fn reverse_semester_order(value: &str) -> Result<String, AdapterError> {
    let (year, season) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| AdapterError::decoding("semester", format!("expected \"<year> <term>\", got {value:?}")))?;
    Ok(format!("{} {}", season.trim(), year))
}

/// One-way hash of an opaque upstream key, hex encoded.
pub fn stable_id(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Upstream fields that carry either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }

    /// Number of positions this field contributes when zipping parallel lists.
    pub(crate) fn width(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(v) => v.len(),
        }
    }

    /// A scalar applies to every index; a list yields its own element.
    pub(crate) fn at(&self, index: usize) -> Option<&str> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(v) => v.get(index).map(String::as_str),
        }
    }
}

/// Normalizes an optional string-or-list field into a list, dropping blanks.
pub(crate) fn string_list(value: Option<OneOrMany>) -> Vec<String> {
    value
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn is_yes(flag: Option<&str>) -> bool {
    matches!(flag.map(str::trim), Some("Y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_hour_times_convert() {
        assert_eq!(to_24hr("7:30pm").unwrap(), "19:30");
        assert_eq!(to_24hr("12:00pm").unwrap(), "12:00");
        assert_eq!(to_24hr("12:00am").unwrap(), "00:00");
        assert_eq!(to_24hr("9:05am").unwrap(), "09:05");
        assert_eq!(to_24hr("12:45am").unwrap(), "00:45");
        assert_eq!(to_24hr("11:59PM").unwrap(), "23:59");
        assert_eq!(to_24hr("").unwrap(), "");
    }

    #[test]
    fn malformed_times_are_decoding_errors() {
        for bad in ["7:30", "pm", "13:00pm", "7:75am", "seven:30pm"] {
            assert!(
                matches!(to_24hr(bad), Err(AdapterError::Decoding { .. })),
                "{bad} should fail"
            );
        }
    }

    #[test]
    fn dates_truncate_to_iso() {
        assert_eq!(iso_date("2022-08-31-00.00.00.000000").unwrap(), "2022-08-31");
        assert_eq!(iso_date("2022-12-01").unwrap(), "2022-12-01");
        assert_eq!(iso_date("").unwrap(), "");
        assert!(iso_date("12/01/2022").is_err());
        assert!(iso_date("2022").is_err());
    }

    #[test]
    fn semester_order_is_reversed() {
        assert_eq!(reverse_semester_order("2022 Fall").unwrap(), "Fall 2022");
        assert_eq!(reverse_semester_order("2023 Spring").unwrap(), "Spring 2023");
        assert!(reverse_semester_order("Fall").is_err());
    }

    #[test]
    fn stable_id_is_deterministic_hex() {
        let a = stable_id("subject=AFRAMER&catnbr=%20%2011&strm=2228");
        assert_eq!(a, stable_id("subject=AFRAMER&catnbr=%20%2011&strm=2228"));
        assert_ne!(a, stable_id("subject=AFRAMER&catnbr=%20%2012&strm=2228"));
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn string_or_list_fields_normalize_to_lists() {
        let one: OneOrMany = serde_json::from_str("\"HSI\"").unwrap();
        let many: OneOrMany = serde_json::from_str("[\"E&C\", \" \", \"STS\"]").unwrap();
        assert_eq!(string_list(Some(one)), vec!["HSI"]);
        assert_eq!(string_list(Some(many)), vec!["E&C", "STS"]);
        assert!(string_list(None).is_empty());
    }
}
