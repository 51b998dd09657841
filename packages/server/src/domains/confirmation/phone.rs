//! Destination phone resolution.
//!
//! A contract's customer may carry a number in several places. Resolution
//! walks an explicit priority list and takes the first non-blank match:
//!
//! 1. explicit home number
//! 2. explicit work number
//! 3. explicit project-manager number
//! 4. phone record flagged primary
//! 5. any phone record
//! 6. primary contact's mobile
//! 7. primary contact's phone

use crate::domains::confirmation::models::CustomerProjection;

type Extractor = fn(&CustomerProjection) -> Option<String>;

const EXTRACTORS: &[Extractor] = &[
    |c| c.home_phone.clone(),
    |c| c.work_phone.clone(),
    |c| c.project_manager_phone.clone(),
    |c| {
        c.phone_records
            .iter()
            .find(|p| p.is_primary)
            .map(|p| p.number.clone())
    },
    |c| c.phone_records.first().map(|p| p.number.clone()),
    |c| {
        c.contacts
            .iter()
            .find(|ct| ct.is_primary)
            .and_then(|ct| ct.mobile.clone())
    },
    |c| {
        c.contacts
            .iter()
            .find(|ct| ct.is_primary)
            .and_then(|ct| ct.phone.clone())
    },
];

/// First non-blank number in priority order, or None.
pub fn resolve_phone(customer: &CustomerProjection) -> Option<String> {
    EXTRACTORS
        .iter()
        .filter_map(|extract| extract(customer))
        .map(|n| n.trim().to_string())
        .find(|n| !n.is_empty())
}

/// Normalize a local number to the E.164-style format the gateway expects.
///
/// Already-prefixed numbers pass through; a leading "0" is replaced with
/// the default country code. Separators and whitespace are stripped.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> String {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if digits.starts_with('+') {
        digits
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("{}{}", default_country_code, rest)
    } else {
        format!("{}{}", default_country_code, digits)
    }
}
