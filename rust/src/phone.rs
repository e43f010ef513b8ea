use std::collections::HashMap;

/// Providers disagree on formatting (`+55 (11) 99999-0000`, `5511999990000@s.whatsapp.net`,
/// bare digits); every per-contact map in the crate keys by the digits-only form.
pub fn normalize_phone(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

const SUFFIX_MATCH_DIGITS: usize = 8;

/// Two addresses refer to the same contact when their digits agree, or when both are long
/// enough and agree on the last eight digits (country/area prefixes are applied
/// inconsistently across providers).
pub fn phones_match(left: &str, right: &str) -> bool {
    let a = normalize_phone(left);
    let b = normalize_phone(right);
    if a == b {
        return !a.is_empty();
    }
    a.len() >= SUFFIX_MATCH_DIGITS
        && b.len() >= SUFFIX_MATCH_DIGITS
        && a[a.len() - SUFFIX_MATCH_DIGITS..] == b[b.len() - SUFFIX_MATCH_DIGITS..]
}

/// Digits with the Brazilian country code, the form the messaging backends address by.
pub fn to_whatsapp_address(input: &str) -> String {
    let digits = normalize_phone(input);
    if digits.is_empty() || digits.starts_with("55") {
        digits
    } else {
        format!("55{digits}")
    }
}

/// Key of the per-contact entry `phone` refers to, or the normalised form for a new entry.
pub(crate) fn contact_key<V>(map: &HashMap<String, V>, phone: &str) -> String {
    let normalized = normalize_phone(phone);
    if map.contains_key(&normalized) {
        return normalized;
    }
    map.keys()
        .find(|k| phones_match(k, &normalized))
        .cloned()
        .unwrap_or(normalized)
}
