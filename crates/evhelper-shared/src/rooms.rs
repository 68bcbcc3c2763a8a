//! City-room key normalization.
//!
//! Two city spellings that normalize to the same key are treated as the same
//! room everywhere: the fanout layer uses the key for broadcast scoping and
//! the store indexes it for city-scoped queries, so the two views of "which
//! city is this" can never disagree.

/// Prefix applied to every normalized city key.
const ROOM_PREFIX: &str = "city-";

/// Normalize a free-text city name into a canonical room key.
///
/// Lowercases, trims, collapses whitespace runs into single hyphens, and
/// strips every remaining character outside `[a-z0-9-]`.
///
/// ```
/// use evhelper_shared::rooms::room_key;
///
/// assert_eq!(room_key("  New  York "), "city-new-york");
/// assert_eq!(room_key("São Paulo"), "city-so-paulo");
/// ```
pub fn room_key(city: &str) -> String {
    let mut key = String::with_capacity(ROOM_PREFIX.len() + city.len());
    key.push_str(ROOM_PREFIX);

    let mut pending_hyphen = false;
    for c in city.trim().to_lowercase().chars() {
        if c.is_whitespace() {
            pending_hyphen = true;
            continue;
        }
        let c = if pending_hyphen && (c.is_ascii_alphanumeric() || c == '-') {
            key.push('-');
            pending_hyphen = false;
            c
        } else {
            c
        };
        if c.is_ascii_alphanumeric() || c == '-' {
            key.push(c);
        }
    }

    key
}
