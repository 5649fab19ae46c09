///! Embedded offline element set
///!
///! Used when every remote source fails so the tracker always has at least
///! one object to follow.
use orbtrack_common::{ElementSet, OFFLINE_FALLBACK_SOURCE};

use super::parser::parse_element_set;
use crate::error::{TrackerError, TrackerResult};

/// (name, line 1, line 2)
const OFFLINE_ELEMENTS: &[(&str, &str, &str)] = &[(
    "ISS (ZARYA)",
    "1 25544U 98067A   23311.54897410  .00010850  00000+0  19855-3 0  9992",
    "2 25544  51.6434 207.4032 0006396  92.0988  19.3512 15.49439215224342",
)];

/// Parse the embedded element sets. Any failure here is a fatal configuration error.
pub fn offline_element_sets() -> TrackerResult<Vec<ElementSet>> {
    build(OFFLINE_ELEMENTS)
}

fn build(entries: &[(&str, &str, &str)]) -> TrackerResult<Vec<ElementSet>> {
    let sets = entries
        .iter()
        .map(|(name, l1, l2)| {
            parse_element_set(Some(name), l1, l2, OFFLINE_FALLBACK_SOURCE).map_err(|e| {
                TrackerError::config(format!("embedded element set '{}' is malformed: {}", name, e))
            })
        })
        .collect::<TrackerResult<Vec<_>>>()?;

    if sets.is_empty() {
        return Err(TrackerError::config("no embedded element sets available"));
    }
    Ok(sets)
}
