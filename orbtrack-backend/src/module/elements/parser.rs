///! Two/three-line element parser and validator
///!
///! Accepts the plain-text catalog format served by CelesTrak: an optional
///! name line followed by element lines "1 ..." and "2 ...".
use std::sync::LazyLock;

use orbtrack_common::{CatalogId, ElementSet};
use regex::Regex;
use thiserror::Error;

/// Fixed width of an element line, checksum included
pub const LINE_LENGTH: usize = 69;

static LINE1_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^1 [0-9 ]{4}[0-9][A-Z ] .{8} [0-9 ]{2}[0-9]{3}\.[0-9]{8} .{10} .{8} .{8} [0-9 ] [0-9 ]{4}[0-9]$",
    )
    .expect("line 1 pattern is valid")
});

static LINE2_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^2 [0-9 ]{4}[0-9] [ 0-9]{3}\.[0-9]{4} [ 0-9]{3}\.[0-9]{4} [0-9]{7} [ 0-9]{3}\.[0-9]{4} [ 0-9]{3}\.[0-9]{4} [ 0-9]{2}\.[0-9]{8}[ 0-9]{5}[0-9]$",
    )
    .expect("line 2 pattern is valid")
});

#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("line {line} has length {found}, expected {LINE_LENGTH}")]
    Length { line: u8, found: usize },

    #[error("line {0} does not match the element field layout")]
    Format(u8),

    #[error("line {line} checksum mismatch: computed {computed}, stored {stored}")]
    Checksum { line: u8, computed: u8, stored: u8 },

    #[error("catalog numbers differ between lines ({0} vs {1})")]
    CatalogMismatch(CatalogId, CatalogId),

    #[error("elements rejected by propagator parser: {0}")]
    Elements(String),
}

/// Modulo-10 checksum over the first 68 columns: digits count their value, '-' counts 1
pub fn checksum(line: &str) -> u8 {
    let sum: u32 = line
        .bytes()
        .take(LINE_LENGTH - 1)
        .map(|b| match b {
            b'0'..=b'9' => (b - b'0') as u32,
            b'-' => 1,
            _ => 0,
        })
        .sum();
    (sum % 10) as u8
}

fn check_line(line: &str, number: u8) -> Result<CatalogId, LineError> {
    if line.len() != LINE_LENGTH {
        return Err(LineError::Length {
            line: number,
            found: line.len(),
        });
    }

    let format = if number == 1 { &LINE1_FORMAT } else { &LINE2_FORMAT };
    if !format.is_match(line) {
        return Err(LineError::Format(number));
    }

    let stored = line.as_bytes()[LINE_LENGTH - 1] - b'0';
    let computed = checksum(line);
    if stored != computed {
        return Err(LineError::Checksum {
            line: number,
            computed,
            stored,
        });
    }

    line[2..7]
        .trim()
        .parse()
        .map_err(|_| LineError::Format(number))
}

/// Validate one element line pair and return its catalog number
pub fn validate_pair(line1: &str, line2: &str) -> Result<CatalogId, LineError> {
    let id1 = check_line(line1, 1)?;
    let id2 = check_line(line2, 2)?;
    if id1 != id2 {
        return Err(LineError::CatalogMismatch(id1, id2));
    }
    Ok(id1)
}

/// Parse one validated entry into an [`ElementSet`]
pub fn parse_element_set(
    name: Option<&str>,
    line1: &str,
    line2: &str,
    source: &str,
) -> Result<ElementSet, LineError> {
    let catalog_id = validate_pair(line1, line2)?;

    let elements = sgp4::Elements::from_tle(
        name.map(str::to_string),
        line1.as_bytes(),
        line2.as_bytes(),
    )
    .map_err(|e| LineError::Elements(e.to_string()))?;

    let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => format!("NORAD {}", catalog_id),
    };

    Ok(ElementSet {
        catalog_id,
        name,
        line1: line1.to_string(),
        line2: line2.to_string(),
        epoch: elements.datetime.and_utc(),
        source: source.to_string(),
    })
}

/// Result of parsing a whole catalog payload
#[derive(Debug, Default)]
pub struct ParsedPayload {
    pub sets: Vec<ElementSet>,
    pub rejected: Vec<(String, LineError)>,
}

/// Parse a catalog payload. Invalid entries are collected in `rejected`, never fatal.
pub fn parse_payload(text: &str, source: &str) -> ParsedPayload {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut parsed = ParsedPayload::default();
    let mut i = 0;

    while i < lines.len() {
        let current = lines[i];
        let next = lines.get(i + 1).copied();
        let after = lines.get(i + 2).copied();

        let (name, line1, line2, step) = match (next, after) {
            (Some(l2), _) if current.starts_with("1 ") && l2.starts_with("2 ") => {
                (None, current, l2, 2)
            }
            (Some(l1), Some(l2)) if l1.starts_with("1 ") && l2.starts_with("2 ") => {
                // 3LE name lines may carry a leading "0 "
                let name = current.strip_prefix("0 ").unwrap_or(current);
                (Some(name), l1, l2, 3)
            }
            _ => {
                i += 1;
                continue;
            }
        };

        match parse_element_set(name, line1, line2, source) {
            Ok(set) => parsed.sets.push(set),
            Err(e) => {
                let label = name.map(str::to_string).unwrap_or_else(|| line1.to_string());
                parsed.rejected.push((label, e));
            }
        }
        i += step;
    }

    parsed
}
