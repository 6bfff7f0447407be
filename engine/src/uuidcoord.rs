//! Beacon UUID coordinate extraction: the beacon's fixed-point millimeter
//! `(x, y)` location is embedded directly in its UUID string at fixed byte
//! offsets, `[12..20)` for x and `[24..32)` for y, each an 8-digit decimal
//! integer (`SqlWrapper.c`'s `INDEX_OF_COORDINATE_X_IN_UUID` /
//! `INDEX_OF_COORDINATE_Y_IN_UUID` / `LENGTH_OF_COORDINATE_IN_UUID`).

use crate::error::{EngineError, Result};

const COORD_X_RANGE: std::ops::Range<usize> = 12..20;
const COORD_Y_RANGE: std::ops::Range<usize> = 24..32;

/// Slices the embedded x/y millimeter coordinates out of a beacon UUID.
///
/// Returns `SqlParse` if the UUID is too short to contain both fields or if
/// either field is not a valid decimal integer (the original used `atoi`,
/// which silently returns 0 on a bad parse; we reject instead so a
/// malformed UUID never lands a beacon at the origin unnoticed).
pub fn extract_coordinates(uuid: &str) -> Result<(i32, i32)> {
    if uuid.len() < COORD_Y_RANGE.end {
        return Err(EngineError::SqlParse(format!(
            "beacon uuid too short to contain embedded coordinates: {uuid}"
        )));
    }
    let x_str = &uuid[COORD_X_RANGE];
    let y_str = &uuid[COORD_Y_RANGE];
    let x = x_str
        .parse::<i32>()
        .map_err(|_| EngineError::SqlParse(format!("bad x coordinate in uuid: {x_str}")))?;
    let y = y_str
        .parse::<i32>()
        .map_err(|_| EngineError::SqlParse(format!("bad y coordinate in uuid: {y_str}")))?;
    Ok((x, y))
}

/// Formats a coordinate the way it would appear embedded in a UUID
/// (8-digit, zero-padded decimal) — used by tests to round-trip.
pub fn format_coordinate(v: i32) -> String {
    format!("{v:08}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_coordinates_from_known_uuid() {
        let uuid = "0000000000010000123400000000567800000000";
        let (x, y) = extract_coordinates(uuid).unwrap();
        assert_eq!(x, 1234);
        assert_eq!(y, 5678);
    }

    #[test]
    fn round_trips_through_format_coordinate() {
        let uuid = "0000000000010000123400000000567800000000";
        assert_eq!(&uuid[12..20], format_coordinate(1234));
        assert_eq!(&uuid[24..32], format_coordinate(5678));
    }

    #[test]
    fn rejects_short_uuid() {
        assert!(extract_coordinates("0000").is_err());
    }

    #[test]
    fn rejects_non_numeric_field() {
        let uuid = "000000000001xxxx123400000000567800000000";
        assert!(extract_coordinates(uuid).is_err());
    }
}
