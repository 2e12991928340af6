use crate::model::{Id, RangeData};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Where a position lies relative to a range. Both range ends are inclusive.
pub fn compare_position(range: &RangeData, line: u32, character: u32) -> Ordering {
    if line < range.start_line {
        return Ordering::Less;
    }
    if line > range.end_line {
        return Ordering::Greater;
    }
    if line == range.start_line && character < range.start_character {
        return Ordering::Less;
    }
    if line == range.end_line && character > range.end_character {
        return Ordering::Greater;
    }
    Ordering::Equal
}

pub fn contains_position(range: &RangeData, line: u32, character: u32) -> bool {
    compare_position(range, line, character) == Ordering::Equal
}

/// Every range enclosing the position, outermost first.
pub fn find_ranges(ranges: &HashMap<Id, RangeData>, line: u32, character: u32) -> Vec<RangeData> {
    let mut found: Vec<(&Id, &RangeData)> = ranges
        .iter()
        .filter(|(_, range)| contains_position(range, line, character))
        .collect();
    found.sort_by(|(a_id, a), (b_id, b)| outside_in(a, b).then_with(|| a_id.cmp(b_id)));
    found.into_iter().map(|(_, range)| range.clone()).collect()
}

/// Outer ranges sort before the ranges they enclose.
fn outside_in(a: &RangeData, b: &RangeData) -> Ordering {
    (a.start_line, a.start_character)
        .cmp(&(b.start_line, b.start_character))
        .then_with(|| (b.end_line, b.end_character).cmp(&(a.end_line, a.end_character)))
}

/// True when the range starts or ends inside `[start_line, end_line)`.
pub fn range_intersects_span(range: &RangeData, start_line: u32, end_line: u32) -> bool {
    (start_line <= range.start_line && range.start_line < end_line)
        || (start_line <= range.end_line && range.end_line < end_line)
}

pub fn encloses(outer: &RangeData, inner: &RangeData) -> bool {
    (outer.start_line, outer.start_character) <= (inner.start_line, inner.start_character)
        && (outer.end_line, outer.end_character) >= (inner.end_line, inner.end_character)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(items: &[(&str, RangeData)]) -> HashMap<Id, RangeData> {
        items
            .iter()
            .map(|(id, range)| (id.to_string(), range.clone()))
            .collect()
    }

    #[test]
    fn compare_position_is_inclusive() {
        let range = RangeData::new(1, 5, 1, 10);
        assert_eq!(compare_position(&range, 1, 5), Ordering::Equal);
        assert_eq!(compare_position(&range, 1, 10), Ordering::Equal);
        assert_eq!(compare_position(&range, 1, 4), Ordering::Less);
        assert_eq!(compare_position(&range, 1, 11), Ordering::Greater);
        assert_eq!(compare_position(&range, 0, 7), Ordering::Less);
        assert_eq!(compare_position(&range, 2, 0), Ordering::Greater);
    }

    #[test]
    fn find_ranges_orders_outside_in() {
        let table = ranges(&[
            ("inner", RangeData::new(2, 4, 2, 8)),
            ("outer", RangeData::new(0, 0, 10, 0)),
            ("middle", RangeData::new(2, 0, 3, 0)),
            ("elsewhere", RangeData::new(5, 0, 6, 0)),
        ]);
        let found = find_ranges(&table, 2, 5);
        assert_eq!(
            found,
            vec![
                RangeData::new(0, 0, 10, 0),
                RangeData::new(2, 0, 3, 0),
                RangeData::new(2, 4, 2, 8),
            ]
        );
        for pair in found.windows(2) {
            assert!(encloses(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn span_intersection_uses_half_open_span() {
        let range = RangeData::new(3, 0, 5, 0);
        assert!(range_intersects_span(&range, 3, 4));
        assert!(range_intersects_span(&range, 5, 6));
        assert!(!range_intersects_span(&range, 0, 3));
        assert!(!range_intersects_span(&range, 6, 9));
    }
}
