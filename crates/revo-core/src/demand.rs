//! Per-id demand windows.
//!
//! Each generator id is asked for one contiguous window in its own
//! coordinates covering every placement that references it. A placement of
//! length `L` whole notes at `offset` needs `[offset, offset + L)`.

use std::collections::BTreeMap;

use crate::document::{GenItem, ModItem};
use crate::timeline::Changes;

/// Half-open whole-note window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl Window {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Smallest window covering both.
    pub fn union(self, other: Window) -> Window {
        Window {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Fill in whole-note bounds of generator placements and fold them into one
/// window per referenced id.
pub fn generator_demand(items: &mut [GenItem], changes: &Changes) -> BTreeMap<String, Window> {
    let mut demand: BTreeMap<String, Window> = BTreeMap::new();

    for item in items.iter_mut() {
        item.note_start = changes.bar_to_whole_note(item.bar_start);
        item.note_end = changes.bar_to_whole_note(item.bar_end);

        let needed = Window::new(item.offset, item.offset + item.note_end - item.note_start);
        demand
            .entry(item.reference.clone())
            .and_modify(|window| *window = window.union(needed))
            .or_insert(needed);
    }

    demand
}

/// Fill in whole-note bounds of modifier placements.
///
/// Modifiers act on the assembled timeline directly, so there is no offset.
pub fn modifier_demand(items: &mut [ModItem], changes: &Changes) -> BTreeMap<String, Window> {
    let mut demand: BTreeMap<String, Window> = BTreeMap::new();

    for item in items.iter_mut() {
        item.note_start = changes.bar_to_whole_note(item.bar_start);
        item.note_end = changes.bar_to_whole_note(item.bar_end);

        let needed = Window::new(item.note_start, item.note_end);
        demand
            .entry(item.reference.clone())
            .and_modify(|window| *window = window.union(needed))
            .or_insert(needed);
    }

    demand
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::timeline::{Change, Meter};

    fn gen_item(reference: &str, bar_start: f64, bar_end: f64, offset: f64) -> GenItem {
        GenItem {
            channel: 0,
            track: 0,
            bar_start,
            bar_end,
            note_start: 0.0,
            note_end: 0.0,
            reference: reference.to_string(),
            offset,
            add: 0,
            sub: 0,
        }
    }

    fn three_four_from_bar_two() -> Changes {
        let meter = |n, d| Meter::new(n, d).unwrap();
        Changes::new(
            Change::new(0.0, Key::default(), meter(4, 4), 120.0),
            vec![Change::new(2.0, Key::default(), meter(3, 4), 120.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_generator_demand_unions_offsets() {
        let changes = Changes::constant(Key::default(), Meter::default(), 120.0);
        let mut items = vec![
            gen_item("a", 0.0, 2.0, 0.0),
            gen_item("a", 4.0, 5.0, -3.0),
            gen_item("a", 6.0, 8.0, 1.0),
            gen_item("b", 1.0, 2.0, 10.0),
        ];
        let demand = generator_demand(&mut items, &changes);
        assert_eq!(demand["a"], Window::new(-3.0, 3.0));
        assert_eq!(demand["b"], Window::new(10.0, 11.0));
        assert_eq!(items[1].note_start, 4.0);
        assert_eq!(items[1].note_end, 5.0);
    }

    #[test]
    fn test_generator_demand_follows_meter() {
        let changes = three_four_from_bar_two();
        let mut items = vec![gen_item("a", 1.0, 4.0, 0.0)];
        let demand = generator_demand(&mut items, &changes);
        // One 4/4 bar plus two 3/4 bars
        assert!((demand["a"].length() - 2.5).abs() < 1e-12);
        assert!((items[0].note_end - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_modifier_demand_has_no_offset() {
        let changes = three_four_from_bar_two();
        let target = "ch(0)/tr(0)".parse().unwrap();
        let mut items = vec![ModItem {
            bar_start: 2.0,
            bar_end: 4.0,
            note_start: 0.0,
            note_end: 0.0,
            reference: "m".to_string(),
            target,
        }];
        let demand = modifier_demand(&mut items, &changes);
        assert_eq!(demand["m"], Window::new(2.0, 3.5));
    }
}
