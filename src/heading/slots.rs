/// Wrap any finite heading into `[0, 360)`.
pub fn normalize_heading(value: f64) -> f64 {
    let wrapped = value.rem_euclid(360.0);
    // rem_euclid can land exactly on 360.0 for tiny negative inputs.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed angular distance from `prev` to `next` taking the shortest path
/// around the circle. Result is in `(-180, 180]`, so 359 -> 1 yields +2,
/// never -358.
pub fn shortest_delta_degrees(next: f64, prev: f64) -> f64 {
    (next - prev + 540.0).rem_euclid(360.0) - 180.0
}

/// Map a heading to one of `slots_total` equal angular slots.
pub fn slot_for_heading(heading: f64, slots_total: u32) -> u32 {
    debug_assert!(slots_total > 0);
    let slot_width = 360.0 / f64::from(slots_total);
    let slot = (normalize_heading(heading) / slot_width).floor() as u32;
    // Float rounding on headings just under 360 must not escape the ring.
    slot.min(slots_total - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_into_range() {
        assert_eq!(normalize_heading(0.0), 0.0);
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(725.0), 5.0);
        assert_eq!(normalize_heading(-90.0), 270.0);
        assert!((normalize_heading(-0.25) - 359.75).abs() < 1e-9);
    }

    #[test]
    fn shortest_delta_takes_wraparound_path() {
        assert_eq!(shortest_delta_degrees(1.0, 359.0), 2.0);
        assert_eq!(shortest_delta_degrees(359.0, 1.0), -2.0);
        assert_eq!(shortest_delta_degrees(10.0, 5.0), 5.0);
        assert_eq!(shortest_delta_degrees(0.0, 180.0), 180.0);
    }

    #[test]
    fn shortest_delta_stays_in_half_open_range() {
        let mut h1 = 0.0;
        while h1 < 360.0 {
            let mut h2 = 0.0;
            while h2 < 360.0 {
                let delta = shortest_delta_degrees(h2, h1);
                assert!(delta > -180.0 && delta <= 180.0, "delta({h2},{h1})={delta}");
                let rejoined = normalize_heading(h1 + delta);
                assert!(
                    (rejoined - normalize_heading(h2)).abs() < 1e-9,
                    "h1={h1} h2={h2} delta={delta}"
                );
                h2 += 7.3;
            }
            h1 += 11.1;
        }
    }

    #[test]
    fn slot_mapping_covers_the_ring() {
        assert_eq!(slot_for_heading(0.0, 24), 0);
        assert_eq!(slot_for_heading(14.9, 24), 0);
        assert_eq!(slot_for_heading(15.0, 24), 1);
        assert_eq!(slot_for_heading(359.9, 24), 23);
        assert_eq!(slot_for_heading(-1.0, 24), 23);
        assert_eq!(slot_for_heading(725.0, 24), 0);
    }

    #[test]
    fn slot_mapping_is_total_and_bounded() {
        for slots in [1u32, 2, 8, 24, 36] {
            let mut heading = -720.0;
            while heading < 720.0 {
                let slot = slot_for_heading(heading, slots);
                assert!(slot < slots, "slot_for_heading({heading},{slots})={slot}");
                heading += 0.37;
            }
        }
    }
}
