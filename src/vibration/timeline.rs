use crate::vibration::pattern::{Pattern, SegmentKind};

const VIBRATE_CELL: char = '█';
const PAUSE_CELL: char = '·';

/// Draws the pattern as a proportional bar of `width` cells followed by its total duration.
/// Every non-zero segment gets at least one cell so short pauses stay visible.
pub fn render_timeline(pattern: &Pattern, width: usize) -> String {
    let total = pattern.total_ms();
    let width = width.max(pattern.len());
    let mut bar = String::with_capacity(width * 3);

    if total > 0 {
        for segment in pattern.segments() {
            if segment.duration_ms == 0 {
                continue;
            }
            let share = (segment.duration_ms as f64 / total as f64 * width as f64).round();
            let cells = (share as usize).max(1);
            let glyph = match segment.kind {
                SegmentKind::Vibrate => VIBRATE_CELL,
                SegmentKind::Pause => PAUSE_CELL,
            };
            bar.extend(std::iter::repeat_n(glyph, cells));
        }
    }

    format!("▕{bar}▏ {}", format_ms(total))
}

pub fn describe_segments(pattern: &Pattern) -> Vec<String> {
    pattern
        .segments()
        .iter()
        .map(|segment| {
            let label = match segment.kind {
                SegmentKind::Vibrate => "vibrate",
                SegmentKind::Pause => "pause",
            };
            format!(
                "{label:<7} {:>6} -> {:>6}  ({})",
                segment.start_ms,
                segment.start_ms.saturating_add(segment.duration_ms),
                format_ms(segment.duration_ms)
            )
        })
        .collect()
}

pub fn format_ms(ms: u64) -> String {
    if ms >= 10_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_reports_total_and_alternates_glyphs() {
        let pattern = Pattern::parse("100,50,100").expect("valid");
        let line = render_timeline(&pattern, 10);
        assert!(line.ends_with(" 250ms"));
        assert_eq!(line.matches(PAUSE_CELL).count(), 2);
        assert_eq!(line.matches(VIBRATE_CELL).count(), 8);
    }

    #[test]
    fn tiny_segments_still_get_a_cell() {
        let pattern = Pattern::parse("1000,1,1000").expect("valid");
        let line = render_timeline(&pattern, 20);
        assert_eq!(line.matches(PAUSE_CELL).count(), 1);
    }

    #[test]
    fn zero_length_pattern_renders_empty_bar() {
        let pattern = Pattern::parse("0").expect("valid");
        assert_eq!(render_timeline(&pattern, 10), "▕▏ 0ms");
    }

    #[test]
    fn segment_descriptions_cover_each_bar() {
        let pattern = Pattern::parse("100,50,100").expect("valid");
        let lines = describe_segments(&pattern);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("vibrate"));
        assert!(lines[1].starts_with("pause"));
    }

    #[test]
    fn long_durations_switch_to_seconds() {
        assert_eq!(format_ms(12_500), "12.5s");
        assert_eq!(format_ms(999), "999ms");
    }
}
