use introcat::timeline::{RenderGeometry, TextSpec, TypewriterEvent, build_timeline};

fn spec(lines: &[&str], duration: f64, char_delay: f64) -> TextSpec {
    TextSpec {
        lines: lines.iter().map(|line| line.to_string()).collect(),
        duration,
        char_delay,
        font: None,
    }
}

fn geometry() -> RenderGeometry {
    RenderGeometry {
        font_file: "font.ttf".to_string(),
        font_size: 40,
    }
}

fn events_for_line(events: &[TypewriterEvent], line: usize) -> Vec<&TypewriterEvent> {
    events.iter().filter(|event| event.line == line).collect()
}

#[test]
fn static_mode_is_a_single_full_overlay() {
    // duration=3.0, text=["Hello"], typewriter=false
    let timeline = build_timeline(&spec(&["Hello"], 3.0, 0.15), &geometry(), false);

    assert_eq!(timeline.events.len(), 1);
    let event = &timeline.events[0];
    assert_eq!((event.line, event.chars), (0, 5));
    assert_eq!(event.start, 0.0);
    assert_eq!(event.end, 3.0);

    assert_eq!(timeline.filter.matches("drawtext=").count(), 1);
    assert!(timeline.filter.contains("text='Hello'"));
    assert!(!timeline.filter.contains("enable="));
}

#[test]
fn short_line_is_not_compressed() {
    // duration=2.0, text=["Hi"], delay=0.15: naive total 0.30 <= 2.0
    let timeline = build_timeline(&spec(&["Hi"], 2.0, 0.15), &geometry(), true);

    assert_eq!(timeline.events.len(), 2);
    assert!((timeline.events[0].start - 0.0).abs() < 1e-9);
    assert!((timeline.events[0].end - 0.15).abs() < 1e-9);
    assert!((timeline.events[1].start - 0.15).abs() < 1e-9);
    assert_eq!(timeline.events[1].end, 2.0);

    assert!(timeline.filter.contains("between(t,0.000,0.150)"));
    assert!(timeline.filter.contains("between(t,0.150,2.000)"));
    assert!(timeline.filter.contains("text='H'"));
    assert!(timeline.filter.contains("text='Hi'"));
}

#[test]
fn long_line_compresses_proportionally() {
    // duration=1.0, 10 chars, delay=0.15: naive total 1.5 > 1.0, so the
    // delay scales by 1.0/1.5 and the last character ends at exactly 1.0.
    let timeline = build_timeline(&spec(&["HelloWorld"], 1.0, 0.15), &geometry(), true);

    assert_eq!(timeline.events.len(), 10);
    let effective = 0.15 * (1.0 / 1.5);
    for (index, event) in timeline.events.iter().enumerate() {
        assert_eq!(event.chars, index + 1);
        assert!((event.start - index as f64 * effective).abs() < 1e-9);
    }
    assert_eq!(timeline.events.last().unwrap().end, 1.0);
    assert!((timeline.events.last().unwrap().start - 0.9).abs() < 1e-9);
}

#[test]
fn build_is_deterministic() {
    let text = spec(&["First line", "Second's line"], 2.5, 0.1);
    let first = build_timeline(&text, &geometry(), true);
    let second = build_timeline(&text, &geometry(), true);

    assert_eq!(first.filter, second.filter);
    assert_eq!(first.events, second.events);
}

#[test]
fn no_event_overruns_and_every_character_appears() {
    let cases = [
        spec(&["Hello"], 3.0, 0.15),
        spec(&["HelloWorld", "x"], 1.0, 0.15),
        spec(&["a", "bb", "ccc"], 0.5, 0.3),
        spec(&["你好世界"], 2.0, 0.15),
        spec(&["exact"], 0.75, 0.15),
    ];

    for text in &cases {
        let timeline = build_timeline(text, &geometry(), true);
        for event in &timeline.events {
            assert!(
                event.end <= text.duration + 1e-9,
                "event overruns duration: {event:?}"
            );
            assert!(event.start <= event.end + 1e-9);
        }
        for (index, line) in text.lines.iter().enumerate() {
            let line_events = events_for_line(&timeline.events, index);
            if line.is_empty() {
                assert!(line_events.is_empty());
                continue;
            }
            // Strictly increasing reveal counts, ending on the full line.
            let counts: Vec<usize> = line_events.iter().map(|event| event.chars).collect();
            assert!(counts.windows(2).all(|pair| pair[0] < pair[1]));
            assert_eq!(*counts.last().unwrap(), line.chars().count());
            let starts: Vec<f64> = line_events.iter().map(|event| event.start).collect();
            assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }
}

#[test]
fn lines_compress_independently() {
    // Line 0 fits; line 1 does not and is compressed on its own.
    let timeline = build_timeline(&spec(&["ab", "HelloWorld!!"], 1.0, 0.15), &geometry(), true);

    let first = events_for_line(&timeline.events, 0);
    assert!((first[1].start - 0.15).abs() < 1e-9);

    let second = events_for_line(&timeline.events, 1);
    let compressed = 0.15 * (1.0 / (12.0 * 0.15));
    assert!((second[1].start - compressed).abs() < 1e-9);
    assert_eq!(second.last().unwrap().end, 1.0);
}

#[test]
fn stacked_lines_get_distinct_positions() {
    let timeline = build_timeline(&spec(&["one", "two"], 3.0, 0.15), &geometry(), false);

    assert_eq!(timeline.events.len(), 2);
    assert!(timeline.events.iter().all(|event| event.start == 0.0));
    assert!(timeline.events.iter().all(|event| event.end == 3.0));
    assert!(timeline.filter.contains("y=(h-text_h*2-60)/2,"));
    assert!(timeline.filter.contains("y=(h-text_h*2-60)/2+60"));
}

#[test]
fn unicode_counts_characters_not_bytes() {
    let timeline = build_timeline(&spec(&["你好"], 2.0, 0.15), &geometry(), true);

    assert_eq!(timeline.events.len(), 2);
    assert!(timeline.filter.contains("text='你'"));
    assert!(timeline.filter.contains("text='你好'"));
}

#[test]
fn quotes_and_backslashes_are_escaped_in_the_filter() {
    let timeline = build_timeline(&spec(&["it's a\\b"], 3.0, 0.15), &geometry(), false);
    assert!(timeline.filter.contains("text='it\\'s a\\\\b'"));
}

#[test]
fn empty_lines_produce_nothing() {
    let timeline = build_timeline(&spec(&[""], 3.0, 0.15), &geometry(), true);
    assert!(timeline.events.is_empty());
    assert!(timeline.filter.is_empty());
}

#[test]
fn zero_delay_still_reveals_everything() {
    let timeline = build_timeline(&spec(&["abc"], 2.0, 0.0), &geometry(), true);
    assert_eq!(timeline.events.len(), 3);
    assert_eq!(timeline.events.last().unwrap().chars, 3);
    assert_eq!(timeline.events.last().unwrap().end, 2.0);
}
