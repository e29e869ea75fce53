// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::{Duration, TimeSpan};

#[test]
fn convert_from_std_duration() {
    let std = std::time::Duration::new(3, 141_592_653);
    let concrete: Duration = std.into();
    assert_eq!(std.as_secs(), concrete.secs);
    assert_eq!(std.subsec_nanos(), concrete.nanos);
}

#[test]
fn convert_into_std_duration() {
    let concrete = Duration::new(3, 141_592_653);
    let std: std::time::Duration = concrete.into();
    assert_eq!(concrete.secs, std.as_secs());
    assert_eq!(concrete.nanos, std.subsec_nanos());
}

#[test]
fn time_span_since() {
    let start = std::time::SystemTime::now();
    let sleep_duration = std::time::Duration::from_millis(1);
    std::thread::sleep(sleep_duration);
    let span = TimeSpan::since(&start);
    assert!(std::convert::Into::<std::time::Duration>::into(span.duration) >= sleep_duration);
    assert_eq!(
        start
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap(),
        span.start.into()
    );
}

#[test]
fn time_span_from_start_and_end() {
    let start = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(42);
    let end = start + std::time::Duration::from_secs(10);
    let span = TimeSpan::from_start_and_end_systemtime(&start, &end);
    assert_eq!(
        TimeSpan {
            start: Duration::new(42, 0),
            duration: Duration::new(10, 0),
        },
        span
    );

    // A span that ends before it starts is clamped to a zero duration.
    let span = TimeSpan::from_start_and_end_systemtime(&end, &start);
    assert_eq!(Duration::new(0, 0), span.duration);
}
