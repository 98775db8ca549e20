use std::fmt::Write;

use common::{Direction, Signal};

pub fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::High => "High🔴🔴 RSI Alert +85",
        Direction::Low => "Low🟢🟢🟢 RSI Alert 15-",
    }
}

/// Render the operator-facing alert text for a signal.
pub fn render(signal: &Signal, signature: Option<&str>) -> String {
    let mut text = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(text, "💰: {}.P", signal.symbol);
    let _ = writeln!(text, "🔔: {}", direction_label(signal.direction));
    for (timeframe, reading) in signal.snapshot.iter() {
        let _ = writeln!(
            text,
            "RSI {timeframe}: {:.2} | Close: {:.5}",
            reading.rsi, reading.close
        );
    }
    let _ = write!(text, "Last Price: {:.5}", signal.last_price);
    if let Some(signature) = signature.filter(|s| !s.is_empty()) {
        let _ = write!(text, "\n{signature}");
    }
    text
}
