pub mod analyze;
pub mod optimize;
pub mod scan;

use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;

const MAX_LISTED_FAILURES: usize = 20;

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(payload) => println!("{payload}"),
        Err(err) => warn!("Failed to serialize report: {err}"),
    }
}

fn print_failures(failures: &BTreeMap<String, String>) {
    if failures.is_empty() {
        return;
    }
    println!();
    println!("Failed instruments ({}):", failures.len());
    for (symbol, reason) in failures.iter().take(MAX_LISTED_FAILURES) {
        println!("  {:<10} {}", symbol, reason);
    }
    if failures.len() > MAX_LISTED_FAILURES {
        println!("  ... and {} more", failures.len() - MAX_LISTED_FAILURES);
    }
}

fn signed_percent(value: f64) -> String {
    format!("{}{:.2}%", if value >= 0.0 { "+" } else { "" }, value)
}
