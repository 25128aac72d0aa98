// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Terminal output for the demos.
//!
//! Respects NO_COLOR and FORCE_COLOR.

use colored::{ColoredString, Colorize};

pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

/// Name of the current OS thread, for showing which worker ran a step.
pub fn thread_tag() -> ColoredString {
    let name = std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string();
    format!("[{name}]").dimmed()
}

pub fn step(msg: &str) {
    println!("{} {}", thread_tag(), msg);
}

pub fn result(label: &str, value: impl std::fmt::Display) {
    println!("{} {}", format!("{label}:").green().bold(), value);
}

pub fn banner(title: &str) {
    println!("{} {}", "===".dimmed(), title.cyan().bold());
}
