// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostics: a `log` backend that writes lines to a byte sink, usually the
//! UART.
//!
//! Nothing here allocates. Each record is formatted into a fixed buffer and
//! anything that doesn't fit is cut off, so very long messages lose their
//! tail rather than stalling the flasher.

use core::fmt::Write;

use heapless::String;
use log::{LevelFilter, Log, Metadata, Record};

/// Longest line we emit, not counting the line ending.
const MAX_LINE: usize = 160;

/// Somewhere to put formatted log lines. Writes must not block indefinitely.
pub trait Sink: Send + Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

pub struct SinkLogger<S> {
    sink: S,
    level: LevelFilter,
}

impl<S: Sink> SinkLogger<S> {
    pub const fn new(sink: S, level: LevelFilter) -> Self {
        Self { sink, level }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

/// A `fmt::Write` that silently drops what doesn't fit.
struct Truncating(String<MAX_LINE>);

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl<S: Sink> Log for SinkLogger<S> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = Truncating(String::new());
        let _ = write!(line, "[FLASH] {:<5} {}", record.level(), record.args());
        self.sink.write_bytes(line.0.as_bytes());
        self.sink.write_bytes(b"\r\n");
    }

    fn flush(&self) {}
}

/// The level the firmware logs at unless built with `verbose`.
pub const fn default_level() -> LevelFilter {
    if cfg!(feature = "verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Makes `logger` the global logger. Only the first call has any effect.
pub fn install<S: Sink>(logger: &'static SinkLogger<S>) {
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
}
