// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reassembles UTF-8 sequences split across pipe reads.
//!
//! Pipe reads use fixed-size buffers that can cut a multi-byte character in
//! half. Lossy conversion would replace both halves with U+FFFD, so the
//! trailing incomplete bytes are held back and prepended to the next read.

use std::borrow::Cow;

/// A code point is at most 4 bytes, so at most 3 can be pending.
const MAX_PARTIAL: usize = 4;

/// Buffers incomplete trailing UTF-8 bytes across successive `push` calls.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    partial: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self { partial: Vec::with_capacity(MAX_PARTIAL) }
    }

    /// Decode `data`, holding back an incomplete trailing sequence.
    ///
    /// Invalid bytes become U+FFFD. Borrows when nothing is pending and the
    /// input is already valid.
    pub fn push<'a>(&mut self, data: &'a [u8]) -> Cow<'a, str> {
        if self.partial.is_empty() {
            if let Ok(s) = std::str::from_utf8(data) {
                return Cow::Borrowed(s);
            }
        }

        let mut combined = std::mem::take(&mut self.partial);
        combined.extend_from_slice(data);

        let mut out = String::with_capacity(combined.len());
        let mut rest = combined.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated sequence at the end of input.
                            self.partial.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        Cow::Owned(out)
    }

    /// Flush whatever is still pending once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(rest)
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}
