//! Newline-delimited JSON stream decoder
//!
//! Byte chunks arrive with arbitrary boundaries: a line, or a single multi-byte
//! character, may be split across two chunks. The decoder keeps both the
//! undecoded tail bytes and the unterminated text fragment between calls.

/// Incremental NDJSON line splitter with stateful UTF-8 decoding
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    /// Decoded text after the last newline seen so far
    buffer: String,
    /// Bytes of an incomplete UTF-8 sequence at the end of the last chunk
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk and return every line it completes.
    ///
    /// Lines are returned without their trailing `\n`. Blank lines are
    /// returned as well; skipping them is up to the caller.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        self.decode_pending(false);
        self.take_lines()
    }

    /// Return the retained fragment once the stream has ended, if it holds
    /// anything besides whitespace.
    pub fn flush(&mut self) -> Option<String> {
        self.decode_pending(true);
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    fn decode_pending(&mut self, end_of_stream: bool) {
        let mut input = self.pending.as_slice();

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    self.buffer.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));

                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None if end_of_stream => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            input = &[];
                            break;
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - input.len();
        self.pending.drain(..consumed);
    }

    fn take_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete[..last_newline]
            .split('\n')
            .map(str::to_owned)
            .collect()
    }
}
