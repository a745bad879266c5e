//! Bounded line reading over any [`BufRead`].
//!
//! A line is only reported once its terminating `\n` has been seen, so a
//! writer that is halfway through a line never produces a fragment. Content
//! beyond `max_len` bytes is consumed but not retained.

use std::io::{self, BufRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLine {
    /// A full line was read into the buffer (terminator stripped).
    Complete {
        /// Bytes consumed from the reader, terminator included.
        consumed: u64,
        truncated: bool,
    },
    /// End of input reached in the middle of a line.
    Partial { consumed: u64 },
    Eof,
}

/// Read one line into `buf`, keeping at most `max_len` bytes of it.
pub fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    max_len: usize,
    buf: &mut Vec<u8>,
) -> io::Result<ReadLine> {
    buf.clear();
    let mut consumed = 0u64;
    let mut truncated = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(if consumed == 0 {
                ReadLine::Eof
            } else {
                ReadLine::Partial { consumed }
            });
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let take = newline.map_or(available.len(), |i| i + 1);
        let content = &available[..newline.unwrap_or(available.len())];

        let room = max_len.saturating_sub(buf.len());
        if content.len() > room {
            buf.extend_from_slice(&content[..room]);
            truncated = true;
        } else {
            buf.extend_from_slice(content);
        }

        reader.consume(take);
        consumed += take as u64;

        if newline.is_some() {
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            return Ok(ReadLine::Complete {
                consumed,
                truncated,
            });
        }
    }
}
