/// Splits an ordered sequence of byte chunks into complete protocol lines.
///
/// Bytes after the last newline of a chunk are retained and prefixed to the next
/// chunk. Splitting happens on raw bytes before any text decoding, so a multi-byte
/// UTF-8 sequence cut across two chunks is reassembled intact: `\n` can never occur
/// inside such a sequence.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completes, in order.
    ///
    /// Line terminators (`\n`, optionally preceded by `\r`) are stripped. Invalid UTF-8
    /// is replaced rather than rejected.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(newline) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(newline);
            self.pending.extend_from_slice(head);
            lines.push(Self::take_line(&mut self.pending));
            rest = &tail[1..];
        }

        self.pending.extend_from_slice(rest);
        lines
    }

    /// Number of buffered bytes still waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consumes the framer, returning the unterminated tail if any.
    ///
    /// The tail is reported for diagnostics only; callers must not decode it.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }

    fn take_line(pending: &mut Vec<u8>) -> String {
        if pending.last() == Some(&b'\r') {
            pending.pop();
        }
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        line
    }
}
