use memchr::memchr;

/// A newline-aligned byte range of the shared input, `start` inclusive, `end` exclusive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slice {
    pub start: usize,
    pub end: usize,
}

impl Slice {
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn bytes<'a>(&self, input: &'a [u8]) -> &'a [u8] {
        &input[self.start..self.end]
    }
}

/// Returns the offset one past the first `'\n'` at or after `from`,
/// or `input.len()` if there is none.
pub fn find_past_newline(input: &[u8], from: usize) -> usize {
    if from >= input.len() {
        return input.len();
    }
    match memchr(b'\n', &input[from..]) {
        Some(pos) => from + pos + 1,
        None => input.len(),
    }
}

/// Splits `input` into at most `parts` contiguous slices, each starting at the
/// beginning of a line and ending one past a `'\n'` (or at the end of input).
///
/// Cut points are placed after the line containing the nominal offset
/// `i * len / parts`. A record longer than the nominal slice size swallows the
/// following cut points, so fewer slices may come back; none of them is empty
/// unless `input` is.
pub fn partition(input: &[u8], parts: usize) -> Vec<Slice> {
    let len = input.len();
    let parts = parts.max(1);
    if parts == 1 || len == 0 {
        return vec![Slice { start: 0, end: len }];
    }

    let nominal = len / parts;
    let mut slices = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 1..parts {
        // scan from the last byte of the nominal slice, so a cut that already
        // sits right after a newline stays put
        let from = (i * nominal).saturating_sub(1).max(start);
        let end = find_past_newline(input, from);
        if end >= len {
            break;
        }
        slices.push(Slice { start, end });
        start = end;
    }
    // the last slice absorbs the rounding remainder
    slices.push(Slice { start, end: len });

    debug_assert!(slices
        .iter()
        .all(|s| s.end == len || input[s.end - 1] == b'\n'));
    slices
}
