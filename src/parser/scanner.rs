//! Streaming delimiter search.
//!
//! Knuth-Morris-Pratt over a byte stream delivered in arbitrary chunks. The
//! only state carried between chunks is the length of the delimiter prefix
//! matched so far; those held-back bytes are always `needle[..matched]`, so
//! they can be replayed from the needle if the match later fails.

pub(crate) enum Scan {
    /// Delimiter completed after this many bytes of the chunk.
    Found(usize),
    /// Whole chunk consumed without completing the delimiter.
    Pending,
}

pub(crate) struct DelimiterScanner {
    needle: Vec<u8>,
    fail: Vec<usize>,
    matched: usize,
}

impl DelimiterScanner {
    pub fn new(needle: &[u8]) -> Self {
        debug_assert!(!needle.is_empty());

        let mut fail = vec![0; needle.len()];
        let mut k = 0;
        for i in 1..needle.len() {
            while k > 0 && needle[i] != needle[k] {
                k = fail[k - 1];
            }
            if needle[i] == needle[k] {
                k += 1;
            }
            fail[i] = k;
        }

        Self {
            needle: needle.to_vec(),
            fail,
            matched: 0,
        }
    }

    pub fn reset(&mut self) {
        self.matched = 0;
    }

    /// Scan `chunk`. Every byte that is known not to belong to the delimiter
    /// is passed to `data`, in stream order, before this returns.
    pub fn scan(&mut self, chunk: &[u8], mut data: impl FnMut(&[u8])) -> Scan {
        let held = self.matched;
        let mut k = held;
        let mut end = chunk.len();
        let mut found = false;

        for (i, &b) in chunk.iter().enumerate() {
            while k > 0 && self.needle[k] != b {
                k = self.fail[k - 1];
            }
            if self.needle[k] == b {
                k += 1;
            }
            if k == self.needle.len() {
                end = i + 1;
                found = true;
                break;
            }
        }

        // The scanned stream is `needle[..held] ++ chunk[..end]`; its last `k`
        // bytes are the (partial) delimiter.
        let emit = held + end - k;
        let from_held = emit.min(held);
        if from_held > 0 {
            data(&self.needle[..from_held]);
        }
        if emit > held {
            data(&chunk[..emit - held]);
        }

        if found {
            self.matched = 0;
            Scan::Found(end)
        } else {
            self.matched = k;
            Scan::Pending
        }
    }
}
