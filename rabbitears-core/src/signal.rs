//! Baseband composite signals.

use crate::ntsc::{H, SIGNAL_LEN, V};

/// One channel's baseband composite signal: a `(V + 1) × H` matrix of signed
/// 8-bit IRE samples.
///
/// Row `V` duplicates row 0 so the receiver's inner loops can read up to one
/// line past the end without wrap checks; [`InputSignal::seal`] refreshes the
/// duplicate and must be called after the owning encoder mutates the signal
/// and before the signal is handed to the engine.
#[derive(Debug, Clone)]
#[must_use]
pub struct InputSignal {
    data: Vec<i8>,
}

impl InputSignal {
    /// Allocates a signal at blanking level.
    pub fn new() -> Self {
        Self {
            data: vec![0; (V + 1) * H],
        }
    }

    /// One scan line, `H` samples.
    #[must_use]
    pub fn line(&self, y: usize) -> &[i8] {
        &self.data[y * H..(y + 1) * H]
    }

    /// Mutable access to one scan line.
    #[must_use]
    pub fn line_mut(&mut self, y: usize) -> &mut [i8] {
        &mut self.data[y * H..(y + 1) * H]
    }

    /// The whole matrix including the wrap-around row, `(V + 1) · H` samples.
    #[must_use]
    pub fn samples(&self) -> &[i8] {
        &self.data
    }

    /// Copies row 0 into the wrap-around row `V`.
    pub fn seal(&mut self) {
        let (head, tail) = self.data.split_at_mut(SIGNAL_LEN);
        tail.copy_from_slice(&head[..H]);
    }

    /// Whether the wrap-around row currently mirrors row 0.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.data[SIGNAL_LEN..] == self.data[..H]
    }
}

impl Default for InputSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_duplicates_first_line() {
        let mut sig = InputSignal::new();
        sig.line_mut(0)[17] = 42;
        assert!(!sig.is_sealed());
        sig.seal();
        assert!(sig.is_sealed());
        assert_eq!(sig.line(V)[17], 42);
    }
}
