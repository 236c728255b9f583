//! Bytecode reader
//!
//! The loader pulls chunks until the supplier reports end-of-input. The whole
//! chunk is already in memory, so one read hands out the full buffer and the
//! next one ends the cycle.

use std::borrow::Cow;

/// Position of the reader within one load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderState {
    /// Next read returns the whole buffer.
    #[default]
    Armed,
    /// Buffer already handed out; next read signals end-of-input.
    Exhausted,
}

impl ReaderState {
    /// Perform one read against `bytecode`, advancing the state.
    pub fn advance<'a>(&mut self, bytecode: &'a [u8]) -> Option<&'a [u8]> {
        match *self {
            ReaderState::Armed => {
                *self = ReaderState::Exhausted;
                Some(bytecode)
            }
            ReaderState::Exhausted => {
                *self = ReaderState::Armed;
                None
            }
        }
    }
}

/// Pull-based supplier over a borrowed bytecode buffer.
pub struct BytecodeReader<'a, 's> {
    bytecode: &'a [u8],
    state: &'s mut ReaderState,
}

impl<'a, 's> BytecodeReader<'a, 's> {
    pub fn new(bytecode: &'a [u8], state: &'s mut ReaderState) -> Self {
        Self { bytecode, state }
    }

    /// Next chunk, or `None` at end-of-input.
    pub fn read(&mut self) -> Option<&'a [u8]> {
        self.state.advance(self.bytecode)
    }

    pub fn state(&self) -> ReaderState {
        *self.state
    }

    /// Pull until end-of-input. A single chunk is returned borrowed.
    pub fn drain(mut self) -> Cow<'a, [u8]> {
        let mut data: Cow<'a, [u8]> = Cow::Borrowed(&[]);
        while let Some(chunk) = self.read() {
            if data.is_empty() {
                data = Cow::Borrowed(chunk);
            } else {
                data.to_mut().extend_from_slice(chunk);
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_read_returns_everything() {
        let bytes = [1u8, 2, 3];
        let mut state = ReaderState::Armed;
        let mut reader = BytecodeReader::new(&bytes, &mut state);

        assert_eq!(reader.read(), Some(&bytes[..]));
        assert_eq!(reader.state(), ReaderState::Exhausted);
        assert_eq!(reader.read(), None);
        assert_eq!(reader.state(), ReaderState::Armed);
    }

    #[test]
    fn drain_ends_armed_and_borrows() {
        let bytes = b"\x1bLua".to_vec();
        let mut state = ReaderState::default();

        let data = BytecodeReader::new(&bytes, &mut state).drain();
        assert!(matches!(data, Cow::Borrowed(_)));
        assert_eq!(&*data, &bytes[..]);
        drop(data);
        assert_eq!(state, ReaderState::Armed);
    }

    #[test]
    fn drain_from_exhausted_yields_nothing() {
        let bytes = [9u8; 4];
        let mut state = ReaderState::Exhausted;

        let data = BytecodeReader::new(&bytes, &mut state).drain();
        assert!(data.is_empty());
        assert_eq!(state, ReaderState::Armed);
    }

    #[test]
    fn empty_buffer_still_completes_cycle() {
        let mut state = ReaderState::Armed;
        let data = BytecodeReader::new(&[], &mut state).drain();
        assert!(data.is_empty());
        assert_eq!(state, ReaderState::Armed);
    }
}
