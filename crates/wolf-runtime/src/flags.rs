use std::marker::PhantomData;
use std::mem;

use crate::bitfield::{BitfieldView, bit_location};
use crate::error::{Error, Result};

/// A closed set of named flags that live in a fixed-width game bitfield.
///
/// Implement this with [flag_set!](crate::flag_set) rather than by hand: the
/// macro refuses to compile a flag whose bit doesn't fit in [FlagSet::BYTES].
pub trait FlagSet: Copy + Eq + std::fmt::Debug + 'static {
    /// The width in bytes of the bitfield that backs this set.
    const BYTES: usize;

    /// The bit number of this flag, in the game's word layout.
    fn bit(self) -> u32;
}

/// Declares a [FlagSet] enum.
///
/// ```
/// wolf_runtime::flag_set! {
///     pub enum Doors: 4 bytes {
///         Front = 0,
///         Back = 9,
///     }
/// }
/// ```
#[macro_export]
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $bytes:literal bytes {
            $( $(#[$vmeta:meta])* $variant:ident = $bit:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $crate::flags::FlagSet for $name {
            const BYTES: usize = $bytes;

            fn bit(self) -> u32 {
                match self {
                    $( $name::$variant => $bit ),+
                }
            }
        }

        const _: () = {
            $(
                assert!(
                    $crate::bitfield::bit_location($bit).0 < $bytes,
                    concat!(stringify!($name), "::", stringify!($variant), " lies outside the bitfield"),
                );
            )+
        };
    };
}

/// A snapshot of exactly `F::BYTES` bytes of flag data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldFlags<F: FlagSet> {
    bytes: Vec<u8>,
    _flags: PhantomData<F>,
}

impl<F: FlagSet> BitfieldFlags<F> {
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0; F::BYTES],
            _flags: PhantomData,
        }
    }

    /// Copies a snapshot out of `bytes`, which must be exactly `F::BYTES` long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != F::BYTES {
            return Err(Error::InvalidArgument(format!(
                "expected {} bytes of flag data, got {}",
                F::BYTES,
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            _flags: PhantomData,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn has(&self, flag: F) -> bool {
        // Flags are bounds-checked when the set is declared.
        BitfieldView::new(&self.bytes)
            .get(flag.bit())
            .unwrap_or(false)
    }

    pub fn set(&mut self, flag: F) {
        let (byte, mask) = bit_location(flag.bit());
        if let Some(b) = self.bytes.get_mut(byte) {
            *b |= mask;
        }
    }

    pub fn clear(&mut self, flag: F) {
        let (byte, mask) = bit_location(flag.bit());
        if let Some(b) = self.bytes.get_mut(byte) {
            *b &= !mask;
        }
    }
}

impl<F: FlagSet> Default for BitfieldFlags<F> {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Tracks one step of history for a [FlagSet] so callers can ask which flags
/// turned on or off during the last update.
#[derive(Debug, Clone)]
pub struct FlagEdgeDetector<F: FlagSet> {
    previous: BitfieldFlags<F>,
    current: BitfieldFlags<F>,
}

impl<F: FlagSet> FlagEdgeDetector<F> {
    pub fn new() -> Self {
        Self {
            previous: BitfieldFlags::zeroed(),
            current: BitfieldFlags::zeroed(),
        }
    }

    /// Shifts the current snapshot into `previous` and stores `next`.
    pub fn update(&mut self, next: BitfieldFlags<F>) {
        self.previous = mem::replace(&mut self.current, next);
    }

    /// Like [update](Self::update), reading the snapshot from raw bytes.
    pub fn update_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.update(BitfieldFlags::from_bytes(bytes)?);
        Ok(())
    }

    /// Returns whether `flag` went from unset to set in the last update.
    pub fn rising_edge(&self, flag: F) -> bool {
        !self.previous.has(flag) && self.current.has(flag)
    }

    /// Returns whether `flag` went from set to unset in the last update.
    pub fn falling_edge(&self, flag: F) -> bool {
        self.previous.has(flag) && !self.current.has(flag)
    }

    pub fn changed(&self, flag: F) -> bool {
        self.previous.has(flag) != self.current.has(flag)
    }

    /// Clears both snapshots back to all zeroes.
    pub fn reset(&mut self) {
        self.previous = BitfieldFlags::zeroed();
        self.current = BitfieldFlags::zeroed();
    }

    pub fn previous(&self) -> &BitfieldFlags<F> {
        &self.previous
    }

    pub fn current(&self) -> &BitfieldFlags<F> {
        &self.current
    }
}

impl<F: FlagSet> Default for FlagEdgeDetector<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::flag_set! {
        enum TestFlags: 8 bytes {
            First = 0,
            Middle = 17,
            Last = 63,
        }
    }

    const ALL: [TestFlags; 3] = [TestFlags::First, TestFlags::Middle, TestFlags::Last];

    fn snapshot(flags: &[TestFlags]) -> BitfieldFlags<TestFlags> {
        let mut snap = BitfieldFlags::zeroed();
        for flag in flags {
            snap.set(*flag);
        }
        snap
    }

    #[test]
    fn test_no_edges_before_update() {
        let detector = FlagEdgeDetector::<TestFlags>::new();
        for flag in ALL {
            assert!(!detector.rising_edge(flag));
            assert!(!detector.falling_edge(flag));
            assert!(!detector.changed(flag));
        }
    }

    #[test]
    fn test_rising_edge_needs_unset_then_set() {
        let mut detector = FlagEdgeDetector::new();
        detector.update(snapshot(&[TestFlags::Last]));
        detector.update(snapshot(&[TestFlags::First, TestFlags::Last]));

        assert!(detector.rising_edge(TestFlags::First));
        assert!(!detector.rising_edge(TestFlags::Last));
        assert!(!detector.rising_edge(TestFlags::Middle));
    }

    #[test]
    fn test_changed_is_rising_or_falling() {
        let mut detector = FlagEdgeDetector::new();
        detector.update(snapshot(&[TestFlags::First, TestFlags::Middle]));
        detector.update(snapshot(&[TestFlags::Middle, TestFlags::Last]));

        for flag in ALL {
            let rising = detector.rising_edge(flag);
            let falling = detector.falling_edge(flag);
            assert_eq!(detector.changed(flag), rising || falling);
            assert!(!(rising && falling));
        }
        assert!(detector.falling_edge(TestFlags::First));
        assert!(detector.rising_edge(TestFlags::Last));
    }

    #[test]
    fn test_only_one_step_of_history() {
        let mut detector = FlagEdgeDetector::new();
        detector.update(snapshot(&[]));
        detector.update(snapshot(&[TestFlags::Middle]));
        detector.update(snapshot(&[TestFlags::Middle]));
        assert!(!detector.changed(TestFlags::Middle));
    }

    #[test]
    fn test_reset_clears_both_snapshots() {
        let mut detector = FlagEdgeDetector::new();
        detector.update(snapshot(&ALL));
        detector.reset();
        assert_eq!(detector.current(), &BitfieldFlags::zeroed());
        assert_eq!(detector.previous(), &BitfieldFlags::zeroed());
        assert!(!detector.changed(TestFlags::First));
    }

    #[test]
    fn test_update_from_bytes_checks_width() {
        let mut detector = FlagEdgeDetector::<TestFlags>::new();
        assert!(detector.update_from_bytes(&[0; 4]).is_err());

        let mut bytes = [0u8; 8];
        bytes[3] = 0x80;
        detector.update_from_bytes(&bytes).unwrap();
        assert!(detector.rising_edge(TestFlags::First));
    }
}
