use rand::{Rng, rng};

/// Half of the 16-bit sequence number space.
pub const UINT16_SIZE_HALF: u16 = 1 << 15;

/// Random initial sequence numbers are drawn from `[0, MAX_INIT_SEQUENCE_NUMBER)`
/// so that the first wrap is far away and SRTP index estimation stays simple.
pub const MAX_INIT_SEQUENCE_NUMBER: u16 = 1 << 14;

/// Returns true if `sequence_number` comes after `prev_sequence_number` in
/// wrap-aware order, i.e. the forward distance is less than half the space.
pub fn is_newer_sequence_number(sequence_number: u16, prev_sequence_number: u16) -> bool {
    let diff = sequence_number.wrapping_sub(prev_sequence_number);
    // Numbers exactly half the space apart are ordered by value so that
    // exactly one of the two directions is "newer".
    if diff == UINT16_SIZE_HALF {
        return sequence_number > prev_sequence_number;
    }
    diff != 0 && diff < UINT16_SIZE_HALF
}

/// Wrap-aware `a < b`.
pub fn is_older_sequence_number(a: u16, b: u16) -> bool {
    is_newer_sequence_number(b, a)
}

pub fn latest_sequence_number(a: u16, b: u16) -> u16 {
    if is_newer_sequence_number(a, b) { a } else { b }
}

/// Allocator for one SSRC's 16-bit RTP sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSpace {
    next: u16,
    roll_over_count: u64,
}

impl Default for SequenceSpace {
    fn default() -> Self {
        Self::new_random()
    }
}

impl SequenceSpace {
    /// Starts at a random value in `[0, 2^14)`.
    pub fn new_random() -> Self {
        Self::new(rng().random_range(0..MAX_INIT_SEQUENCE_NUMBER))
    }

    pub fn new(initial: u16) -> Self {
        Self {
            next: initial,
            roll_over_count: 0,
        }
    }

    /// Next number to be handed out, without consuming it.
    pub fn peek(&self) -> u16 {
        self.next
    }

    /// Restarts the space at `sequence_number`.
    pub fn set(&mut self, sequence_number: u16) {
        self.next = sequence_number;
        self.roll_over_count = 0;
    }

    pub fn next_sequence_number(&mut self) -> u16 {
        self.allocate(1)
    }

    /// Reserves `n` contiguous numbers and returns the first one.
    pub fn allocate(&mut self, n: u16) -> u16 {
        let first = self.next;
        if first as u32 + n as u32 > u16::MAX as u32 {
            self.roll_over_count += 1;
        }
        self.next = first.wrapping_add(n);
        first
    }

    pub fn roll_over_count(&self) -> u64 {
        self.roll_over_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer_sequence_number() {
        assert!(is_newer_sequence_number(1, 0));
        assert!(!is_newer_sequence_number(0, 1));
        assert!(!is_newer_sequence_number(5, 5));
        assert!(is_newer_sequence_number(0, 65535));
        assert!(is_newer_sequence_number(2, 65534));
        assert!(!is_newer_sequence_number(65534, 2));
        assert!(is_older_sequence_number(65535, 0));
    }

    #[test]
    fn test_is_newer_sequence_number_half_distance() {
        assert!(is_newer_sequence_number(0x8000, 0));
        assert!(!is_newer_sequence_number(0, 0x8000));
        assert!(is_newer_sequence_number(0x8001, 1));
        assert!(!is_newer_sequence_number(1, 0x8001));
    }

    #[test]
    fn test_latest_sequence_number() {
        assert_eq!(latest_sequence_number(65535, 1), 1);
        assert_eq!(latest_sequence_number(1, 65535), 1);
        assert_eq!(latest_sequence_number(100, 99), 100);
    }

    #[test]
    fn test_sequence_space_random_start() {
        for _ in 0..100 {
            let s = SequenceSpace::new_random();
            assert!(s.peek() < MAX_INIT_SEQUENCE_NUMBER);
        }
    }

    #[test]
    fn test_sequence_space_allocate_wraps() {
        let mut s = SequenceSpace::new(65534);
        assert_eq!(s.next_sequence_number(), 65534);
        assert_eq!(s.roll_over_count(), 0);
        assert_eq!(s.next_sequence_number(), 65535);
        assert_eq!(s.roll_over_count(), 1);
        assert_eq!(s.next_sequence_number(), 0);

        let first = s.allocate(4);
        assert_eq!(first, 1);
        assert_eq!(s.peek(), 5);

        s.set(65000);
        assert_eq!(s.allocate(1000), 65000);
        assert_eq!(s.peek(), 464);
        assert_eq!(s.roll_over_count(), 1);
    }
}
