/// Counter backing a SERIAL column.
///
/// The counter always holds the next value to hand out. Explicitly supplied
/// values move it past themselves, so generated values never collide with
/// rows that were inserted by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    next: i64,
}

impl Default for Sequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next: i64) -> Self {
        Self { next }
    }

    /// Value the next omitted SERIAL column would receive.
    pub fn peek(&self) -> i64 {
        self.next
    }

    /// Hands out the current value and advances.
    pub fn next_value(&mut self) -> i64 {
        let value = self.next;
        self.next = self.next.saturating_add(1);
        value
    }

    /// Records a value stored in the column.
    pub fn observe(&mut self, value: i64) {
        if value >= self.next {
            self.next = value.saturating_add(1);
        }
    }

    /// Rebuilds a counter from stored values: one past the maximum, never
    /// below `floor`.
    pub fn recover(values: impl IntoIterator<Item = i64>, floor: i64) -> Self {
        let mut sequence = Self::starting_at(floor.max(1));
        for value in values {
            sequence.observe(value);
        }
        sequence
    }
}
