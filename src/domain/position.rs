//! Fractional position allocation.
//!
//! Pure functions that compute a new ordering key from the keys of the
//! neighbors a task is being placed between. Nothing here performs I/O; the
//! caller is responsible for reading the neighbor keys under lock.

/// Default spacing between consecutive keys.
pub const DEFAULT_INCREMENT: f64 = 1000.0;

/// Default gap below which a lane's key space is considered exhausted.
pub const DEFAULT_EXHAUSTION_EPSILON: f64 = 1e-6;

/// Result of an allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    /// The new ordering key.
    pub position: f64,
    /// Set when the two neighbors are so close that further bisection is
    /// about to lose precision. The allocation is still usable.
    pub precision_exhausted: bool,
}

impl Allocation {
    const fn spaced(position: f64) -> Self {
        Self {
            position,
            precision_exhausted: false,
        }
    }
}

/// Computes ordering keys for a single lane.
///
/// `before` is the key of the task the new item is placed directly before
/// (the new key is smaller); `after` is the key of the task it is placed
/// directly after (the new key is larger).
///
/// # Example
///
/// ```
/// use kanban_reorder::domain::PositionAllocator;
///
/// let allocator = PositionAllocator::default();
/// assert_eq!(allocator.allocate(None, None).position, 1000.0);
/// assert_eq!(allocator.allocate(Some(2000.0), Some(1000.0)).position, 1500.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    increment: f64,
    exhaustion_epsilon: f64,
}

impl PositionAllocator {
    /// Creates an allocator with explicit spacing and exhaustion threshold.
    ///
    /// Both values are validated by [`crate::config::ReorderConfig`].
    #[must_use]
    pub const fn new(increment: f64, exhaustion_epsilon: f64) -> Self {
        Self {
            increment,
            exhaustion_epsilon,
        }
    }

    /// Spacing between keys.
    #[must_use]
    pub const fn increment(&self) -> f64 {
        self.increment
    }

    /// Gap threshold for the exhaustion signal.
    #[must_use]
    pub const fn exhaustion_epsilon(&self) -> f64 {
        self.exhaustion_epsilon
    }

    /// Computes the key for a task placed relative to zero, one or two
    /// neighbors.
    #[must_use]
    pub fn allocate(&self, before: Option<f64>, after: Option<f64>) -> Allocation {
        match (before, after) {
            (None, None) => Allocation::spaced(self.increment),
            (Some(before), None) => Allocation::spaced(before - self.increment),
            (None, Some(after)) => Allocation::spaced(after + self.increment),
            (Some(before), Some(after)) => self.bisect(before, after),
        }
    }

    /// Key for a task appended after the current maximum of a lane.
    ///
    /// An empty lane reports a maximum of `0`, which yields the seed value.
    #[must_use]
    pub fn append_after(&self, max_position: f64) -> f64 {
        max_position + self.increment
    }

    /// Key of the `index`-th task (zero based) after renormalization.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn spaced(&self, index: usize) -> f64 {
        (index as f64 + 1.0) * self.increment
    }

    fn bisect(&self, before: f64, after: f64) -> Allocation {
        let position = f64::midpoint(before, after);
        let (low, high) = if after < before {
            (after, before)
        } else {
            (before, after)
        };
        let collapsed = !(low < position && position < high);
        let precision_exhausted = (before - after).abs() < self.exhaustion_epsilon || collapsed;

        Allocation {
            position,
            precision_exhausted,
        }
    }
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_INCREMENT, DEFAULT_EXHAUSTION_EPSILON)
    }
}

// =============================================================================
// Tests
// =============================================================================
