//! Job identifiers and the small enums shared across the scheduler.
//!
//! A [`JobId`] packs a validity bit, a slot index and a generation counter
//! into 32 bits. The generation advances every time a slot's occupant is
//! observed to complete, so an identifier held past completion dereferences
//! safely to "already finished" instead of aliasing the slot's next occupant.

/// Number of bits reserved for the slot index.
const INDEX_BITS: u32 = 16;
/// Number of bits reserved for the slot generation.
const GENERATION_BITS: u32 = 15;

const VALID_SHIFT: u32 = 0;
const INDEX_SHIFT: u32 = 1;
const GENERATION_SHIFT: u32 = 1 + INDEX_BITS;

const VALID_MASK: u32 = 0x0000_0001;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Mask applied to a slot's generation counter as it advances.
pub(crate) const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Packed identifier for a job slot occupant.
///
/// Bit 0 is the validity flag, bits 1..=16 the slot index and bits 17..=31
/// the generation. The all-zero value is [`JobId::INVALID`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u32);

impl JobId {
    /// The reserved "no job" identifier.
    pub const INVALID: JobId = JobId(0);

    pub(crate) fn pack(slot: u32, generation: u32) -> JobId {
        JobId(
            ((slot & INDEX_MASK) << INDEX_SHIFT)
                | ((generation & GENERATION_MASK) << GENERATION_SHIFT)
                | (1 << VALID_SHIFT),
        )
    }

    /// Returns true if the validity bit is set.
    ///
    /// A valid id may still be stale; only resolution against the slot table
    /// can tell whether the occupant it named is alive.
    pub fn is_valid(self) -> bool {
        self.0 & VALID_MASK != 0
    }

    /// The slot index carried in the identifier.
    pub fn slot(self) -> usize {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as usize
    }

    /// The generation carried in the identifier.
    pub fn generation(self) -> u32 {
        self.0 >> GENERATION_SHIFT
    }

    /// The raw 32-bit packed value.
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Reconstructs an identifier from its raw packed value.
    pub fn from_raw(raw: u32) -> JobId {
        JobId(raw)
    }
}

impl Default for JobId {
    fn default() -> Self {
        JobId::INVALID
    }
}

impl std::fmt::Debug for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "JobId(slot={}, gen={})", self.slot(), self.generation())
        } else {
            write!(f, "JobId(invalid)")
        }
    }
}

/// Execution state of a job slot.
///
/// `Uninitialized` is the zero value so that freshly zeroed slot storage is
/// already in a consistent state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum JobState {
    /// The slot has never held a job.
    #[default]
    Uninitialized = 0,
    /// The job has been created but not yet submitted.
    NotSubmitted = 1,
    /// The job has been submitted but has uncompleted dependencies.
    NotReady = 2,
    /// The job is ready to run but no thread has picked it up yet.
    Ready = 3,
    /// The job is currently executing.
    Running = 4,
    /// The job has finished executing.
    Completed = 5,
    /// The job has been canceled.
    Canceled = 6,
}

/// How a job is being submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitKind {
    /// Submit the job for execution.
    Run,
    /// Submit the job in a canceled state; it flows through the queue so a
    /// worker performs the usual completion housekeeping, but its entry point
    /// is only invoked for cleanup.
    Cancel,
}

/// Result of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum SubmitResult {
    /// The job was accepted and will run once its dependencies complete.
    Success,
    /// The identifier did not name a live, unsubmitted job.
    InvalidJob,
    /// A dependency's waiter list was full. The job is converted to a
    /// canceled submission so its resources are reclaimed once the
    /// dependencies it did register on have completed.
    TooManyWaiters,
}

/// The mode in which a job entry point is invoked.
///
/// Every accepted job receives `Execute` followed exactly once by `Cleanup`;
/// a job canceled before it ran receives only `Cleanup`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobCall {
    /// The job has been pulled from its ready queue and should do its work.
    Execute,
    /// The job (and all of its children) have completed; release anything the
    /// payload owns.
    Cleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_round_trip() {
        let id = JobId::pack(1234, 567);
        assert!(id.is_valid());
        assert_eq!(id.slot(), 1234);
        assert_eq!(id.generation(), 567);
        assert_eq!(JobId::from_raw(id.to_raw()), id);
    }

    #[test]
    fn test_invalid_is_zero() {
        assert_eq!(JobId::INVALID.to_raw(), 0);
        assert!(!JobId::INVALID.is_valid());
        assert_eq!(JobId::default(), JobId::INVALID);
    }

    #[test]
    fn test_generation_wraps_within_mask() {
        let id = JobId::pack(9, GENERATION_MASK + 1);
        // The packed generation is truncated to its 15-bit field.
        assert_eq!(id.generation(), 0);
        assert_eq!(id.slot(), 9);
    }

    #[test]
    fn test_distinct_generations_distinct_ids() {
        let a = JobId::pack(42, 1);
        let b = JobId::pack(42, 2);
        assert_ne!(a, b);
        assert_eq!(a.slot(), b.slot());
    }

    #[test]
    fn test_uninitialized_state_is_zero() {
        assert_eq!(JobState::default() as i32, 0);
    }
}
