//! Core identifiers and shared types for Autocapture.

pub mod config;

use bitflags::bitflags;

bitflags! {
    /// Capabilities and demands a job declares at registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JobFlags: u8 {
        /// Significant per-invocation cost; requires a lease.
        const HEAVY = 1;
        /// Needs a GPU-capable worker slot.
        const REQUIRE_GPU = 1 << 1;
        /// Cannot honor the preemption poll contract; admitted only
        /// during idle drain and runs its grant to completion.
        const NON_PREEMPTIBLE = 1 << 2;
    }
}

impl JobFlags {
    pub fn is_heavy(self) -> bool {
        self.contains(JobFlags::HEAVY)
    }

    pub fn requires_gpu(self) -> bool {
        self.contains(JobFlags::REQUIRE_GPU)
    }

    pub fn is_preemptible(self) -> bool {
        !self.contains(JobFlags::NON_PREEMPTIBLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_jobs_are_preemptible_by_default() {
        let flags = JobFlags::empty();
        assert!(!flags.is_heavy());
        assert!(flags.is_preemptible());
    }

    #[test]
    fn gpu_implies_nothing_about_preemption() {
        let flags = JobFlags::HEAVY | JobFlags::REQUIRE_GPU;
        assert!(flags.requires_gpu());
        assert!(flags.is_preemptible());
    }
}
