//! Collision-free id generation.
//!
//! Ids are handed out sequentially from a random starting point. When the
//! next candidate is taken (another writer claimed it, or the sequence ran
//! into an occupied stretch) a fresh random start is drawn. The number of
//! draws per call is capped so a full or nearly full domain reports
//! `DomainExhausted` instead of spinning.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{IntIdError, IntIdResult};
use crate::id::IntId;

#[derive(Debug)]
pub(crate) struct IdGenerator {
    rng: StdRng,
    next: Option<u64>,
    max_id: u64,
    max_attempts: u32,
}

impl IdGenerator {
    pub(crate) fn new(seed: Option<u64>, max_id: u64, max_attempts: u32) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            next: None,
            max_id: max_id.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Forget the current sequence; the next id starts from a fresh random point.
    pub(crate) fn randomize(&mut self) {
        self.next = None;
    }

    /// Produce an id for which `taken` is false.
    ///
    /// `occupied` is the number of ids currently in use; when it covers the
    /// whole domain no draw can succeed.
    pub(crate) fn generate(
        &mut self,
        occupied: usize,
        taken: impl Fn(IntId) -> bool,
    ) -> IntIdResult<IntId> {
        if u64::try_from(occupied).map_or(true, |n| n >= self.max_id) {
            return Err(IntIdError::DomainExhausted {
                attempts: 0,
                max_id: self.max_id,
            });
        }

        let mut draws = 0u32;
        loop {
            let candidate = match self.next {
                Some(next) => next,
                None => {
                    if draws >= self.max_attempts {
                        return Err(IntIdError::DomainExhausted {
                            attempts: draws,
                            max_id: self.max_id,
                        });
                    }
                    draws += 1;
                    self.rng.gen_range(0..self.max_id)
                }
            };

            let next = candidate + 1;
            self.next = (next < self.max_id).then_some(next);

            let id = IntId::new(candidate);
            if !taken(id) {
                return Ok(id);
            }
            debug!(id = candidate, draws, "intid collision; drawing a new start");
            self.next = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sequential_after_random_start() {
        let mut generator = IdGenerator::new(Some(7), 1_000_000, 16);
        let first = generator.generate(0, |_| false).unwrap();
        let second = generator.generate(1, |_| false).unwrap();
        assert_eq!(second.get(), first.get() + 1);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = IdGenerator::new(Some(42), u64::MAX, 16);
        let mut b = IdGenerator::new(Some(42), u64::MAX, 16);
        for n in 0..8 {
            assert_eq!(
                a.generate(n, |_| false).unwrap(),
                b.generate(n, |_| false).unwrap()
            );
        }
    }

    #[test]
    fn collisions_are_retried() {
        let mut generator = IdGenerator::new(Some(1), 4, 64);
        let taken: HashSet<u64> = [0, 1, 2].into_iter().collect();
        let id = generator.generate(3, |id| taken.contains(&id.get())).unwrap();
        assert_eq!(id.get(), 3);
    }

    #[test]
    fn full_domain_is_exhausted() {
        let mut generator = IdGenerator::new(Some(1), 2, 64);
        let err = generator.generate(2, |_| true).unwrap_err();
        assert!(matches!(
            err,
            IntIdError::DomainExhausted {
                attempts: 0,
                max_id: 2
            }
        ));
    }

    #[test]
    fn retry_cap_reports_exhaustion() {
        // Everything looks taken even though the occupancy count says otherwise.
        let mut generator = IdGenerator::new(Some(3), 1_000, 5);
        let err = generator.generate(0, |_| true).unwrap_err();
        assert!(matches!(err, IntIdError::DomainExhausted { attempts: 5, .. }));
    }

    #[test]
    fn randomize_restarts_sequence() {
        let mut generator = IdGenerator::new(Some(9), u64::MAX, 16);
        let first = generator.generate(0, |_| false).unwrap();
        generator.randomize();
        let second = generator.generate(1, |_| false).unwrap();
        assert_ne!(second.get(), first.get() + 1);
    }

    #[test]
    fn ids_stay_below_max() {
        let mut generator = IdGenerator::new(Some(11), 10, 1_000);
        let mut seen = HashSet::new();
        for n in 0..10 {
            let id = generator
                .generate(n, |id| seen.contains(&id.get()))
                .unwrap();
            assert!(id.get() < 10);
            seen.insert(id.get());
        }
        assert_eq!(seen.len(), 10);
    }
}
