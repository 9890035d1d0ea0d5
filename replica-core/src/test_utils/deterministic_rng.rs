/*!
    Deterministic RNG helpers for reproducible tests

    Random host workloads for convergence tests and benches, seeded so a
    failing run can be replayed.
*/

use crate::core_sync::map_array::MapArray;
use crate::core_sync::observable::ObservableMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::fixtures::Todo;

/// Default seed for deterministic tests
pub const DEFAULT_TEST_SEED: u64 = 42;

/// Create a deterministic RNG with the default seed
pub fn test_rng() -> StdRng {
    test_rng_with_seed(DEFAULT_TEST_SEED)
}

/// Create a deterministic RNG with a custom seed
pub fn test_rng_with_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A todo collection of `len` entries with random titles
pub fn random_todos(rng: &mut StdRng, len: usize) -> MapArray<String, Todo> {
    (0..len)
        .map(|i| (format!("k{}", i), Todo::new(format!("t{}", rng.random_range(0..1000)))))
        .collect()
}

/// Apply one random insert, update or removal over `key_space` keys
pub fn random_mutation(rng: &mut StdRng, host: &ObservableMap<String, Todo>, key_space: usize) {
    let key = format!("k{}", rng.random_range(0..key_space.max(1)));
    match rng.random_range(0..3) {
        0 => host.remove(&key),
        1 => host.insert(key, Todo::new(format!("t{}", rng.random_range(0..1000))).completed()),
        _ => host.insert(key, Todo::new(format!("t{}", rng.random_range(0..1000)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::observable::ObservableSource;

    #[test]
    fn test_same_seed_same_workload() {
        let run = || {
            let mut rng = test_rng();
            let host = ObservableMap::default();
            for _ in 0..50 {
                random_mutation(&mut rng, &host, 8);
            }
            host.current()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_random_todos_len() {
        assert_eq!(random_todos(&mut test_rng(), 10).len(), 10);
    }
}
