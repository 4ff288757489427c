//! Job-level parallelism policy and the bounded worker pool.
//!
//! Each job's heavy work happens in external engine processes, so workers
//! spend their time blocked on subprocesses; a scoped thread per worker is
//! all the scheduling this needs.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::Deserialize;

/// How many jobs may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Size the pool to the machine's available parallelism.
    Auto,
    /// Fixed worker count; `1` processes the batch serially.
    Fixed(usize),
}

impl Default for Parallelism {
    fn default() -> Self {
        Parallelism::Auto
    }
}

impl Parallelism {
    /// Concrete worker count for a batch of `jobs` inputs.
    pub fn worker_count(&self, jobs: usize) -> usize {
        let limit = match self {
            Parallelism::Auto => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Parallelism::Fixed(n) => *n,
        };
        limit.clamp(1, jobs.max(1))
    }
}

impl FromStr for Parallelism {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.eq_ignore_ascii_case("auto") {
            return Ok(Parallelism::Auto);
        }
        match text.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Parallelism::Fixed(n)),
            _ => Err(format!(
                "expected 'auto' or a positive worker count, got '{text}'"
            )),
        }
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Auto => write!(f, "auto"),
            Parallelism::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl<'de> Deserialize<'de> for Parallelism {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(usize),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Count(n) if n > 0 => Ok(Parallelism::Fixed(n)),
            Repr::Count(n) => Err(serde::de::Error::custom(format!(
                "worker count must be positive, got {n}"
            ))),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Run `run` over every item on at most `workers` threads and return the
/// results in input order, whatever order the workers finish in.
pub fn run_jobs<T, R, F>(items: &[T], workers: usize, run: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        return items
            .iter()
            .enumerate()
            .map(|(index, item)| run(index, item))
            .collect();
    }

    let cursor = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..items.len()).map(|_| None).collect());

    thread::scope(|scope| {
        for _ in 0..workers.min(items.len()) {
            scope.spawn(|| {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    let result = run(index, item);
                    slots.lock().expect("worker slot lock")[index] = Some(result);
                }
            });
        }
    });

    slots
        .into_inner()
        .expect("worker slot lock")
        .into_iter()
        .map(|slot| slot.expect("every job produced a result"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auto_and_counts() {
        assert_eq!("auto".parse::<Parallelism>(), Ok(Parallelism::Auto));
        assert_eq!("4".parse::<Parallelism>(), Ok(Parallelism::Fixed(4)));
        assert!("0".parse::<Parallelism>().is_err());
        assert!("fast".parse::<Parallelism>().is_err());
    }

    #[test]
    fn worker_count_never_exceeds_jobs() {
        assert_eq!(Parallelism::Fixed(8).worker_count(3), 3);
        assert_eq!(Parallelism::Fixed(2).worker_count(10), 2);
        assert_eq!(Parallelism::Fixed(1).worker_count(0), 1);
    }

    #[test]
    fn results_come_back_in_input_order() {
        let items: Vec<usize> = (0..32).collect();
        let doubled = run_jobs(&items, 4, |_, item| item * 2);
        assert_eq!(doubled, (0..32).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn serial_path_matches_parallel_path() {
        let items = vec!["a", "b", "c"];
        let serial = run_jobs(&items, 1, |index, item| format!("{index}:{item}"));
        let parallel = run_jobs(&items, 3, |index, item| format!("{index}:{item}"));
        assert_eq!(serial, parallel);
    }
}
