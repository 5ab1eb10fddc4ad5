//! Running mean/variance over a window of timestamped values.
//!
//! Pushing updates the Welford accumulators incrementally. Removing a value
//! only marks the accumulators dirty; they are rebuilt from the retained
//! values the next time a statistic is read.

use crate::feature::FeatureStat;

#[derive(Debug, Clone, Default)]
pub struct RunningStat {
    entries: Vec<(i64, f64)>,
    n: usize,
    mean: f64,
    m2: f64,
    needs_recalculation: bool,
}

impl RunningStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64, when_ms: i64) {
        self.entries.push((when_ms, value));
        if !self.needs_recalculation {
            self.accumulate(value);
        }
    }

    /// Drop the value recorded at `when_ms`. Returns whether one was found.
    pub fn remove(&mut self, when_ms: i64) -> bool {
        match self.entries.iter().position(|(when, _)| *when == when_ms) {
            Some(pos) => {
                self.entries.remove(pos);
                self.needs_recalculation = true;
                true
            }
            None => false,
        }
    }

    pub fn count(&mut self) -> usize {
        self.recalculate_if_needed();
        self.n
    }

    pub fn mean(&mut self) -> Option<f64> {
        self.recalculate_if_needed();
        (self.n > 0).then_some(self.mean)
    }

    /// Sample variance.
    pub fn variance(&mut self) -> Option<f64> {
        self.recalculate_if_needed();
        (self.n > 1).then(|| self.m2 / (self.n - 1) as f64)
    }

    pub fn standard_deviation(&mut self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn snapshot(&mut self) -> FeatureStat {
        let var = self.variance();
        FeatureStat {
            cnt: self.count(),
            mean: self.mean(),
            var,
            sdev: var.map(f64::sqrt),
        }
    }

    fn accumulate(&mut self, value: f64) {
        self.n += 1;
        if self.n == 1 {
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn recalculate_if_needed(&mut self) {
        if !self.needs_recalculation {
            return;
        }
        self.n = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
        let values: Vec<f64> = self.entries.iter().map(|(_, v)| *v).collect();
        for value in values {
            self.accumulate(value);
        }
        self.needs_recalculation = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn empty_and_single_value() {
        let mut stat = RunningStat::new();
        assert_eq!(stat.count(), 0);
        assert_eq!(stat.mean(), None);

        stat.push(2.0, 1);
        assert!(close(stat.mean(), 2.0));
        assert_eq!(stat.variance(), None);
        assert_eq!(stat.standard_deviation(), None);
    }

    #[test]
    fn push_and_remove_recomputes_window() {
        let mut stat = RunningStat::new();
        for (when, value) in [1.0, 3.0, 5.0, 7.0].into_iter().enumerate() {
            stat.push(value, when as i64);
        }
        assert!(close(stat.mean(), 4.0));
        assert!(close(stat.variance(), 20.0 / 3.0));

        assert!(stat.remove(1));
        assert_eq!(stat.count(), 3);
        assert!(close(stat.mean(), 13.0 / 3.0));
        assert!(close(stat.variance(), 28.0 / 3.0));

        assert!(!stat.remove(1));
    }

    #[test]
    fn push_after_remove_uses_full_window() {
        let mut stat = RunningStat::new();
        stat.push(10.0, 1);
        stat.push(20.0, 2);
        stat.remove(1);
        stat.push(30.0, 3);

        let snapshot = stat.snapshot();
        assert_eq!(snapshot.cnt, 2);
        assert!(close(snapshot.mean, 25.0));
        assert!(close(snapshot.var, 50.0));
        assert!(close(snapshot.sdev, 50f64.sqrt()));
    }
}
