use std::fmt;

/// Running statistics for one key. Measurements are fixed-point tenths.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stats {
    pub min: i32,
    pub max: i32,
    pub sum: i64,
    pub count: i64,
}

impl Stats {
    /// The identity of [Stats::merge]: no observations yet.
    pub const EMPTY: Stats = Stats {
        min: i32::MAX,
        max: i32::MIN,
        sum: 0,
        count: 0,
    };

    #[inline(always)]
    pub fn accept(&mut self, value: i32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += i64::from(value);
        self.count += 1;
    }

    /// Commutative, associative combination of two partial aggregates.
    pub fn merge(&mut self, other: &Stats) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn merged(mut self, other: &Stats) -> Stats {
        self.merge(other);
        self
    }

    /// Mean in tenths, rounded half away from zero.
    pub fn mean_tenths(&self) -> i64 {
        if self.count <= 0 {
            return 0;
        }
        let count = self.count.unsigned_abs();
        let rounded = (2 * self.sum.unsigned_abs() + count) / (2 * count);
        if self.sum < 0 {
            -(rounded as i64)
        } else {
            rounded as i64
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<i32> for Stats {
    fn from(value: i32) -> Self {
        Self {
            min: value,
            max: value,
            sum: i64::from(value),
            count: 1,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            Tenths(i64::from(self.min)),
            Tenths(self.mean_tenths()),
            Tenths(i64::from(self.max))
        )
    }
}

/// A fixed-point value printed with exactly one decimal place
pub struct Tenths(pub i64);

impl fmt::Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}
