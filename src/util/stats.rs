use std::fmt::Display;

/// Running summary of integer samples (tree depths, leaf sizes, ...)
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub total: usize,
    pub min: usize,
    pub max: usize,
}

impl Stats {
    pub fn add_sample(&mut self, value: usize) {
        self.count += 1;
        self.total += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn avg(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f32 / self.count as f32
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Stats {
            count: self.count + other.count,
            total: self.total + other.total,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            total: 0,
            min: usize::MAX,
            max: 0,
        }
    }
}

impl FromIterator<usize> for Stats {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut ret = Stats::default();
        for v in iter {
            ret.add_sample(v);
        }
        ret
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "no samples");
        }
        write!(
            f,
            "{} - {}; avg {:.1}; {} samples",
            self.min,
            self.max,
            self.avg(),
            self.count
        )
    }
}
