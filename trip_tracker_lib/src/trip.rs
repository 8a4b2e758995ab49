use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{coordinate::Coordinate, sample::Sample};

/// Frozen summary of a finished trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub name: String,
    pub total_distance_m: f64,
    pub midpoint: Coordinate,
    pub samples: Vec<Sample>,

    /// Sample indices where a re-anchored segment begins.
    pub segment_starts: Vec<usize>,
}

impl TripRecord {
    pub fn new(name: String, total_distance_m: f64, midpoint: Coordinate, samples: Vec<Sample>, segment_starts: Vec<usize>) -> Self {
        Self {
            name,
            total_distance_m,
            midpoint,
            samples,
            segment_starts,
        }
    }

    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_m / 1000.
    }

    /// Non-empty runs of samples between re-anchors, in order.
    pub fn segments(&self) -> Vec<&[Sample]> {
        let len = self.samples.len();
        let mut bounds = vec![0];
        bounds.extend(self.segment_starts.iter().copied().filter(|&i| i > 0 && i <= len));
        bounds.push(len);

        bounds
            .windows(2)
            .filter(|w| w[0] < w[1])
            .map(|w| &self.samples[w[0]..w[1]])
            .collect()
    }

    pub fn duration(&self) -> Option<TimeDelta> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        Some(last.timestamp - first.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn sample(secs: i64) -> Sample {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs);
        Sample::new(Coordinate::new(56., 10.).unwrap(), 5., ts, None)
    }

    #[test]
    fn segments_split_on_reanchor() {
        let samples = (0..5).map(sample).collect();
        let record = TripRecord::new("Loop".into(), 0., Coordinate::new(56., 10.).unwrap(), samples, vec![2, 2, 5]);

        let lengths: Vec<usize> = record.segments().iter().map(|s| s.len()).collect();
        assert_eq!(lengths, vec![2, 3]);
    }

    #[test]
    fn duration_spans_first_to_last() {
        let record = TripRecord::new("Walk".into(), 0., Coordinate::new(56., 10.).unwrap(), vec![sample(0), sample(90)], vec![]);
        assert_eq!(record.duration(), Some(TimeDelta::seconds(90)));

        let empty = TripRecord::new("Empty".into(), 0., Coordinate::new(56., 10.).unwrap(), vec![], vec![]);
        assert!(empty.segments().is_empty());
        assert_eq!(empty.duration(), None);
    }
}
