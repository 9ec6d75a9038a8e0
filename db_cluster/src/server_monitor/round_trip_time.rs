use std::time::Duration;

const ALPHA: f64 = 0.2;

/// Exponentially weighted moving average of probe round trips.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AverageRoundTripTime {
    average: Option<Duration>,
}

impl AverageRoundTripTime {
    /// Folds in one sample and returns the new average.
    pub(crate) fn add_sample(&mut self, sample: Duration) -> Duration {
        let average = match self.average {
            None => sample,
            Some(previous) => previous.mul_f64(1.0 - ALPHA) + sample.mul_f64(ALPHA),
        };
        self.average = Some(average);
        average
    }

    pub(crate) fn reset(&mut self) {
        self.average = None;
    }
}
