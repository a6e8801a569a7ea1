//! The strategies for combining measurements into aggregated points.

use crate::metrics::instrument::InstrumentKind;

/// The default bucket boundaries used by [`Aggregation::ExplicitBucketHistogram`]
/// when neither a view nor instrument advice supplies them.
pub(crate) const DEFAULT_HISTOGRAM_BOUNDARIES: &[f64] = &[
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// The way recorded measurements are summarized into metric points.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// The aggregation selected by the instrument kind.
    Default,

    /// An aggregation that drops all recorded data.
    Drop,

    /// An aggregation that summarizes a set of measurements as their
    /// arithmetic sum.
    Sum,

    /// An aggregation that summarizes a set of measurements as the last one
    /// made.
    LastValue,

    /// An aggregation that summarizes a set of measurements as a histogram
    /// with explicitly defined buckets.
    ExplicitBucketHistogram {
        /// The increasing bucket boundary values.
        ///
        /// Bucket `i` covers `(boundaries[i-1], boundaries[i]]`; an implied
        /// overflow bucket covers everything above the last boundary. The
        /// list must not contain NaN or infinite values.
        boundaries: Vec<f64>,

        /// Whether min and max values are recorded.
        record_min_max: bool,
    },
}

impl Aggregation {
    /// Validate that this aggregation is well configured.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                for x in boundaries {
                    if x.is_nan() || x.is_infinite() {
                        return Err(
                            "histogram boundaries must not contain NaN, Infinity, or -Infinity"
                                .to_string(),
                        );
                    }
                }

                for window in boundaries.windows(2) {
                    if window[0] >= window[1] {
                        return Err(
                            "histogram boundaries must be strictly increasing".to_string()
                        );
                    }
                }

                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// The aggregation an instrument kind maps to when no view overrides it.
pub(crate) fn default_aggregation_for(kind: InstrumentKind) -> Aggregation {
    match kind {
        InstrumentKind::Counter
        | InstrumentKind::UpDownCounter
        | InstrumentKind::ObservableCounter
        | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
        InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
            boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            record_min_max: true,
        },
        InstrumentKind::ObservableGauge => Aggregation::LastValue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_validation() {
        let ok = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, 5.0, 10.0],
            record_min_max: true,
        };
        assert!(ok.validate().is_ok());

        let unsorted = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![5.0, 0.0],
            record_min_max: true,
        };
        assert!(unsorted.validate().is_err());

        let infinite = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, f64::INFINITY],
            record_min_max: true,
        };
        assert!(infinite.validate().is_err());

        let duplicated = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, 5.0, 5.0],
            record_min_max: true,
        };
        assert!(duplicated.validate().is_err());
    }

    #[test]
    fn default_selection_rule() {
        assert_eq!(
            default_aggregation_for(InstrumentKind::Counter),
            Aggregation::Sum
        );
        assert_eq!(
            default_aggregation_for(InstrumentKind::ObservableGauge),
            Aggregation::LastValue
        );
        assert!(matches!(
            default_aggregation_for(InstrumentKind::Histogram),
            Aggregation::ExplicitBucketHistogram { .. }
        ));
    }
}
