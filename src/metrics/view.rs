//! Views: rules transforming matching instruments into customized streams.

use regex::Regex;

use super::instrument::{Instrument, Stream};

fn empty_view(_inst: &Instrument) -> Option<Stream> {
    None
}

/// Customizes the streams instruments produce.
///
/// A view matches instruments against criteria and, when it matches,
/// produces the [`Stream`] describing how measurements are aggregated:
/// renamed, re-aggregated, attribute-filtered or cardinality-capped.
///
/// `View` is implemented for all `Fn(&Instrument) -> Option<Stream>`.
pub trait View: Send + Sync + 'static {
    /// Return the stream to use for the matching instrument, or `None` if
    /// this view does not match.
    fn match_inst(&self, inst: &Instrument) -> Option<Stream>;
}

impl<T> View for T
where
    T: Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static,
{
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        self(inst)
    }
}

impl View for Box<dyn View> {
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        (**self).match_inst(inst)
    }
}

/// Creates a [`View`] applying the `mask` stream to instruments matching
/// `criteria`.
///
/// Non-empty criteria fields must all match. The name criterion supports the
/// wildcards `*` (any number of characters) and `?` (exactly one character)
/// and is matched case-insensitively. A wildcard name combined with a mask
/// that renames the stream is rejected, since many instruments would collide
/// on the one name.
pub fn new_view(criteria: Instrument, mask: Stream) -> Result<Box<dyn View>, String> {
    if criteria.is_empty() {
        otel_warn!(
            name: "View.NoCriteriaProvided",
            message = "no criteria provided to view; the view matches nothing"
        );
        return Ok(Box::new(empty_view));
    }
    let contains_wildcard = criteria.name.contains(['*', '?']);

    let match_fn: Box<dyn Fn(&Instrument) -> bool + Send + Sync> = if contains_wildcard {
        if mask.name.is_some() {
            otel_warn!(
                name: "View.NameReplacementForMultipleInstruments",
                message = "the view matches multiple instruments by wildcard but renames the stream; dropping the view"
            );
            return Ok(Box::new(empty_view));
        }

        let pattern = regex::escape(&criteria.name)
            .replace("\\?", ".")
            .replace("\\*", ".*");
        let re = Regex::new(&format!("(?i)^{pattern}$")).map_err(|e| e.to_string())?;
        let criteria = criteria.clone();
        Box::new(move |i: &Instrument| {
            re.is_match(&i.name)
                && criteria.matches_description(i)
                && criteria.matches_kind(i)
                && criteria.matches_unit(i)
                && criteria.matches_scope(i)
        })
    } else {
        let criteria = criteria.clone();
        Box::new(move |i: &Instrument| criteria.matches(i))
    };

    let mut agg = None;
    if let Some(masked_aggregation) = &mask.aggregation {
        match masked_aggregation.validate() {
            Ok(_) => agg = Some(masked_aggregation.clone()),
            Err(err) => {
                otel_warn!(
                    name: "View.InvalidAggregation",
                    error = err,
                    message = "the view's aggregation is invalid and will not be applied"
                );
            }
        }
    }

    Ok(Box::new(move |i: &Instrument| -> Option<Stream> {
        if match_fn(i) {
            Some(Stream {
                name: mask.name.clone().or_else(|| Some(i.name.clone())),
                description: mask
                    .description
                    .clone()
                    .or_else(|| Some(i.description.clone())),
                unit: mask.unit.clone().or_else(|| Some(i.unit.clone())),
                aggregation: agg.clone(),
                allowed_attribute_keys: mask.allowed_attribute_keys.clone(),
                cardinality_limit: mask.cardinality_limit,
            })
        } else {
            None
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::aggregation::Aggregation;
    use crate::metrics::instrument::InstrumentKind;

    fn counter(name: &'static str) -> Instrument {
        Instrument {
            name: name.into(),
            kind: Some(InstrumentKind::Counter),
            ..Default::default()
        }
    }

    #[test]
    fn wildcard_name_matching_is_case_insensitive() {
        let view = new_view(
            Instrument::new().name("http_*"),
            Stream::builder().build().unwrap(),
        )
        .unwrap();

        assert!(view.match_inst(&counter("http_requests")).is_some());
        assert!(view.match_inst(&counter("HTTP_LATENCY")).is_some());
        assert!(view.match_inst(&counter("grpc_requests")).is_none());
    }

    #[test]
    fn question_mark_matches_one_character() {
        let view = new_view(
            Instrument::new().name("worker_?"),
            Stream::builder().build().unwrap(),
        )
        .unwrap();

        assert!(view.match_inst(&counter("worker_1")).is_some());
        assert!(view.match_inst(&counter("worker_10")).is_none());
    }

    #[test]
    fn exact_name_matching_is_case_insensitive() {
        let view = new_view(
            Instrument::new().name("requests"),
            Stream::builder().build().unwrap(),
        )
        .unwrap();

        assert!(view.match_inst(&counter("Requests")).is_some());
    }

    #[test]
    fn mask_overrides_only_set_fields() {
        let view = new_view(
            Instrument::new().name("latency"),
            Stream::builder()
                .with_aggregation(Aggregation::Sum)
                .build()
                .unwrap(),
        )
        .unwrap();

        let stream = view.match_inst(&counter("latency")).unwrap();
        assert_eq!(stream.name.as_deref(), Some("latency"));
        assert_eq!(stream.aggregation, Some(Aggregation::Sum));
    }

    #[test]
    fn wildcard_with_rename_matches_nothing() {
        let view = new_view(
            Instrument::new().name("http_*"),
            Stream::builder().with_name("renamed").build().unwrap(),
        )
        .unwrap();
        assert!(view.match_inst(&counter("http_requests")).is_none());
    }
}
