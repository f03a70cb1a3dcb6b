mod diagnostics;

use std::time::Instant;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::instantiator::{Pipeline, Stage};
use crate::record::{Patch, Record};

pub use diagnostics::{Diagnostics, Outcome, UnitRun};

/// A finished run: the enriched record and what each stage did to it.
#[derive(Debug, Clone)]
pub struct Run {
    pub record: Record,
    pub diagnostics: Diagnostics,
}

/// Runs `pipeline` against `record` and returns the enriched record.
///
/// Failures of individual units never abort the run. Whether the run achieved
/// what the caller wanted is for the caller to decide, typically with
/// [`Record::missing`].
pub fn execute(record: Record, pipeline: &Pipeline, force: bool) -> Record {
    run(record, pipeline, force).record
}

/// Like [`execute`], also returning per-stage [`Diagnostics`].
///
/// Stages are visited in order:
/// * unless `force` is set, a stage whose outputs are all present is skipped;
/// * a stage with absent inputs is skipped, without counting as a failure;
/// * otherwise the unit runs and its writes are merged into the record.
pub fn run(mut record: Record, pipeline: &Pipeline, force: bool) -> Run {
    let span = tracing::span!(Level::INFO, "pipeline", units = pipeline.len(), force);
    let _enter = span.enter();

    let mut runs = Vec::with_capacity(pipeline.len());

    for stage in pipeline.stages() {
        let start = Instant::now();
        let outcome = run_stage(stage, &mut record, force);

        runs.push(UnitRun {
            name: stage.name().to_string(),
            outcome,
            start,
            duration: start.elapsed(),
        });
    }

    Run {
        record,
        diagnostics: Diagnostics { runs },
    }
}

fn run_stage(stage: &Stage, record: &mut Record, force: bool) -> Outcome {
    let name = stage.name();

    if !force && record.has_all(stage.output_tags()) {
        tracing::debug!(unit = name, "outputs already present, skipping");
        return Outcome::SkippedSatisfied;
    }

    let missing = record.missing(stage.input_tags().iter().map(String::as_str));
    if !missing.is_empty() {
        tracing::debug!(
            unit = name,
            "missing input tags {}, skipping",
            missing.join(", ")
        );
        return Outcome::SkippedMissingInputs(missing);
    }

    let span = tracing::span!(Level::INFO, "unit", name);
    let _enter = span.enter();

    tracing::debug!("running");

    let mut patch = Patch::new();

    // Units only see the record through a shared reference and write into a
    // fresh patch, so a panic cannot leave either half-updated.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        stage.unit().apply(record, &mut patch)
    }));

    match result {
        Ok(Ok(true)) => Outcome::Success(record.merge(stage.output_tags(), patch)),
        Ok(Ok(false)) => {
            let written = record.merge(stage.output_tags(), patch);
            tracing::warn!("unit reported failure");
            Outcome::Failed(written)
        }
        Ok(Err(err)) => {
            tracing::warn!("unit failed: {err:#}");
            Outcome::Errored(format!("{err:#}"))
        }
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Unit panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Unit panicked: {s}")
            } else {
                String::from("Unit panicked with unknown payload")
            };

            tracing::warn!("{message}");
            Outcome::Errored(message)
        }
    }
}

/// Runs many independent records through the same pipeline on the rayon
/// pool. Results come back in input order.
pub fn execute_batch(records: Vec<Record>, pipeline: &Pipeline, force: bool) -> Vec<Run> {
    let start = Instant::now();
    let total = records.len();

    let root_span = tracing::span!(Level::INFO, "batch", records = total);
    root_span.pb_set_length(total as u64);
    match crate::utils::get_style_batch() {
        Ok(style) => root_span.pb_set_style(&style),
        Err(err) => tracing::debug!("invalid progress bar template: {err}"),
    }
    root_span.pb_set_message("Enriching records...");
    let _enter = root_span.enter();

    let runs: Vec<Run> = records
        .into_par_iter()
        .map(|record| {
            let run = run(record, pipeline, force);
            root_span.pb_inc(1);
            run
        })
        .collect();

    let failures: usize = runs
        .iter()
        .map(|run| run.diagnostics.failures().count())
        .sum();

    tracing::info!(
        "enriched {} records with {} unit failures {}",
        total,
        failures,
        crate::utils::as_overhead(start)
    );

    runs
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::descriptor::Descriptor;
    use crate::record::Value;
    use crate::unit::FnUnit;

    fn stage<F>(name: &str, inputs: &[&str], outputs: &[&str], apply: F) -> Stage
    where
        F: Fn(&Record, &mut Patch) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let descriptor = Descriptor::new(name)
            .inputs(inputs.iter().copied())
            .outputs(outputs.iter().copied());
        Stage::new(Arc::new(descriptor), Arc::new(FnUnit::new(apply)))
    }

    fn text<'a>(record: &'a Record, tag: &str) -> Option<&'a str> {
        record.get(tag).and_then(Value::as_text)
    }

    /// id -> (title, artist) -> lyrics, counting invocations.
    fn lyrics_pipeline(calls: Arc<AtomicUsize>) -> Pipeline {
        let c1 = calls.clone();
        let c2 = calls.clone();
        let c3 = calls;

        Pipeline::from_stages(vec![
            stage("D1", &[], &["id"], move |_, patch| {
                c1.fetch_add(1, Ordering::SeqCst);
                patch.set("id", "mbid-1");
                Ok(true)
            }),
            stage("D2", &["id"], &["title", "artist"], move |record, patch| {
                c2.fetch_add(1, Ordering::SeqCst);
                let id = text(record, "id").unwrap_or_default();
                patch
                    .set("title", format!("title of {id}"))
                    .set("artist", "Artist");
                Ok(true)
            }),
            stage("D3", &["title"], &["lyrics"], move |record, patch| {
                c3.fetch_add(1, Ordering::SeqCst);
                let title = text(record, "title").unwrap_or_default();
                patch.set("lyrics", format!("la la {title}"));
                Ok(true)
            }),
        ])
    }

    #[test]
    fn test_runs_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let Run {
            record,
            diagnostics,
        } = run(Record::new(), &lyrics_pipeline(calls.clone()), false);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(text(&record, "lyrics"), Some("la la title of mbid-1"));
        assert_eq!(
            diagnostics.outcome("D2"),
            Some(&Outcome::Success(vec!["artist".into(), "title".into()]))
        );
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = lyrics_pipeline(calls.clone());

        let first = execute(Record::new(), &pipeline, false);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let second = run(first.clone(), &pipeline, false);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(second.record, first);
        assert!(
            second
                .diagnostics
                .runs
                .iter()
                .all(|run| run.outcome == Outcome::SkippedSatisfied)
        );
    }

    #[test]
    fn test_force_reruns_and_propagates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = lyrics_pipeline(calls.clone());

        let record = Record::restore([
            ("id", "mbid-2"),
            ("title", "stale"),
            ("artist", "stale"),
            ("lyrics", "stale"),
        ]);

        let skipped = execute(record.clone(), &pipeline, false);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(text(&skipped, "lyrics"), Some("stale"));

        let forced = execute(record, &pipeline, true);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(text(&forced, "title"), Some("title of mbid-1"));
        // downstream observed the rewritten title
        assert_eq!(text(&forced, "lyrics"), Some("la la title of mbid-1"));
        assert_eq!(
            forced.persisted().get("lyrics"),
            Some(&Value::from("la la title of mbid-1"))
        );
    }

    #[test]
    fn test_missing_inputs_soft_skip() {
        let pipeline = Pipeline::from_stages(vec![
            stage("Lyrics", &["artist", "title"], &["lyrics"], |_, _| {
                panic!("must not run")
            }),
            stage("Tagger", &[], &["genre"], |_, patch| {
                patch.set("genre", "rock");
                Ok(true)
            }),
        ]);

        let Run {
            record,
            diagnostics,
        } = run(Record::seed([("artist", "A")]), &pipeline, false);

        assert_eq!(
            diagnostics.outcome("Lyrics"),
            Some(&Outcome::SkippedMissingInputs(vec!["title".into()]))
        );
        assert!(!diagnostics.outcome("Lyrics").unwrap().is_failure());
        assert_eq!(text(&record, "genre"), Some("rock"));
    }

    #[test]
    fn test_failure_isolation() {
        let pipeline = Pipeline::from_stages(vec![
            stage("Errors", &[], &["a"], |_, patch| {
                patch.set("a", "partial");
                anyhow::bail!("service unavailable")
            }),
            stage("Panics", &[], &["b"], |_, _| panic!("unit exploded")),
            stage("Declines", &[], &["c"], |_, patch| {
                patch.set("hint", "no match");
                Ok(false)
            }),
            stage("Works", &[], &["d"], |_, patch| {
                patch.set("d", "done");
                Ok(true)
            }),
        ]);

        let Run {
            record,
            diagnostics,
        } = run(Record::new(), &pipeline, false);

        assert_eq!(
            diagnostics.outcome("Errors"),
            Some(&Outcome::Errored("service unavailable".into()))
        );
        assert_eq!(
            diagnostics.outcome("Panics"),
            Some(&Outcome::Errored("Unit panicked: unit exploded".into()))
        );
        assert_eq!(
            diagnostics.outcome("Declines"),
            Some(&Outcome::Failed(vec!["hint".into()]))
        );
        assert_eq!(
            diagnostics.outcome("Works"),
            Some(&Outcome::Success(vec!["d".into()]))
        );

        // an erroring unit's writes are discarded
        assert!(!record.has("a"));
        // a declining unit's writes stay, but only declared outputs persist
        assert!(record.has("hint"));
        assert!(!record.persisted().contains_key("hint"));
        assert_eq!(text(&record, "d"), Some("done"));
        assert_eq!(diagnostics.failures().count(), 3);
    }

    #[test]
    fn test_unit_without_inputs_always_ready() {
        let pipeline = Pipeline::from_stages(vec![stage("Source", &[], &["x"], |_, patch| {
            patch.set("x", "1");
            Ok(true)
        })]);

        let record = execute(Record::new(), &pipeline, false);
        assert!(record.persisted().contains_key("x"));
    }

    #[test]
    fn test_batch_preserves_order() {
        let pipeline = Pipeline::from_stages(vec![stage(
            "Upper",
            &["title"],
            &["title_upper"],
            |record, patch| {
                let title = text(record, "title").unwrap_or_default().to_uppercase();
                patch.set("title_upper", title);
                Ok(true)
            },
        )]);

        let records: Vec<Record> = (0..32)
            .map(|i| Record::seed([("title", format!("song {i}"))]))
            .collect();

        let runs = execute_batch(records, &pipeline, false);

        assert_eq!(runs.len(), 32);
        for (i, run) in runs.iter().enumerate() {
            assert_eq!(
                text(&run.record, "title_upper"),
                Some(format!("SONG {i}").as_str())
            );
        }
    }

    #[test]
    fn test_empty_pipeline() {
        let record = Record::seed([("a", "b")]);
        let run = run(record.clone(), &Pipeline::default(), false);
        assert_eq!(run.record, record);
        assert!(run.diagnostics.runs.is_empty());
    }
}
