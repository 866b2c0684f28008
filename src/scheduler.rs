//! Subject scheduler.
//!
//! Subjects are independent, so a stage is mapped over them on a bounded
//! rayon pool. Outcomes are always reported per subject and in the
//! configured order, whatever order the workers finish in.
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::config::BatchPolicy;
use crate::error::{Error, Result, SubjectFailure};

/// Per-subject outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Subjects that finished, with the number of runs processed.
    pub succeeded: Vec<(String, usize)>,
    pub failed: Vec<SubjectFailure>,
    /// Subjects never started because an earlier one failed under
    /// [`BatchPolicy::FailFast`].
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Whether no subject succeeded although at least one was attempted.
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

enum Outcome {
    Done(usize),
    Failed(Error),
    Skipped,
}

/// Apply `stage_fn` to every subject with at most `max_concurrency`
/// subjects in flight.
///
/// `1` runs the subjects one after another on the calling thread; `0` uses
/// one worker per available CPU.
pub fn run_all<F>(
    subjects: &[String],
    stage_fn: F,
    max_concurrency: usize,
    policy: BatchPolicy,
) -> Result<BatchReport>
where
    F: Fn(&str) -> Result<usize> + Sync,
{
    let abort = AtomicBool::new(false);
    let run_one = |subject: &String| -> Outcome {
        if policy == BatchPolicy::FailFast && abort.load(Ordering::SeqCst) {
            return Outcome::Skipped;
        }
        log::info!("Processing subject: {subject}");
        match stage_fn(subject) {
            Ok(n) => {
                log::info!("subject {subject}: {n} run(s) done");
                Outcome::Done(n)
            }
            Err(e) => {
                log::error!("subject {subject} failed: {e}");
                abort.store(true, Ordering::SeqCst);
                Outcome::Failed(e)
            }
        }
    };

    let outcomes: Vec<Outcome> = if max_concurrency == 1 {
        subjects.iter().map(&run_one).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrency)
            .thread_name(|i| format!("megprep-subject-{i}"))
            .build()
            .map_err(|e| Error::Scheduler(e.to_string()))?;
        pool.install(|| subjects.par_iter().map(&run_one).collect())
    };

    let mut report = BatchReport::default();
    for (subject, outcome) in subjects.iter().zip(outcomes) {
        match outcome {
            Outcome::Done(n) => report.succeeded.push((subject.clone(), n)),
            Outcome::Failed(error) => report.failed.push(SubjectFailure {
                subject: subject.clone(),
                error,
            }),
            Outcome::Skipped => report.skipped.push(subject.clone()),
        }
    }
    Ok(report)
}
