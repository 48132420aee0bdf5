//! Verification run: activates the selected groups and reports progress.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use streamverify_binder::{Activation, Binding, BoundGroup, OutputState};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::display;

const TICK: Duration = Duration::from_millis(250);

pub struct VerifyStats {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
}

/// Verify the groups named in `wanted` (all groups when empty).
///
/// A single group streams its text to stderr as it arrives; several groups
/// share a progress line. Result cards go to stdout once every request has
/// finished.
pub async fn run_verify(binding: &Binding, wanted: &[String]) -> anyhow::Result<VerifyStats> {
    let start = Instant::now();
    let selected = select(binding, wanted)?;
    if selected.is_empty() {
        eprintln!("  No verifiable groups found.");
        return Ok(VerifyStats {
            selected: 0,
            completed: 0,
            failed: 0,
            elapsed_secs: 0.0,
        });
    }

    eprintln!("  Verifying {} group(s)...", selected.len());
    let outcomes = if let [only] = selected.as_slice() {
        let follower = tokio::spawn(follow(only.subscribe_output()));
        let outcome = only.activate().await;
        if matches!(outcome, Activation::Ignored) {
            follower.abort();
        } else {
            follower.await?;
        }
        vec![outcome]
    } else {
        let ticker = spawn_ticker(selected.clone());
        let outcomes = join_all(selected.iter().map(|g| g.activate())).await;
        ticker.abort();
        eprintln!();
        outcomes
    };

    let mut completed = 0;
    let mut failed = 0;
    for (group, outcome) in selected.iter().zip(&outcomes) {
        match outcome {
            Activation::Completed(_) => completed += 1,
            Activation::Failed(_) => failed += 1,
            Activation::Ignored => {}
        }
        println!("{}\n", display::render_card(group.group(), outcome, &group.output()));
    }

    Ok(VerifyStats {
        selected: selected.len(),
        completed,
        failed,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

/// Resolve requested ids (or `#<index>` labels) to bound groups.
fn select(binding: &Binding, wanted: &[String]) -> anyhow::Result<Vec<Arc<BoundGroup>>> {
    if wanted.is_empty() {
        return Ok(binding.groups().to_vec());
    }
    wanted
        .iter()
        .map(|id| {
            binding
                .find(id)
                .or_else(|| binding.groups().iter().find(|g| g.group().label() == *id))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no verification group '{id}'"))
        })
        .collect()
}

/// Echo new text from one output region until it settles.
async fn follow(mut rx: watch::Receiver<OutputState>) {
    let mut printed = 0;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        match state {
            OutputState::Streaming(text) | OutputState::Done(text) => {
                if let Some(new) = text.get(printed..) {
                    eprint!("{new}");
                    printed = text.len();
                }
            }
            OutputState::Failed(message) => {
                eprintln!("\n  {message}");
                return;
            }
            OutputState::Idle => {}
        }
        if matches!(*rx.borrow(), OutputState::Done(_)) {
            eprintln!();
            return;
        }
    }
}

/// Periodically print how many groups have settled and how much text arrived.
fn spawn_ticker(groups: Vec<Arc<BoundGroup>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let total = groups.len();
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            let mut settled = 0;
            let mut chars = 0;
            for group in &groups {
                match group.output() {
                    OutputState::Streaming(text) => chars += text.chars().count(),
                    OutputState::Done(text) => {
                        settled += 1;
                        chars += text.chars().count();
                    }
                    OutputState::Failed(_) => settled += 1,
                    OutputState::Idle => {}
                }
            }
            eprint!("\r  Settled {settled}/{total}, {chars} chars received");
        }
    })
}
