// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Whether the first run happens right away or one period after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstRun {
    Immediately,
    AfterPeriod,
}

/// Runs `body` every `period` until `cancel` fires.
///
/// Each run is its own task: a panicking body is logged and the schedule
/// carries on. Runs never overlap; a slow run delays the next one.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    first_run: FirstRun,
    cancel: CancellationToken,
    body: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let start = match first_run {
        FirstRun::Immediately => Instant::now(),
        FirstRun::AfterPeriod => Instant::now() + period,
    };
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = cancel.cancelled() => break,
        }

        let mut run = tokio::spawn(body());
        tokio::select! {
            result = &mut run => {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!("{name} run panicked: {e}");
                    } else {
                        error!("{name} run failed: {e}");
                    }
                }
            }
            () = cancel.cancelled() => {
                run.abort();
                break;
            }
        }
    }
    debug!("{name} schedule stopped");
}
