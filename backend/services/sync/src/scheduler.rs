use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use syncline_common::error::SynclineResult;
use syncline_db::run::models::{RunScope, RunTrigger};
use syncline_db::run::repositories::RunRepository;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::RunRequest;
use crate::queue::{RunQueue, TriggerOutcome};

/// Longest DST gap we step across looking for a valid local time.
const MAX_GAP_MINUTES: i64 = 24 * 60;

fn earliest_valid<T>(
    naive: NaiveDateTime,
    lookup: impl Fn(&NaiveDateTime) -> LocalResult<T>,
) -> Option<T> {
    let mut candidate = naive;
    for _ in 0..=MAX_GAP_MINUTES {
        match lookup(&candidate) {
            LocalResult::Single(t) => return Some(t),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => candidate = candidate + chrono::Duration::minutes(1),
        }
    }
    None
}

/// The instant `at` falls on `date` in `tz`. A time skipped by a DST gap
/// moves to the first valid instant after it; a repeated time takes the
/// earlier occurrence.
pub fn slot_on<Tz: TimeZone>(tz: &Tz, date: NaiveDate, at: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(at);
    earliest_valid(naive, |n| tz.from_local_datetime(n))
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// First slot strictly after `now`.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let slot = slot_on(&tz, today, at);
    if slot > *now {
        return slot;
    }
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    slot_on(&tz, tomorrow, at)
}

/// Latest slot at or before `now`.
pub fn most_recent_slot<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let slot = slot_on(&tz, today, at);
    if slot <= *now {
        return slot;
    }
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    slot_on(&tz, yesterday, at)
}

/// Whether the most recent slot went by without a run starting at or after it.
pub fn needs_catch_up<Tz: TimeZone>(
    last_run_start: Option<DateTime<Utc>>,
    now: &DateTime<Tz>,
    at: NaiveTime,
) -> bool {
    let slot = most_recent_slot(now, at).with_timezone(&Utc);
    last_run_start.map_or(true, |started| started < slot)
}

/// Submits one scheduled full run per local calendar day.
pub struct DailyScheduler {
    queue: Arc<RunQueue>,
    at: NaiveTime,
}

impl DailyScheduler {
    pub fn new(queue: Arc<RunQueue>, at: NaiveTime) -> Self {
        Self { queue, at }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(at = %self.at, "daily scheduler started");
        loop {
            let now = Local::now();
            let next = next_daily_run(&now, self.at);
            let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(next_run = %next, wait_secs = wait.as_secs(), "next scheduled sync");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => break,
            }

            self.queue.submit(RunRequest {
                trigger: RunTrigger::Scheduled,
                scope: RunScope::Full,
            });
        }
        tracing::info!("daily scheduler stopped");
    }
}

/// Queue one catch-up run if the last slot was missed.
pub async fn catch_up_on_startup<Tz: TimeZone>(
    runs: &dyn RunRepository,
    queue: &RunQueue,
    at: NaiveTime,
    now: &DateTime<Tz>,
) -> SynclineResult<Option<TriggerOutcome>> {
    let latest = runs
        .latest_of(&[RunTrigger::Scheduled, RunTrigger::CatchUp])
        .await?;
    let last_start = latest.map(|run| run.started_at);
    if !needs_catch_up(last_start, now, at) {
        tracing::info!("no missed scheduled run");
        return Ok(None);
    }

    tracing::info!(last_run = ?last_start, "scheduled run missed, queueing catch-up");
    Ok(Some(queue.submit(RunRequest {
        trigger: RunTrigger::CatchUp,
        scope: RunScope::Full,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use syncline_db::memory::MemoryStore;
    use syncline_db::run::models::{RunCounts, RunStatus, SyncRun};
    use uuid::Uuid;

    fn two_am() -> NaiveTime {
        NaiveTime::from_hms_opt(2, 0, 0).unwrap()
    }

    fn berlin_winter() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    fn local(tz: &FixedOffset, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        tz.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn next_run_is_later_today_before_the_slot() {
        let tz = berlin_winter();
        let now = local(&tz, 2026, 1, 10, 1, 30);
        assert_eq!(next_daily_run(&now, two_am()), local(&tz, 2026, 1, 10, 2, 0));
    }

    #[test]
    fn next_run_is_tomorrow_at_or_after_the_slot() {
        let tz = berlin_winter();
        let at_slot = local(&tz, 2026, 1, 10, 2, 0);
        assert_eq!(next_daily_run(&at_slot, two_am()), local(&tz, 2026, 1, 11, 2, 0));
        let evening = local(&tz, 2026, 12, 31, 22, 0);
        assert_eq!(next_daily_run(&evening, two_am()), local(&tz, 2027, 1, 1, 2, 0));
    }

    #[test]
    fn most_recent_slot_looks_back_a_day_before_the_slot() {
        let tz = berlin_winter();
        let early = local(&tz, 2026, 3, 1, 1, 0);
        assert_eq!(most_recent_slot(&early, two_am()), local(&tz, 2026, 2, 28, 2, 0));
        let late = local(&tz, 2026, 3, 1, 9, 0);
        assert_eq!(most_recent_slot(&late, two_am()), local(&tz, 2026, 3, 1, 2, 0));
    }

    #[test]
    fn catch_up_needed_only_when_slot_was_missed() {
        let tz = berlin_winter();
        let now = local(&tz, 2026, 3, 1, 9, 0);
        let slot = local(&tz, 2026, 3, 1, 2, 0).with_timezone(&Utc);

        assert!(needs_catch_up(None, &now, two_am()));
        assert!(needs_catch_up(
            Some(slot - chrono::Duration::hours(24)),
            &now,
            two_am()
        ));
        assert!(!needs_catch_up(Some(slot), &now, two_am()));
        assert!(!needs_catch_up(
            Some(slot + chrono::Duration::minutes(3)),
            &now,
            two_am()
        ));
    }

    #[test]
    fn dst_gap_moves_to_first_valid_minute() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let gap_start = day.and_hms_opt(2, 0, 0).unwrap();
        let gap_end = day.and_hms_opt(3, 0, 0).unwrap();
        let found = earliest_valid(gap_start + chrono::Duration::minutes(30), |n| {
            if *n >= gap_start && *n < gap_end {
                LocalResult::None
            } else {
                LocalResult::Single(*n)
            }
        });
        assert_eq!(found, Some(gap_end));
    }

    #[test]
    fn repeated_local_time_takes_earlier_instant() {
        let naive = NaiveDate::from_ymd_opt(2026, 10, 25)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let found = earliest_valid(naive, |_| LocalResult::Ambiguous("first", "second"));
        assert_eq!(found, Some("first"));
    }

    fn scheduled_run(started_at: DateTime<Utc>) -> SyncRun {
        SyncRun {
            id: Uuid::new_v4(),
            trigger: RunTrigger::Scheduled,
            scope: RunScope::Full,
            started_at,
            finished_at: started_at,
            start_cursor: None,
            end_cursor: None,
            counts: RunCounts::default(),
            discrepancies: Vec::new(),
            status: RunStatus::Success,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn startup_queues_catch_up_when_last_slot_missed() {
        let store = MemoryStore::new();
        let queue = RunQueue::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        store
            .insert(&scheduled_run(now - chrono::Duration::days(2)))
            .await
            .unwrap();

        let outcome = catch_up_on_startup(&store, &queue, two_am(), &now)
            .await
            .unwrap();
        assert_eq!(outcome, Some(TriggerOutcome::Scheduled));
        assert_eq!(
            queue.snapshot().pending,
            Some(RunRequest {
                trigger: RunTrigger::CatchUp,
                scope: RunScope::Full,
            })
        );
    }

    #[tokio::test]
    async fn startup_skips_catch_up_after_todays_run() {
        let store = MemoryStore::new();
        let queue = RunQueue::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        store
            .insert(&scheduled_run(now - chrono::Duration::hours(6)))
            .await
            .unwrap();

        let outcome = catch_up_on_startup(&store, &queue, two_am(), &now)
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(queue.snapshot().pending.is_none());
    }
}
