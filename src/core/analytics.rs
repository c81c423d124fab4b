//! Performance analytics over completed timers
//!
//! Every figure is derived from `complete` events and the timer snapshot they
//! carry, so the numbers are reproducible from the log alone. Nothing here
//! writes to the store.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::identity::{EntityRef, TimerId, TimerKey, UserId};
use crate::core::timer::{TimerEvent, TimerEventType};

/// Below this on-time rate (percent) a step is flagged as a bottleneck
pub const BOTTLENECK_ON_TIME_RATE: f64 = 70.0;
/// ... provided it has at least this many completions
pub const BOTTLENECK_MIN_COMPLETIONS: usize = 5;

/// One completed timer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub timer_id: TimerId,
    #[serde(flatten)]
    pub key: TimerKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_code: Option<String>,
    pub assigned_user: Option<UserId>,
    pub completed_by: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Working time, pauses excluded
    pub actual_ms: i64,
    /// Allocation plus extensions
    pub allocated_ms: i64,
    /// actual / allocated
    pub ratio: f64,
    pub on_time: bool,
    /// How late the completion was; zero when on time
    pub overdue_ms: i64,
}

impl Completion {
    /// Build from a `complete` event; `None` for other events or unusable snapshots
    pub fn from_event(event: &TimerEvent) -> Option<Self> {
        if event.event_type != TimerEventType::Complete {
            return None;
        }
        let timer = event.snapshot_timer()?;
        let started_at = timer.started_at?;
        let completed_at = timer.ended_at.unwrap_or(event.created_at);

        let actual_ms = timer.elapsed_ms(completed_at);
        let allocated_ms = timer.effective_allocation_ms();
        let ratio = if allocated_ms > 0 {
            actual_ms as f64 / allocated_ms as f64
        } else {
            0.0
        };
        let overdue_ms = timer
            .deadline_at
            .map(|deadline| (completed_at - deadline).num_milliseconds().max(0))
            .unwrap_or(0);

        Some(Self {
            timer_id: timer.id,
            key: timer.key,
            workflow_code: None,
            assigned_user: timer.assigned_user,
            completed_by: event.performed_by,
            started_at,
            completed_at,
            actual_ms,
            allocated_ms,
            ratio,
            on_time: overdue_ms == 0,
            overdue_ms,
        })
    }

    /// The user credited with the completion
    pub fn credited_user(&self) -> Option<UserId> {
        self.assigned_user.or(self.completed_by)
    }
}

/// Aggregate over a set of completions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub completions: usize,
    pub on_time: usize,
    pub late: usize,
    /// Percent of completions on time
    pub on_time_rate: f64,
    pub avg_actual_ms: i64,
    pub avg_allocated_ms: i64,
    /// Average actual / allocated, as a percentage
    pub avg_percent_used: f64,
    /// Average lateness over late completions only
    pub avg_overdue_ms: i64,
}

impl Summary {
    pub fn of<'a>(items: impl IntoIterator<Item = &'a Completion>) -> Self {
        let mut summary = Summary::default();
        let (mut actual, mut allocated, mut ratio, mut overdue) = (0i64, 0i64, 0f64, 0i64);

        for c in items {
            summary.completions += 1;
            if c.on_time {
                summary.on_time += 1;
            } else {
                summary.late += 1;
                overdue = overdue.saturating_add(c.overdue_ms);
            }
            actual = actual.saturating_add(c.actual_ms);
            allocated = allocated.saturating_add(c.allocated_ms);
            ratio += c.ratio;
        }

        if summary.completions > 0 {
            let n = summary.completions as i64;
            summary.on_time_rate = summary.on_time as f64 / n as f64 * 100.0;
            summary.avg_actual_ms = actual / n;
            summary.avg_allocated_ms = allocated / n;
            summary.avg_percent_used = ratio / n as f64 * 100.0;
        }
        if summary.late > 0 {
            summary.avg_overdue_ms = overdue / summary.late as i64;
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepPerformance {
    pub stage: String,
    #[serde(flatten)]
    pub summary: Summary,
    pub is_bottleneck: bool,
}

impl StepPerformance {
    fn new(stage: &str, summary: Summary) -> Self {
        let is_bottleneck = summary.completions >= BOTTLENECK_MIN_COMPLETIONS
            && summary.on_time_rate < BOTTLENECK_ON_TIME_RATE;
        Self {
            stage: stage.to_string(),
            summary,
            is_bottleneck,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPerformance {
    pub user: Option<UserId>,
    #[serde(flatten)]
    pub summary: Summary,
    /// 1 = best on-time rate
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPerformance {
    pub entity: EntityRef,
    #[serde(flatten)]
    pub summary: Summary,
    pub steps: Vec<StepPerformance>,
    pub users: Vec<UserPerformance>,
}

/// One ISO week of completions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBucket {
    /// e.g. "2025-W10"
    pub week: String,
    pub week_start: NaiveDate,
    pub completions: usize,
    pub on_time_rate: Option<f64>,
    /// Average actual / allocated as a percentage
    pub avg_percent_used: Option<f64>,
    /// Mean of `avg_percent_used` over this and the two preceding weeks with data
    pub moving_avg_percent_used: Option<f64>,
}

/// Performance of one stage across all entities
pub fn step_performance(completions: &[Completion], stage: &str) -> Option<StepPerformance> {
    let matching: Vec<&Completion> = completions.iter().filter(|c| c.key.stage == stage).collect();
    if matching.is_empty() {
        return None;
    }
    Some(StepPerformance::new(stage, Summary::of(matching)))
}

/// Per-stage performance, worst on-time rate first
pub fn workflow_step_performance(
    completions: &[Completion],
    workflow_code: Option<&str>,
) -> Vec<StepPerformance> {
    let mut by_stage: BTreeMap<&str, Vec<&Completion>> = BTreeMap::new();
    for c in completions {
        if workflow_code.is_some_and(|code| c.workflow_code.as_deref() != Some(code)) {
            continue;
        }
        by_stage.entry(c.key.stage.as_str()).or_default().push(c);
    }

    let mut steps: Vec<StepPerformance> = by_stage
        .into_iter()
        .map(|(stage, items)| StepPerformance::new(stage, Summary::of(items)))
        .collect();
    steps.sort_by(|a, b| {
        a.summary
            .on_time_rate
            .total_cmp(&b.summary.on_time_rate)
            .then_with(|| a.stage.cmp(&b.stage))
    });
    steps
}

/// Ranked per-user performance; `user` narrows the result to one ranked entry
pub fn user_performance(completions: &[Completion], user: Option<UserId>) -> Vec<UserPerformance> {
    let mut by_user: BTreeMap<Option<UserId>, Vec<&Completion>> = BTreeMap::new();
    for c in completions {
        by_user.entry(c.credited_user()).or_default().push(c);
    }

    let mut users: Vec<UserPerformance> = by_user
        .into_iter()
        .map(|(user, items)| UserPerformance {
            user,
            summary: Summary::of(items),
            rank: 0,
        })
        .collect();
    users.sort_by(|a, b| {
        b.summary
            .on_time_rate
            .total_cmp(&a.summary.on_time_rate)
            .then_with(|| a.summary.avg_percent_used.total_cmp(&b.summary.avg_percent_used))
            .then_with(|| a.user.cmp(&b.user))
    });
    for (i, u) in users.iter_mut().enumerate() {
        u.rank = i + 1;
    }

    match user {
        Some(id) => users.into_iter().filter(|u| u.user == Some(id)).collect(),
        None => users,
    }
}

/// Everything completed for one entity, by stage and by user
pub fn entity_performance(completions: &[Completion], entity: &EntityRef) -> EntityPerformance {
    let own: Vec<Completion> = completions
        .iter()
        .filter(|c| c.key.entity == *entity)
        .cloned()
        .collect();

    EntityPerformance {
        entity: *entity,
        summary: Summary::of(&own),
        steps: workflow_step_performance(&own, None),
        users: user_performance(&own, None),
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Weekly buckets covering `[from, to)`, including weeks without completions
pub fn trends(completions: &[Completion], from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TrendBucket> {
    let mut weeks: BTreeMap<NaiveDate, Vec<&Completion>> = BTreeMap::new();
    if from < to {
        let mut week = week_start(from.date_naive());
        let last = week_start((to - Duration::milliseconds(1)).date_naive());
        while week <= last {
            weeks.insert(week, Vec::new());
            week += Duration::weeks(1);
        }
    }
    for c in completions {
        if c.completed_at >= from && c.completed_at < to {
            weeks
                .entry(week_start(c.completed_at.date_naive()))
                .or_default()
                .push(c);
        }
    }

    let mut recent: Vec<f64> = Vec::new();
    weeks
        .into_iter()
        .map(|(start, items)| {
            let summary = Summary::of(items);
            let has_data = summary.completions > 0;
            let avg = has_data.then_some(summary.avg_percent_used);
            if let Some(value) = avg {
                recent.push(value);
            }
            let window = &recent[recent.len().saturating_sub(3)..];
            let iso = start.iso_week();
            TrendBucket {
                week: format!("{}-W{:02}", iso.year(), iso.week()),
                week_start: start,
                completions: summary.completions,
                on_time_rate: has_data.then_some(summary.on_time_rate),
                avg_percent_used: avg,
                moving_avg_percent_used: (!window.is_empty())
                    .then(|| window.iter().sum::<f64>() / window.len() as f64),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::{EntityType, EventId};
    use crate::core::timer::Timer;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
    }

    fn completion(stage: &str, user: i64, hours_taken: i64, hours_allocated: i64, day: i64) -> Completion {
        let started_at = t0() + Duration::days(day);
        let completed_at = started_at + Duration::hours(hours_taken);
        let actual_ms = Duration::hours(hours_taken).num_milliseconds();
        let allocated_ms = Duration::hours(hours_allocated).num_milliseconds();
        let overdue_ms = (actual_ms - allocated_ms).max(0);
        Completion {
            timer_id: TimerId(day),
            key: EntityRef::new(EntityType::Tender, 1).stage(stage),
            workflow_code: Some("TENDERING_WF".to_string()),
            assigned_user: Some(UserId(user)),
            completed_by: Some(UserId(user)),
            started_at,
            completed_at,
            actual_ms,
            allocated_ms,
            ratio: actual_ms as f64 / allocated_ms as f64,
            on_time: overdue_ms == 0,
            overdue_ms,
        }
    }

    #[test]
    fn test_from_complete_event_snapshot() {
        let key = EntityRef::new(EntityType::Tender, 42).stage("costing_sheets");
        let mut timer = Timer::new(TimerId(3), key, None, t0());
        timer.start(Duration::hours(4), Some(UserId(9)), UserId(1), t0()).unwrap();
        timer.pause(None, UserId(1), t0() + Duration::hours(1)).unwrap();
        timer.resume(UserId(1), t0() + Duration::hours(2)).unwrap();
        let draft = timer
            .complete(None, UserId(2), t0() + Duration::hours(6))
            .unwrap();

        let event = TimerEvent {
            id: EventId(10),
            timer_id: TimerId(3),
            event_type: draft.event_type,
            previous_status: draft.previous_status,
            new_status: draft.new_status,
            performed_by: draft.performed_by,
            reason: None,
            duration_change_ms: None,
            snapshot: Some(serde_json::to_value(&draft.snapshot).unwrap()),
            created_at: draft.created_at,
        };

        let c = Completion::from_event(&event).unwrap();
        assert_eq!(c.actual_ms, Duration::hours(5).num_milliseconds());
        assert_eq!(c.allocated_ms, Duration::hours(4).num_milliseconds());
        assert_eq!(c.overdue_ms, Duration::hours(1).num_milliseconds());
        assert!(!c.on_time);
        assert_eq!(c.credited_user(), Some(UserId(9)));
        assert_eq!(c.completed_by, Some(UserId(2)));
    }

    #[test]
    fn test_from_event_ignores_other_events() {
        let event = TimerEvent {
            id: EventId(1),
            timer_id: TimerId(1),
            event_type: TimerEventType::Pause,
            previous_status: None,
            new_status: crate::core::timer::TimerStatus::Paused,
            performed_by: None,
            reason: None,
            duration_change_ms: None,
            snapshot: None,
            created_at: t0(),
        };
        assert!(Completion::from_event(&event).is_none());
    }

    #[test]
    fn test_summary_figures() {
        let items = vec![
            completion("a", 1, 2, 4, 0),
            completion("a", 1, 6, 4, 1),
        ];
        let s = Summary::of(&items);
        assert_eq!(s.completions, 2);
        assert_eq!(s.on_time, 1);
        assert_eq!(s.on_time_rate, 50.0);
        assert_eq!(s.avg_percent_used, 100.0);
        assert_eq!(s.avg_overdue_ms, Duration::hours(2).num_milliseconds());
    }

    #[test]
    fn test_bottleneck_needs_enough_completions() {
        let mut items: Vec<Completion> = (0..4).map(|d| completion("slow", 1, 5, 4, d)).collect();
        assert!(!step_performance(&items, "slow").unwrap().is_bottleneck);

        items.push(completion("slow", 1, 5, 4, 4));
        let perf = step_performance(&items, "slow").unwrap();
        assert_eq!(perf.summary.on_time_rate, 0.0);
        assert!(perf.is_bottleneck);
        assert!(step_performance(&items, "other").is_none());
    }

    #[test]
    fn test_workflow_steps_sorted_worst_first() {
        let items = vec![
            completion("fast", 1, 1, 4, 0),
            completion("slow", 1, 5, 4, 0),
            completion("mixed", 1, 1, 4, 0),
            completion("mixed", 1, 5, 4, 1),
        ];
        let stages: Vec<_> = workflow_step_performance(&items, Some("TENDERING_WF"))
            .into_iter()
            .map(|s| s.stage)
            .collect();
        assert_eq!(stages, vec!["slow", "mixed", "fast"]);
        assert!(workflow_step_performance(&items, Some("EMD_WF")).is_empty());
    }

    #[test]
    fn test_user_ranking() {
        let items = vec![
            completion("a", 1, 5, 4, 0),
            completion("a", 2, 1, 4, 0),
            completion("a", 3, 3, 4, 0),
        ];
        let users = user_performance(&items, None);
        let order: Vec<_> = users.iter().map(|u| (u.user, u.rank)).collect();
        assert_eq!(
            order,
            vec![(Some(UserId(2)), 1), (Some(UserId(3)), 2), (Some(UserId(1)), 3)]
        );

        let one = user_performance(&items, Some(UserId(3)));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].rank, 2);
    }

    #[test]
    fn test_entity_performance_filters_entity() {
        let mut other = completion("a", 1, 1, 4, 0);
        other.key = EntityRef::new(EntityType::Tender, 2).stage("a");
        let items = vec![completion("a", 1, 1, 4, 0), other];

        let perf = entity_performance(&items, &EntityRef::new(EntityType::Tender, 1));
        assert_eq!(perf.summary.completions, 1);
        assert_eq!(perf.steps.len(), 1);
        assert_eq!(perf.users.len(), 1);
    }

    #[test]
    fn test_trends_weekly_with_moving_average() {
        // Weeks of 2025-03-03, 03-10 (empty), 03-17, 03-24
        let items = vec![
            completion("a", 1, 2, 4, 0),   // 50%
            completion("a", 1, 4, 4, 14),  // 100%
            completion("a", 1, 6, 4, 21),  // 150%
            completion("a", 1, 8, 4, 22),  // 200%
        ];
        let from = t0();
        let to = t0() + Duration::days(27);
        let buckets = trends(&items, from, to);

        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[0].week, "2025-W10");
        assert_eq!(buckets[1].completions, 0);
        assert_eq!(buckets[1].avg_percent_used, None);
        assert_eq!(buckets[1].moving_avg_percent_used, Some(50.0));
        assert_eq!(buckets[3].completions, 2);
        assert_eq!(buckets[3].avg_percent_used, Some(175.0));
        assert_eq!(buckets[3].moving_avg_percent_used, Some((50.0 + 100.0 + 175.0) / 3.0));
    }
}
