use crate::domain::models::{DayPlan, Goal, Priority, is_pending_goal_id};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start
            .iter_days()
            .take_while(move |date| *date <= self.end)
    }

    pub fn start_key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_key(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// Monday through Sunday of the week containing `anchor`.
pub fn week_window(anchor: NaiveDate) -> DateWindow {
    let start = anchor.week(Weekday::Mon).first_day();
    let end = start.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX);
    DateWindow { start, end }
}

pub fn month_window(year: i32, month: u32) -> Option<DateWindow> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(DateWindow {
        start,
        end: next_month.pred_opt()?,
    })
}

pub fn goals_for_day(goals: &[Goal], day: NaiveDate) -> Vec<&Goal> {
    sorted(
        goals
            .iter()
            .filter(|goal| goal.deadline == Some(day))
            .collect(),
    )
}

pub fn goals_for_week(goals: &[Goal], anchor: NaiveDate) -> Vec<&Goal> {
    let window = week_window(anchor);
    sorted(
        goals
            .iter()
            .filter(|goal| goal.deadline.is_some_and(|deadline| window.contains(deadline)))
            .collect(),
    )
}

/// Goals due in the month, grouped by deadline day.
pub fn goals_for_month(goals: &[Goal], year: i32, month: u32) -> BTreeMap<NaiveDate, Vec<&Goal>> {
    let Some(window) = month_window(year, month) else {
        return BTreeMap::new();
    };
    let mut grouped: BTreeMap<NaiveDate, Vec<&Goal>> = BTreeMap::new();
    for goal in goals {
        if let Some(deadline) = goal.deadline.filter(|deadline| window.contains(*deadline)) {
            grouped.entry(deadline).or_default().push(goal);
        }
    }
    grouped
        .into_iter()
        .map(|(day, goals)| (day, sorted(goals)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalFilter {
    pub category: Option<String>,
    pub completed: Option<bool>,
}

pub fn list_view<'a>(goals: &'a [Goal], filter: &GoalFilter) -> Vec<&'a Goal> {
    let category = filter
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty());
    sorted(
        goals
            .iter()
            .filter(|goal| category.is_none_or(|category| goal.category.eq_ignore_ascii_case(category)))
            .filter(|goal| filter.completed.is_none_or(|completed| goal.completed == completed))
            .collect(),
    )
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

fn compare_goals(left: &Goal, right: &Goal) -> Ordering {
    priority_rank(left.priority)
        .cmp(&priority_rank(right.priority))
        .then_with(|| match (left.deadline, right.deadline) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| left.created_at.cmp(&right.created_at))
        .then_with(|| left.id.cmp(&right.id))
}

fn sorted(mut goals: Vec<&Goal>) -> Vec<&Goal> {
    goals.sort_by(|left, right| compare_goals(left, right));
    goals
}

/// Titles of the plan's top goals; unresolvable or placeholder references render as "".
pub fn top_goal_titles(plan: &DayPlan, goals: &[Goal]) -> Vec<String> {
    plan.displayed_top_goals()
        .iter()
        .map(|goal_id| {
            if is_pending_goal_id(goal_id) {
                return String::new();
            }
            goals
                .iter()
                .find(|goal| goal.id == *goal_id)
                .map(|goal| goal.title.clone())
                .unwrap_or_default()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionSummary {
    pub total: usize,
    pub completed: usize,
    pub percent_complete: u8,
    pub average_progress: u8,
}

pub fn completion_summary<'a, I>(goals: I) -> CompletionSummary
where
    I: IntoIterator<Item = &'a Goal>,
{
    let mut total = 0usize;
    let mut completed = 0usize;
    let mut progress_sum = 0usize;
    for goal in goals {
        total += 1;
        if goal.completed {
            completed += 1;
        }
        progress_sum += usize::from(goal.progress);
    }
    if total == 0 {
        return CompletionSummary::default();
    }
    CompletionSummary {
        total,
        completed,
        percent_complete: u8::try_from(completed * 100 / total).unwrap_or(100),
        average_progress: u8::try_from(progress_sum / total).unwrap_or(100),
    }
}

/// Form-level message that stays visible for a fixed window after it is raised.
#[derive(Debug, Clone)]
pub struct InlineNotice {
    message: Option<(String, Instant)>,
    duration: Duration,
}

impl InlineNotice {
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);

    pub fn new(duration: Duration) -> Self {
        Self {
            message: None,
            duration,
        }
    }

    pub fn raise(&mut self, message: impl Into<String>) {
        self.message = Some((message.into(), Instant::now()));
    }

    pub fn dismiss(&mut self) {
        self.message = None;
    }

    pub fn visible(&self) -> Option<&str> {
        self.message
            .as_ref()
            .filter(|(_, raised_at)| raised_at.elapsed() < self.duration)
            .map(|(message, _)| message.as_str())
    }
}

impl Default for InlineNotice {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GoalStatus, Meals};
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("parse date")
    }

    fn created(minute: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2024-03-01T08:{minute:02}:00Z"))
            .expect("parse time")
            .with_timezone(&Utc)
    }

    fn goal(id: &str, priority: Priority, deadline: Option<&str>, minute: u32) -> Goal {
        Goal {
            id: id.to_string(),
            title: format!("Goal {id}"),
            description: String::new(),
            priority,
            category: "personal".to_string(),
            deadline: deadline.map(date),
            completed: false,
            status: GoalStatus::NotStarted,
            progress: 0,
            created_at: created(minute),
        }
    }

    fn plan(top_goals: &[&str]) -> DayPlan {
        DayPlan {
            id: "2024-03-15".to_string(),
            date: "2024-03-15".to_string(),
            gratitude: String::new(),
            word_of_day: String::new(),
            great_day: String::new(),
            make_it_eleven: String::new(),
            side_quest: String::new(),
            top_goals: top_goals.iter().map(|id| id.to_string()).collect(),
            meals: Meals::default(),
            created_at: created(0),
            updated_at: created(1),
        }
    }

    #[test]
    fn week_window_runs_monday_to_sunday() {
        let window = week_window(date("2024-03-15"));
        assert_eq!(window.start, date("2024-03-11"));
        assert_eq!(window.end, date("2024-03-17"));
        assert_eq!(window.days().count(), 7);

        let sunday = week_window(date("2024-03-17"));
        assert_eq!(sunday, window);
    }

    #[test]
    fn month_window_handles_leap_february_and_december() {
        let february = month_window(2024, 2).expect("february");
        assert_eq!(february.end, date("2024-02-29"));

        let december = month_window(2024, 12).expect("december");
        assert_eq!(december.end, date("2024-12-31"));

        assert_eq!(month_window(2024, 13), None);
    }

    #[test]
    fn goals_without_deadline_only_appear_in_list_view() {
        let goals = vec![
            goal("a", Priority::Low, None, 0),
            goal("b", Priority::High, Some("2024-03-15"), 1),
        ];

        let day = goals_for_day(&goals, date("2024-03-15"));
        assert_eq!(day.iter().map(|goal| goal.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(goals_for_week(&goals, date("2024-03-11")).len(), 1);
        assert_eq!(list_view(&goals, &GoalFilter::default()).len(), 2);
    }

    #[test]
    fn month_view_groups_by_deadline() {
        let goals = vec![
            goal("a", Priority::Low, Some("2024-03-01"), 0),
            goal("b", Priority::High, Some("2024-03-01"), 1),
            goal("c", Priority::Medium, Some("2024-03-31"), 2),
            goal("d", Priority::Medium, Some("2024-04-01"), 3),
        ];

        let month = goals_for_month(&goals, 2024, 3);
        assert_eq!(month.len(), 2);
        let first = &month[&date("2024-03-01")];
        assert_eq!(first.iter().map(|goal| goal.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn list_view_orders_by_priority_deadline_then_creation() {
        let goals = vec![
            goal("late-none", Priority::High, None, 0),
            goal("medium", Priority::Medium, Some("2024-03-01"), 1),
            goal("high-later", Priority::High, Some("2024-03-20"), 2),
            goal("high-sooner", Priority::High, Some("2024-03-10"), 3),
            goal("high-none-newer", Priority::High, None, 4),
        ];

        let ordered = list_view(&goals, &GoalFilter::default())
            .into_iter()
            .map(|goal| goal.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            ordered,
            vec!["high-sooner", "high-later", "late-none", "high-none-newer", "medium"]
        );
    }

    #[test]
    fn list_view_applies_category_and_completion_filters() {
        let mut done = goal("done", Priority::High, None, 0);
        done.completed = true;
        done.category = "Work".to_string();
        let open = goal("open", Priority::High, None, 1);
        let goals = vec![done, open];

        let filter = GoalFilter {
            category: Some("work".to_string()),
            completed: None,
        };
        assert_eq!(list_view(&goals, &filter).len(), 1);

        let filter = GoalFilter {
            category: None,
            completed: Some(false),
        };
        assert_eq!(list_view(&goals, &filter)[0].id, "open");
    }

    #[test]
    fn deleted_top_goal_renders_as_empty_title() {
        let goals = vec![goal("g1", Priority::High, None, 0)];
        let titles = top_goal_titles(&plan(&["g1", "g2"]), &goals);
        assert_eq!(titles, vec!["Goal g1".to_string(), String::new()]);
    }

    #[test]
    fn placeholder_top_goal_renders_as_empty_title() {
        let mut pending = goal("temp-1", Priority::High, None, 0);
        pending.title = "Draft".to_string();
        let titles = top_goal_titles(&plan(&["temp-1"]), &[pending]);
        assert_eq!(titles, vec![String::new()]);
    }

    #[test]
    fn completion_summary_rounds_down() {
        let mut goals = vec![
            goal("a", Priority::High, None, 0),
            goal("b", Priority::High, None, 1),
            goal("c", Priority::High, None, 2),
        ];
        goals[0].completed = true;
        goals[0].progress = 100;
        goals[1].progress = 50;

        let summary = completion_summary(&goals);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.percent_complete, 33);
        assert_eq!(summary.average_progress, 50);
        assert_eq!(completion_summary(&[]), CompletionSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn inline_notice_expires_after_its_window() {
        let mut notice = InlineNotice::default();
        notice.raise("Failed to add goal");
        assert_eq!(notice.visible(), Some("Failed to add goal"));

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(notice.visible().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(notice.visible(), None);
    }

    proptest! {
        #[test]
        fn week_window_always_contains_anchor(offset in 0u64..20_000u64) {
            let anchor = date("2000-01-01") + Days::new(offset);
            let window = week_window(anchor);
            prop_assert!(window.contains(anchor));
            prop_assert_eq!(window.start.weekday(), Weekday::Mon);
            prop_assert_eq!(window.end.weekday(), Weekday::Sun);
        }
    }
}
