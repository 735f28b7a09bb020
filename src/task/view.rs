use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::Task;
use crate::error::Error;

/// Which slice of the list to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    All,
    Completed,
    Pending,
}

impl Filter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Filter::All => true,
            Filter::Completed => task.completed,
            Filter::Pending => !task.completed,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "all"),
            Filter::Completed => write!(f, "completed"),
            Filter::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(Filter::All),
            "completed" | "done" => Ok(Filter::Completed),
            "pending" | "open" => Ok(Filter::Pending),
            _ => Err(Error::validation(format!("Invalid filter: {s}"))),
        }
    }
}

/// Display order: incomplete first, then higher score, then newer first.
pub fn priority_order(a: &Task, b: &Task) -> Ordering {
    a.completed
        .cmp(&b.completed)
        .then_with(|| b.total_score().cmp(&a.total_score()))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Stable sort, so tasks equal on every key keep their input order.
pub fn sort_by_priority(tasks: &mut [Task]) {
    tasks.sort_by(priority_order);
}

/// Filter then sort a copy of `tasks` for display.
pub fn render(tasks: &[Task], filter: Filter) -> Vec<Task> {
    let mut visible: Vec<Task> = tasks
        .iter()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect();
    sort_by_priority(&mut visible);
    visible
}

/// The task a reminder should point at, if any is still open.
pub fn top_pending(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|task| !task.completed)
        .min_by(|a, b| priority_order(a, b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl TaskStats {
    pub fn of(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|task| task.completed).count();
        Self {
            total: tasks.len(),
            completed,
            pending: tasks.len() - completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Level, Priority, TaskId};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    /// Priority vector with importance/urgency chosen to hit `score`.
    fn priority_with_score(score: u8) -> Priority {
        match score {
            15 => Priority::uniform(Level::Low),
            20 => Priority::new(Level::Medium, Level::Low, Level::Low, Level::Low, Level::Low),
            29 => Priority::new(Level::High, Level::Medium, Level::Low, Level::Low, Level::Low),
            40 => Priority::new(Level::High, Level::High, Level::High, Level::Low, Level::Medium),
            45 => Priority::uniform(Level::High),
            other => panic!("no fixture for score {other}"),
        }
    }

    fn task(id: &str, completed: bool, score: u8, age_minutes: i64) -> Task {
        let created = base_time() - Duration::minutes(age_minutes);
        Task {
            id: TaskId::from(id),
            text: format!("task {id}"),
            completed,
            priority: priority_with_score(score),
            created_at: created,
            updated_at: created,
        }
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_fixture_scores() {
        for score in [15, 20, 29, 40, 45] {
            assert_eq!(priority_with_score(score).total_score(), score);
        }
    }

    #[test]
    fn test_render_incomplete_first_then_score() {
        let tasks = vec![
            task("done40", true, 40, 0),
            task("open20", false, 20, 0),
            task("open40", false, 40, 0),
        ];

        let rendered = render(&tasks, Filter::All);
        assert_eq!(ids(&rendered), vec!["open40", "open20", "done40"]);
    }

    #[test]
    fn test_ties_broken_by_newest_first() {
        let tasks = vec![
            task("old", false, 29, 60),
            task("new", false, 29, 1),
            task("mid", false, 29, 30),
        ];

        let rendered = render(&tasks, Filter::All);
        assert_eq!(ids(&rendered), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_identical_keys_keep_input_order() {
        let tasks = vec![task("a", false, 29, 5), task("b", false, 29, 5)];
        assert_eq!(ids(&render(&tasks, Filter::All)), vec!["a", "b"]);
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut tasks = vec![
            task("a", true, 45, 3),
            task("b", false, 15, 2),
            task("c", false, 45, 9),
            task("d", false, 45, 1),
            task("e", true, 20, 0),
        ];
        sort_by_priority(&mut tasks);
        let once = tasks.clone();
        sort_by_priority(&mut tasks);
        assert_eq!(tasks, once);
    }

    #[test]
    fn test_filters() {
        let tasks = vec![
            task("done", true, 40, 0),
            task("open", false, 20, 0),
        ];
        assert_eq!(ids(&render(&tasks, Filter::Completed)), vec!["done"]);
        assert_eq!(ids(&render(&tasks, Filter::Pending)), vec!["open"]);
        assert_eq!(render(&tasks, Filter::All).len(), 2);
    }

    #[test]
    fn test_top_pending_matches_render_head() {
        let tasks = vec![
            task("done45", true, 45, 0),
            task("open29", false, 29, 0),
            task("open40-old", false, 40, 10),
            task("open40-new", false, 40, 1),
        ];
        let top = top_pending(&tasks).unwrap();
        assert_eq!(top.id.as_str(), "open40-new");
        assert_eq!(&render(&tasks, Filter::Pending)[0], top);
    }

    #[test]
    fn test_top_pending_none_when_all_done() {
        let tasks = vec![task("done", true, 40, 0)];
        assert!(top_pending(&tasks).is_none());
        assert!(top_pending(&[]).is_none());
    }

    #[test]
    fn test_filter_from_str() {
        assert_eq!("Pending".parse::<Filter>().unwrap(), Filter::Pending);
        assert_eq!("completed".parse::<Filter>().unwrap(), Filter::Completed);
        assert_eq!("".parse::<Filter>().unwrap(), Filter::All);
        assert!("archived".parse::<Filter>().is_err());
    }

    #[test]
    fn test_stats() {
        let tasks = vec![
            task("a", true, 40, 0),
            task("b", false, 20, 0),
            task("c", false, 15, 0),
        ];
        assert_eq!(
            TaskStats::of(&tasks),
            TaskStats {
                total: 3,
                completed: 1,
                pending: 2
            }
        );
    }
}
