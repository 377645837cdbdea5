use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Records that can be listed, filtered and paginated
pub trait Listable {
    fn list_id(&self) -> Uuid;

    /// Timestamp used for most-recent-first ordering
    fn listed_at(&self) -> DateTime<Utc>;

    fn status_label(&self) -> &str;

    fn matches_kind(&self, kind: &str) -> bool;

    /// Fields searched by the free-text criterion
    fn search_fields(&self) -> Vec<&str>;
}

/// Conjunction of optional list criteria plus a pagination window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page_size(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// True when the item satisfies every present criterion. "all" and empty
    /// values are treated as absent, matching the dashboard filter buttons.
    pub fn matches<T: Listable>(&self, item: &T) -> bool {
        if let Some(status) = present(&self.status) {
            if !item.status_label().eq_ignore_ascii_case(status) {
                return false;
            }
        }
        if let Some(kind) = present(&self.kind) {
            if !item.matches_kind(kind) {
                return false;
            }
        }
        if let Some(text) = present(&self.text) {
            let needle = text.to_lowercase();
            if !item
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        let at = item.listed_at();
        if self.since.map_or(false, |since| at < since) {
            return false;
        }
        if self.until.map_or(false, |until| at > until) {
            return false;
        }
        true
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

/// Position after which the next page starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn of<T: Listable>(item: &T) -> Self {
        Self {
            at: item.listed_at(),
            id: item.list_id(),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.at.timestamp_nanos_opt().unwrap_or(i64::MAX);
        write!(f, "{}_{}", nanos, self.id)
    }
}

impl FromStr for Cursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (nanos, id) = s
            .split_once('_')
            .ok_or_else(|| format!("malformed cursor: {}", s))?;
        let nanos: i64 = nanos
            .parse()
            .map_err(|e| format!("malformed cursor timestamp: {}", e))?;
        let at = DateTime::from_timestamp_nanos(nanos);
        let id = Uuid::parse_str(id).map_err(|e| format!("malformed cursor id: {}", e))?;
        Ok(Self { at, id })
    }
}

/// One page of list results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matches across all pages
    pub total: usize,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

/// Most recent first, ties broken by ascending id
fn listing_order<T: Listable>(a: &T, b: &T) -> Ordering {
    b.listed_at()
        .cmp(&a.listed_at())
        .then_with(|| a.list_id().cmp(&b.list_id()))
}

fn is_after<T: Listable>(item: &T, cursor: &Cursor) -> bool {
    let at = item.listed_at();
    at < cursor.at || (at == cursor.at && item.list_id() > cursor.id)
}

/// Filter, order and window a collection according to the query
pub fn paginate<T: Listable>(items: impl IntoIterator<Item = T>, query: &ListQuery) -> Page<T> {
    let mut matched: Vec<T> = items.into_iter().filter(|i| query.matches(i)).collect();
    matched.sort_by(listing_order);
    let total = matched.len();

    let start = match &query.cursor {
        Some(cursor) => matched
            .iter()
            .position(|i| is_after(i, cursor))
            .unwrap_or(matched.len()),
        None => 0,
    };

    let limit = query.page_size();
    let mut page: Vec<T> = matched.into_iter().skip(start).collect();
    let next_cursor = if page.len() > limit {
        page.truncate(limit);
        page.last().map(Cursor::of)
    } else {
        None
    };

    Page {
        items: page,
        total,
        next_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone)]
    struct Row {
        id: Uuid,
        at: DateTime<Utc>,
        status: &'static str,
        kind: &'static str,
        name: String,
    }

    impl Listable for Row {
        fn list_id(&self) -> Uuid {
            self.id
        }
        fn listed_at(&self) -> DateTime<Utc> {
            self.at
        }
        fn status_label(&self) -> &str {
            self.status
        }
        fn matches_kind(&self, kind: &str) -> bool {
            self.kind == kind
        }
        fn search_fields(&self) -> Vec<&str> {
            vec![&self.name]
        }
    }

    fn rows() -> Vec<Row> {
        let base = Utc::now();
        (0..7)
            .map(|i| Row {
                id: Uuid::new_v4(),
                at: base - Duration::minutes(i / 2),
                status: if i % 2 == 0 { "active" } else { "inactive" },
                kind: if i < 3 { "linear" } else { "parallel" },
                name: format!("Pipeline {}", i),
            })
            .collect()
    }

    #[test]
    fn conjunction_of_criteria() {
        let query = ListQuery::new()
            .with_status("active")
            .with_kind("parallel")
            .with_text("PIPELINE");
        let page = paginate(rows(), &query);
        assert_eq!(page.total, 2);
        assert!(page
            .items
            .iter()
            .all(|r| r.status == "active" && r.kind == "parallel"));
    }

    #[test]
    fn all_means_no_filter() {
        let page = paginate(rows(), &ListQuery::new().with_status("all"));
        assert_eq!(page.total, 7);
    }

    #[test]
    fn pages_are_stable_and_disjoint() {
        let data = rows();
        let mut seen = Vec::new();
        let mut query = ListQuery::new().with_limit(3);
        loop {
            let page = paginate(data.clone(), &query);
            seen.extend(page.items.iter().map(|r| r.id));
            match page.next_cursor {
                Some(cursor) => query = query.after(cursor),
                None => break,
            }
        }
        let ordered = paginate(data, &ListQuery::new().with_limit(100));
        let expected: Vec<Uuid> = ordered.items.iter().map(|r| r.id).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn ordering_is_newest_first_with_id_tiebreak() {
        let page = paginate(rows(), &ListQuery::new());
        for pair in page.items.windows(2) {
            assert!(
                pair[0].at > pair[1].at || (pair[0].at == pair[1].at && pair[0].id < pair[1].id)
            );
        }
    }

    #[test]
    fn cursor_round_trips_through_text() {
        let row = rows().remove(0);
        let cursor = Cursor::of(&row);
        let parsed: Cursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);
        assert!("garbage".parse::<Cursor>().is_err());
    }
}
