//! Query Service: offset and cursor pagination over the catalog.
//!
//! Offset pages skip `(page - 1) * limit` records, so their cost grows with
//! depth and they drift when records are inserted or deleted earlier in the
//! order. Cursor pages are anchored to the sort value and id of the last
//! record already seen:
//!
//! ```text
//! field past lastValue  OR  (field == lastValue AND id past lastId)
//! ```
//!
//! where "past" is `<` for descending sorts and `>` for ascending ones.
//! Ties on the sort field are therefore broken by id, and traversal is stable
//! under writes outside the range already visited.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use bookstore_db::{Direction, Document, Filter, FindOptions, SortKey, ID_FIELD};
use bookstore_kernel::settings::DatabaseSettings;

use super::catalog::{within, CatalogStore};
use super::error::CatalogError;
use super::models::BookField;

/// Limits and timeouts applied when a request leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub page_limit: usize,
    pub max_page_limit: usize,
    pub timeout: Duration,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self::from(&DatabaseSettings::default())
    }
}

impl From<&DatabaseSettings> for QueryDefaults {
    fn from(settings: &DatabaseSettings) -> Self {
        Self {
            page_limit: settings.default_page_limit,
            max_page_limit: settings.max_page_limit,
            timeout: Duration::from_millis(settings.query_timeout_ms),
        }
    }
}

/// One sort key over a book field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: BookField,
    pub direction: Direction,
}

impl Sort {
    pub fn new(field: BookField, direction: Direction) -> Self {
        Self { field, direction }
    }

    /// The default listing order.
    pub fn newest_first() -> Self {
        Self::new(BookField::CreatedAt, Direction::Descending)
    }

    /// Parse `-field`, `field`, `field:asc` or `field:desc`.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let raw = raw.trim();
        let (name, direction) = if let Some(name) = raw.strip_prefix('-') {
            (name, Direction::Descending)
        } else if let Some((name, dir)) = raw.split_once(':') {
            let direction = match dir.trim().to_ascii_lowercase().as_str() {
                "asc" | "ascending" | "1" => Direction::Ascending,
                "desc" | "descending" | "-1" => Direction::Descending,
                _ => return Err(CatalogError::invalid("sort", format!("unknown direction '{dir}'"))),
            };
            (name, direction)
        } else {
            (raw.strip_prefix('+').unwrap_or(raw), Direction::Ascending)
        };

        let field = BookField::parse(name)
            .ok_or_else(|| CatalogError::invalid("sort", format!("unknown field '{name}'")))?;
        if !field.is_sortable() {
            return Err(CatalogError::invalid(
                "sort",
                format!("'{}' is not sortable", field.key()),
            ));
        }
        Ok(Self::new(field, direction))
    }

    /// Parse a comma-separated list of sort keys.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, CatalogError> {
        raw.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    fn key(self) -> SortKey {
        SortKey::new(self.field.key(), self.direction)
    }
}

/// Fields to return for each record. The id is always returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection(Vec<BookField>);

impl Projection {
    pub fn new(fields: impl IntoIterator<Item = BookField>) -> Self {
        Self(fields.into_iter().collect())
    }

    /// Parse a comma-separated field list.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let fields = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                BookField::parse(part).ok_or_else(|| {
                    CatalogError::invalid("select", format!("unknown field '{part}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(fields))
    }

    fn including(mut self, field: BookField) -> Self {
        if !self.0.contains(&field) {
            self.0.push(field);
        }
        self
    }

    fn keys(&self) -> Vec<&'static str> {
        self.0.iter().map(|field| field.key()).collect()
    }
}

/// Record filters shared by both strategies and by count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    /// Case-insensitive substring of the title or the author.
    pub search: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
}

impl BookFilter {
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::All;
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter = filter.and(Filter::Or(vec![
                Filter::contains(BookField::Title.key(), search),
                Filter::contains(BookField::Author.key(), search),
            ]));
        }
        if let Some(author) = &self.author {
            filter = filter.and(Filter::eq(BookField::Author.key(), author.as_str()));
        }
        if let Some(title) = &self.title {
            filter = filter.and(Filter::eq(BookField::Title.key(), title.as_str()));
        }
        filter
    }
}

/// Parameters of the offset strategy. `None` fields take the service defaults.
#[derive(Debug, Clone, Default)]
pub struct OffsetParams {
    /// 1-based page number.
    pub page: Option<u64>,
    pub limit: Option<usize>,
    pub select: Option<Projection>,
    /// Ordered sort keys; empty means newest first.
    pub sort: Vec<Sort>,
    pub filter: BookFilter,
    pub timeout: Option<Duration>,
}

/// Parameters of the cursor strategy.
#[derive(Debug, Clone, Default)]
pub struct CursorParams {
    pub limit: Option<usize>,
    pub select: Option<Projection>,
    /// Single sort key; `None` means newest first.
    pub sort: Option<Sort>,
    /// Position of the last record of the previous page.
    pub after: Option<CursorPosition>,
    pub filter: BookFilter,
    pub timeout: Option<Duration>,
}

/// Sort value and id of the last record a caller has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub last_id: String,
    pub last_value: Value,
}

impl CursorPosition {
    /// Build a position from request text, typing `last_value` by the sort field.
    pub fn parse(field: BookField, last_id: &str, last_value: &str) -> Result<Self, CatalogError> {
        if last_id.trim().is_empty() {
            return Err(CatalogError::invalid("lastId", "required"));
        }
        let last_value = if field == BookField::Id {
            Value::String(last_id.to_string())
        } else {
            field.parse_value(last_value)?
        };
        Ok(Self {
            last_id: last_id.to_string(),
            last_value,
        })
    }

    fn of(doc: &Value, field: BookField) -> Option<Self> {
        let last_id = doc.get(ID_FIELD)?.as_str()?.to_string();
        let last_value = doc.get(field.key()).cloned().unwrap_or(Value::Null);
        Some(Self {
            last_id,
            last_value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetPage {
    pub items: Vec<Value>,
    pub page: u64,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorPage {
    pub items: Vec<Value>,
    /// Where the next page starts; `None` once the traversal is complete.
    pub next: Option<CursorPosition>,
}

/// Translates pagination parameters into catalog queries.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn CatalogStore>,
    defaults: QueryDefaults,
}

impl QueryService {
    pub fn new(store: Arc<dyn CatalogStore>, defaults: QueryDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn defaults(&self) -> QueryDefaults {
        self.defaults
    }

    fn limit(&self, requested: Option<usize>) -> Result<usize, CatalogError> {
        let limit = requested.unwrap_or(self.defaults.page_limit);
        if limit == 0 || limit > self.defaults.max_page_limit {
            return Err(CatalogError::invalid(
                "limit",
                format!("must be between 1 and {}", self.defaults.max_page_limit),
            ));
        }
        Ok(limit)
    }

    pub async fn list_offset(&self, params: OffsetParams) -> Result<OffsetPage, CatalogError> {
        let page = params.page.unwrap_or(1);
        if page == 0 {
            return Err(CatalogError::invalid("page", "must be 1 or greater"));
        }
        let limit = self.limit(params.limit)?;
        let skip = usize::try_from(page - 1)
            .ok()
            .and_then(|p| p.checked_mul(limit))
            .ok_or_else(|| CatalogError::invalid("page", "is too large"))?;

        let sort = if params.sort.is_empty() {
            vec![Sort::newest_first()]
        } else {
            params.sort
        };
        let mut options = FindOptions::new().skip(skip).limit(limit);
        for key in &sort {
            options = options.sort(key.key());
        }
        if !sort.iter().any(|key| key.field == BookField::Id) {
            let direction = sort.last().map_or(Direction::Descending, |key| key.direction);
            options = options.sort(SortKey::new(ID_FIELD, direction));
        }
        if let Some(select) = &params.select {
            options = options.project(select.keys());
        }

        let timeout = params.timeout.unwrap_or(self.defaults.timeout);
        let filter = params.filter.to_filter();
        let docs = within(timeout, self.store.list(&filter, &options)).await?;

        tracing::debug!(page, limit, skip, returned = docs.len(), "offset page served");
        Ok(OffsetPage {
            items: into_items(docs),
            page,
            limit,
        })
    }

    pub async fn list_cursor(&self, params: CursorParams) -> Result<CursorPage, CatalogError> {
        let limit = self.limit(params.limit)?;
        let sort = params.sort.unwrap_or_else(Sort::newest_first);
        let field = sort.field.key();

        let mut filter = params.filter.to_filter();
        if let Some(after) = &params.after {
            let past = |name: &str, value: Value| match sort.direction {
                Direction::Descending => Filter::lt(name, value),
                Direction::Ascending => Filter::gt(name, value),
            };
            filter = filter.and(Filter::Or(vec![
                past(field, after.last_value.clone()),
                Filter::And(vec![
                    Filter::eq(field, after.last_value.clone()),
                    past(ID_FIELD, Value::String(after.last_id.clone())),
                ]),
            ]));
        }

        // One extra record tells whether another page exists.
        let mut options = FindOptions::new().sort(sort.key()).limit(limit + 1);
        if sort.field != BookField::Id {
            options = options.sort(SortKey::new(ID_FIELD, sort.direction));
        }
        if let Some(select) = params.select {
            options = options.project(select.including(sort.field).keys());
        }

        let timeout = params.timeout.unwrap_or(self.defaults.timeout);
        let mut docs = within(timeout, self.store.list(&filter, &options)).await?;

        let has_more = docs.len() > limit;
        docs.truncate(limit);
        let items = into_items(docs);
        let next = if has_more {
            items.last().and_then(|last| CursorPosition::of(last, sort.field))
        } else {
            None
        };

        tracing::debug!(
            limit,
            returned = items.len(),
            has_more,
            "cursor page served"
        );
        Ok(CursorPage { items, next })
    }

    /// Number of records matching `filter`.
    pub async fn count(
        &self,
        filter: &BookFilter,
        timeout: Option<Duration>,
    ) -> Result<usize, CatalogError> {
        let timeout = timeout.unwrap_or(self.defaults.timeout);
        let filter = filter.to_filter();
        within(timeout, self.store.count(&filter)).await
    }
}

fn into_items(docs: Vec<Document>) -> Vec<Value> {
    docs.into_iter().map(Value::Object).collect()
}
