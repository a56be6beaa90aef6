//! Query builder types executed by [`crate::Collection`], and their SQL rendering.

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::Document;

/// Field holding the document identifier.
pub const ID_FIELD: &str = "id";

/// Sort direction for a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    /// Case-insensitive substring match on a text field.
    Contains(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains(field.into(), needle.into())
    }

    /// Conjunction that collapses `All` operands.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), f) => {
                left.push(f);
                Self::And(left)
            }
            (f, other) => Self::And(vec![f, other]),
        }
    }

    /// Render as a `WHERE` clause, appending bound values to `params`.
    pub(crate) fn to_sql(&self, params: &mut Vec<SqlValue>) -> Result<String, StoreError> {
        let clause = match self {
            Self::All => "1".to_string(),
            Self::Eq(name, Value::Null) => format!("{} IS NULL", column(name)?),
            Self::Eq(name, value) => {
                params.push(bind(value));
                format!("{} = ?", column(name)?)
            }
            Self::Lt(name, bound) => {
                params.push(bind(bound));
                format!("{} < ?", column(name)?)
            }
            Self::Gt(name, bound) => {
                params.push(bind(bound));
                format!("{} > ?", column(name)?)
            }
            Self::Contains(name, needle) => {
                params.push(SqlValue::Text(needle.to_lowercase()));
                let column = column(name)?;
                format!("(typeof({column}) = 'text' AND instr(lower({column}), ?) > 0)")
            }
            Self::And(filters) => join(filters, " AND ", "1", params)?,
            Self::Or(filters) => join(filters, " OR ", "0", params)?,
        };
        Ok(clause)
    }
}

fn join(
    filters: &[Filter],
    separator: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String, StoreError> {
    if filters.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = filters
        .iter()
        .map(|f| f.to_sql(params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(separator)))
}

/// The SQL expression reading `field` from a stored document.
///
/// Index definitions and queries must render the same expression for the
/// planner to match them.
pub(crate) fn column(field: &str) -> Result<String, StoreError> {
    if field == ID_FIELD {
        return Ok(ID_FIELD.to_string());
    }
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::invalid_query(format!(
            "field name '{field}' is not addressable"
        )));
    }
    Ok(format!("json_extract(doc, '$.{field}')"))
}

/// JSON scalars bind as the SQL value `json_extract` yields for them.
fn bind(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// One key of a sort specification or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, Direction::Ascending)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, Direction::Descending)
    }
}

fn key_list(keys: &[SortKey]) -> Result<String, StoreError> {
    let parts = keys
        .iter()
        .map(|key| Ok(format!("{} {}", column(&key.field)?, key.direction.sql())))
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(parts.join(", "))
}

/// Sort, skip, limit and projection for a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: usize,
    pub limit: Option<usize>,
    /// Fields to return; `id` is always included. `None` returns whole documents.
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// `ORDER BY`, `LIMIT` and `OFFSET` tail of a select.
    pub(crate) fn to_sql(&self, params: &mut Vec<SqlValue>) -> Result<String, StoreError> {
        let mut tail = String::new();
        if !self.sort.is_empty() {
            tail.push_str(" ORDER BY ");
            tail.push_str(&key_list(&self.sort)?);
        }
        let limit = match self.limit {
            Some(limit) => as_sql_integer(limit, "limit")?,
            None => -1,
        };
        params.push(SqlValue::Integer(limit));
        params.push(SqlValue::Integer(as_sql_integer(self.skip, "skip")?));
        tail.push_str(" LIMIT ? OFFSET ?");
        Ok(tail)
    }

    pub(crate) fn apply_projection(&self, doc: Document) -> Document {
        match &self.projection {
            None => doc,
            Some(fields) => doc
                .into_iter()
                .filter(|(name, _)| name.as_str() == ID_FIELD || fields.contains(name))
                .collect(),
        }
    }
}

fn as_sql_integer(value: usize, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::invalid_query(format!("{what} {value} is too large")))
}

/// Declared index over one or more keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<SortKey>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn key(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.keys.push(SortKey::new(field, direction));
        self
    }

    /// Whether a sort led by `field` can be served by this index.
    pub fn leads_with(&self, field: &str) -> bool {
        self.keys.first().is_some_and(|key| key.field == field)
    }

    /// Column list for `CREATE INDEX ... ON table (<columns>)`.
    pub(crate) fn columns_sql(&self) -> Result<String, StoreError> {
        key_list(&self.keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn compound_filter_renders_bound_predicates() {
        let filter = Filter::eq("author", "Le Guin").and(Filter::lt("price", 20));
        let mut params = Vec::new();
        let clause = filter.to_sql(&mut params).unwrap();
        assert_eq!(
            clause,
            "(json_extract(doc, '$.author') = ? AND json_extract(doc, '$.price') < ?)"
        );
        assert_eq!(
            params,
            vec![SqlValue::Text("Le Guin".into()), SqlValue::Integer(20)]
        );
    }

    #[test]
    fn keyset_predicate_uses_the_id_column() {
        let filter = Filter::Or(vec![
            Filter::lt("createdAt", "2024-01-01T00:00:01.000000Z"),
            Filter::eq("createdAt", "2024-01-01T00:00:01.000000Z").and(Filter::lt("id", "b2")),
        ]);
        let mut params = Vec::new();
        let clause = filter.to_sql(&mut params).unwrap();
        assert_eq!(
            clause,
            "(json_extract(doc, '$.createdAt') < ? OR \
             (json_extract(doc, '$.createdAt') = ? AND id < ?))"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn contains_lowers_the_needle() {
        let mut params = Vec::new();
        let clause = Filter::contains("title", "Dispos").to_sql(&mut params).unwrap();
        assert!(clause.contains("instr(lower(json_extract(doc, '$.title')), ?)"));
        assert_eq!(params, vec![SqlValue::Text("dispos".into())]);
    }

    #[test]
    fn empty_disjunction_matches_nothing() {
        let mut params = Vec::new();
        assert_eq!(Filter::Or(Vec::new()).to_sql(&mut params).unwrap(), "0");
        assert_eq!(Filter::All.to_sql(&mut params).unwrap(), "1");
    }

    #[test]
    fn and_collapses_all() {
        let f = Filter::All.and(Filter::eq("a", 1));
        assert_eq!(f, Filter::eq("a", 1));
        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        assert!(matches!(f, Filter::And(ref parts) if parts.len() == 3));
    }

    #[test]
    fn unsafe_field_names_are_rejected() {
        let mut params = Vec::new();
        let err = Filter::eq("title') OR 1=1 --", "x")
            .to_sql(&mut params)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn options_render_order_limit_and_offset() {
        let options = FindOptions::new()
            .sort(SortKey::desc("price"))
            .sort(SortKey::desc("id"))
            .skip(4)
            .limit(2);
        let mut params = Vec::new();
        let tail = options.to_sql(&mut params).unwrap();
        assert_eq!(
            tail,
            " ORDER BY json_extract(doc, '$.price') DESC, id DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(params, vec![SqlValue::Integer(2), SqlValue::Integer(4)]);
    }

    #[test]
    fn projection_keeps_id() {
        let Value::Object(book) = json!({"id": "b1", "title": "Kindred", "price": 9}) else {
            unreachable!()
        };
        let projected = FindOptions::new().project(["title"]).apply_projection(book);
        assert_eq!(Value::Object(projected), json!({"id": "b1", "title": "Kindred"}));
    }
}
