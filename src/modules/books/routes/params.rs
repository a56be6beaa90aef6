//! Query-string parameters of the list and count endpoints.

use serde::Deserialize;

use crate::modules::books::error::CatalogError;
use crate::modules::books::query::{
    BookFilter, CursorParams, CursorPosition, OffsetParams, Projection, Sort,
};

/// Raw list parameters. Values stay text until [`ListQuery::into_request`]
/// so malformed numbers are reported as field errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub select: Option<String>,
    pub search: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub strategy: Option<String>,
    pub last_id: Option<String>,
    pub last_value: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ListRequest {
    Offset(OffsetParams),
    Cursor(CursorParams),
}

impl ListQuery {
    pub fn filter(&self) -> BookFilter {
        BookFilter {
            search: non_empty(&self.search),
            author: non_empty(&self.author),
            title: non_empty(&self.title),
        }
    }

    /// Pick a strategy and type every parameter for it.
    pub fn into_request(self) -> Result<ListRequest, CatalogError> {
        let cursor = match self.strategy.as_deref().map(str::trim) {
            None | Some("") => self.last_id.is_some() || self.last_value.is_some(),
            Some("offset") => false,
            Some("cursor") => true,
            Some(other) => {
                return Err(CatalogError::invalid(
                    "strategy",
                    format!("expected 'offset' or 'cursor', got '{other}'"),
                ))
            }
        };

        let filter = self.filter();
        let limit = parse_number("limit", &self.limit)?;
        let select = self.select.as_deref().map(Projection::parse).transpose()?;
        let mut sort = match self.sort.as_deref() {
            Some(raw) => Sort::parse_list(raw)?,
            None => Vec::new(),
        };

        if !cursor {
            if self.last_id.is_some() || self.last_value.is_some() {
                return Err(CatalogError::invalid(
                    "lastId",
                    "only valid with the cursor strategy",
                ));
            }
            return Ok(ListRequest::Offset(OffsetParams {
                page: parse_number("page", &self.page)?,
                limit,
                select,
                sort,
                filter,
                timeout: None,
            }));
        }

        if self.page.is_some() {
            return Err(CatalogError::invalid(
                "page",
                "not valid with the cursor strategy",
            ));
        }
        if sort.len() > 1 {
            return Err(CatalogError::invalid(
                "sort",
                "the cursor strategy takes a single sort key",
            ));
        }
        let sort = sort.pop().unwrap_or_else(Sort::newest_first);

        let after = match (non_empty(&self.last_id), self.last_value) {
            (None, None) => None,
            (Some(last_id), Some(last_value)) => {
                Some(CursorPosition::parse(sort.field, &last_id, &last_value)?)
            }
            (Some(_), None) => return Err(CatalogError::invalid("lastValue", "required with lastId")),
            (None, Some(_)) => return Err(CatalogError::invalid("lastId", "required with lastValue")),
        };

        Ok(ListRequest::Cursor(CursorParams {
            limit,
            select,
            sort: Some(sort),
            after,
            filter,
            timeout: None,
        }))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_number<T: std::str::FromStr>(
    field: &'static str,
    raw: &Option<String>,
) -> Result<Option<T>, CatalogError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| CatalogError::invalid(field, "must be a positive integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::models::BookField;
    use bookstore_db::Direction;

    fn query(pairs: &[(&str, &str)]) -> ListQuery {
        let object = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object)).unwrap()
    }

    #[test]
    fn plain_query_is_offset() {
        let request = query(&[("page", "2"), ("limit", "5"), ("sort", "price:asc,-title")])
            .into_request()
            .unwrap();
        let ListRequest::Offset(params) = request else {
            panic!("expected offset");
        };
        assert_eq!(params.page, Some(2));
        assert_eq!(params.limit, Some(5));
        assert_eq!(
            params.sort,
            vec![
                Sort::new(BookField::Price, Direction::Ascending),
                Sort::new(BookField::Title, Direction::Descending),
            ]
        );
    }

    #[test]
    fn last_id_selects_cursor() {
        let request = query(&[
            ("lastId", "b2"),
            ("lastValue", "2024-01-01T00:00:01Z"),
            ("search", " kindred "),
        ])
        .into_request()
        .unwrap();
        let ListRequest::Cursor(params) = request else {
            panic!("expected cursor");
        };
        assert_eq!(params.sort, Some(Sort::newest_first()));
        assert_eq!(params.filter.search.as_deref(), Some("kindred"));
        let after = params.after.unwrap();
        assert_eq!(after.last_id, "b2");
        assert_eq!(after.last_value, "2024-01-01T00:00:01.000000Z");
    }

    #[test]
    fn inconsistent_parameters_are_rejected() {
        let cases: &[&[(&str, &str)]] = &[
            &[("lastId", "b2")],
            &[("strategy", "cursor"), ("lastValue", "3")],
            &[("strategy", "offset"), ("lastId", "b2"), ("lastValue", "3")],
            &[("strategy", "cursor"), ("sort", "price,title")],
            &[("strategy", "cursor"), ("page", "2")],
            &[("strategy", "sideways")],
            &[("page", "two")],
            &[("select", "title,isbn")],
        ];
        for pairs in cases {
            assert!(
                matches!(query(pairs).into_request(), Err(CatalogError::Validation(_))),
                "{pairs:?}"
            );
        }
    }
}
