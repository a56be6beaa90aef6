use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bookstore_db::Document;

use super::error::{CatalogError, FieldError};

/// Collection holding book documents.
pub const COLLECTION: &str = "books";

pub const TITLE_MAX_CHARS: usize = 100;

/// A stored book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Store-assigned identifier, never changes
    pub id: String,
    pub title: String,
    pub author: String,
    pub price: f64,
    pub description: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn from_document(doc: Document) -> Result<Self, CatalogError> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}

/// Fixed-width RFC 3339 timestamps with microsecond precision.
///
/// Stored timestamps are compared as text, so every value must use this format.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    pub fn format(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|at| at.with_timezone(&Utc).trunc_subsecs(6))
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Price as submitted: a JSON number or numeric text from an HTML form.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceInput {
    Number(f64),
    Text(String),
}

impl From<f64> for PriceInput {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Payload for the add-book operation.
///
/// Every field is optional here so missing fields are reported with the
/// other validation errors instead of as a malformed body.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub title: Option<String>,
    pub author: Option<String>,
    pub price: Option<PriceInput>,
    pub description: Option<String>,
}

/// Payload for the edit operation. Absent fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct BookChanges {
    pub title: Option<String>,
    pub author: Option<String>,
    pub price: Option<PriceInput>,
    pub description: Option<String>,
}

/// Typed reads from a JSON request body. A field of the wrong JSON type is
/// recorded as a field error; absent and `null` fields read as `None`.
struct BodyFields {
    fields: serde_json::Map<String, Value>,
    errors: Vec<FieldError>,
}

impl BodyFields {
    fn new(body: Value) -> Result<Self, CatalogError> {
        match body {
            Value::Object(fields) => Ok(Self {
                fields,
                errors: Vec::new(),
            }),
            _ => Err(CatalogError::invalid("body", "must be a JSON object")),
        }
    }

    fn text(&mut self, field: &'static str) -> Option<String> {
        match self.fields.remove(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text),
            Some(_) => {
                self.errors.push(FieldError::new(field, "must be a string"));
                None
            }
        }
    }

    fn price(&mut self) -> Option<PriceInput> {
        match self.fields.remove("price") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64().map(PriceInput::Number),
            Some(Value::String(raw)) => Some(PriceInput::Text(raw)),
            Some(_) => {
                self.errors.push(FieldError::new("price", "must be a number"));
                None
            }
        }
    }

    fn finish<T>(self, value: T) -> Result<T, CatalogError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(CatalogError::Validation(self.errors))
        }
    }
}

/// A [`NewBook`] that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBook {
    title: String,
    author: String,
    price: f64,
    description: String,
}

/// [`BookChanges`] that passed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedChanges {
    title: Option<String>,
    author: Option<String>,
    price: Option<f64>,
    description: Option<String>,
}

#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn required(&mut self, field: &'static str, value: Option<String>) -> Option<String> {
        match value {
            Some(v) => self.text(field, v),
            None => {
                self.errors.push(FieldError::new(field, "required"));
                None
            }
        }
    }

    fn text(&mut self, field: &'static str, value: String) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.errors.push(FieldError::new(field, "required"));
            return None;
        }
        if field == "title" && trimmed.chars().count() > TITLE_MAX_CHARS {
            self.errors.push(FieldError::new(
                field,
                format!("must be at most {TITLE_MAX_CHARS} characters"),
            ));
            return None;
        }
        Some(trimmed.to_string())
    }

    fn required_price(&mut self, value: Option<PriceInput>) -> Option<f64> {
        match value {
            Some(v) => self.price(v),
            None => {
                self.errors.push(FieldError::new("price", "required"));
                None
            }
        }
    }

    fn price(&mut self, value: PriceInput) -> Option<f64> {
        let parsed = match value {
            PriceInput::Number(n) => Some(n),
            PriceInput::Text(raw) => raw.trim().parse::<f64>().ok(),
        };
        match parsed {
            Some(price) if !price.is_finite() => {
                self.errors.push(FieldError::new("price", "must be a finite number"));
                None
            }
            Some(price) if price <= 0.0 => {
                self.errors.push(FieldError::new("price", "must be positive"));
                None
            }
            Some(price) => Some(price),
            None => {
                self.errors.push(FieldError::new("price", "must be a number"));
                None
            }
        }
    }

    fn finish<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, CatalogError> {
        if !self.errors.is_empty() {
            return Err(CatalogError::Validation(self.errors));
        }
        value().ok_or_else(|| CatalogError::Validation(Vec::new()))
    }
}

impl NewBook {
    /// Read a request body; unknown fields are ignored.
    pub fn from_body(body: Value) -> Result<Self, CatalogError> {
        let mut body = BodyFields::new(body)?;
        let book = Self {
            title: body.text("title"),
            author: body.text("author"),
            price: body.price(),
            description: body.text("description"),
        };
        body.finish(book)
    }

    pub fn validate(self) -> Result<ValidatedBook, CatalogError> {
        let mut check = Checker::default();
        let title = check.required("title", self.title);
        let author = check.required("author", self.author);
        let price = check.required_price(self.price);
        let description = check.required("description", self.description);

        check.finish(|| {
            Some(ValidatedBook {
                title: title?,
                author: author?,
                price: price?,
                description: description?,
            })
        })
    }
}

impl BookChanges {
    pub fn from_body(body: Value) -> Result<Self, CatalogError> {
        let mut body = BodyFields::new(body)?;
        let changes = Self {
            title: body.text("title"),
            author: body.text("author"),
            price: body.price(),
            description: body.text("description"),
        };
        body.finish(changes)
    }

    pub fn validate(self) -> Result<ValidatedChanges, CatalogError> {
        let mut check = Checker::default();
        let title = self.title.and_then(|v| check.text("title", v));
        let author = self.author.and_then(|v| check.text("author", v));
        let price = self.price.and_then(|v| check.price(v));
        let description = self.description.and_then(|v| check.text("description", v));

        check.finish(|| {
            Some(ValidatedChanges {
                title,
                author,
                price,
                description,
            })
        })
    }
}

impl ValidatedBook {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Document for a new record created at `now`; the store assigns the id.
    pub(crate) fn into_document(self, now: DateTime<Utc>) -> Document {
        let stamp = Value::String(timestamp::format(&now));
        let mut doc = Document::new();
        doc.insert(BookField::Title.key().into(), Value::String(self.title));
        doc.insert(BookField::Author.key().into(), Value::String(self.author));
        doc.insert(BookField::Price.key().into(), Value::from(self.price));
        doc.insert(
            BookField::Description.key().into(),
            Value::String(self.description),
        );
        doc.insert(BookField::CreatedAt.key().into(), stamp.clone());
        doc.insert(BookField::UpdatedAt.key().into(), stamp);
        doc
    }
}

impl ValidatedChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.price.is_none()
            && self.description.is_none()
    }

    /// Fields to merge into a stored record edited at `now`.
    pub(crate) fn into_document(self, now: DateTime<Utc>) -> Document {
        let mut doc = Document::new();
        if let Some(title) = self.title {
            doc.insert(BookField::Title.key().into(), Value::String(title));
        }
        if let Some(author) = self.author {
            doc.insert(BookField::Author.key().into(), Value::String(author));
        }
        if let Some(price) = self.price {
            doc.insert(BookField::Price.key().into(), Value::from(price));
        }
        if let Some(description) = self.description {
            doc.insert(BookField::Description.key().into(), Value::String(description));
        }
        doc.insert(
            BookField::UpdatedAt.key().into(),
            Value::String(timestamp::format(&now)),
        );
        doc
    }
}

/// Named book fields usable in `sort` and `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookField {
    Id,
    Title,
    Author,
    Price,
    Description,
    CreatedAt,
    UpdatedAt,
}

impl BookField {
    pub const ALL: [BookField; 7] = [
        BookField::Id,
        BookField::Title,
        BookField::Author,
        BookField::Price,
        BookField::Description,
        BookField::CreatedAt,
        BookField::UpdatedAt,
    ];

    /// Document key for this field.
    pub fn key(self) -> &'static str {
        match self {
            BookField::Id => "id",
            BookField::Title => "title",
            BookField::Author => "author",
            BookField::Price => "price",
            BookField::Description => "description",
            BookField::CreatedAt => "createdAt",
            BookField::UpdatedAt => "updatedAt",
        }
    }

    /// Accepts the document key or its snake_case spelling.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|field| {
            field.key() == raw
                || match field {
                    BookField::CreatedAt => raw == "created_at",
                    BookField::UpdatedAt => raw == "updated_at",
                    _ => false,
                }
        })
    }

    /// Fields backed by an index in the books migration.
    pub fn is_sortable(self) -> bool {
        matches!(
            self,
            BookField::Id
                | BookField::Title
                | BookField::Author
                | BookField::Price
                | BookField::CreatedAt
        )
    }

    /// Convert a cursor value from text into the stored representation of this field.
    pub fn parse_value(self, raw: &str) -> Result<Value, CatalogError> {
        match self {
            BookField::CreatedAt | BookField::UpdatedAt => timestamp::parse(raw)
                .map(|at| Value::String(timestamp::format(&at)))
                .map_err(|_| CatalogError::invalid("lastValue", "must be an RFC 3339 timestamp")),
            BookField::Price => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| CatalogError::invalid("lastValue", "must be a number")),
            _ => Ok(Value::String(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_book(price: f64) -> NewBook {
        NewBook {
            title: Some("  The Left Hand of Darkness ".to_string()),
            author: Some("Ursula K. Le Guin".to_string()),
            price: Some(price.into()),
            description: Some("Winter, and the envoy Genly Ai.".to_string()),
        }
    }

    fn field_errors(err: CatalogError) -> Vec<(&'static str, String)> {
        match err {
            CatalogError::Validation(fields) => {
                fields.into_iter().map(|f| (f.field, f.error)).collect()
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_book_is_trimmed() {
        let book = new_book(9.99).validate().unwrap();
        assert_eq!(book.title(), "The Left Hand of Darkness");
        assert_eq!(book.price(), 9.99);
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let errors = field_errors(new_book(-5.0).validate().unwrap_err());
        assert_eq!(errors, vec![("price", "must be positive".to_string())]);
        assert!(new_book(0.0).validate().is_err());
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let errors = field_errors(NewBook::default().validate().unwrap_err());
        let fields: Vec<_> = errors.iter().map(|(field, _)| *field).collect();
        assert_eq!(fields, vec!["title", "author", "price", "description"]);
    }

    #[test]
    fn long_title_is_rejected() {
        let mut book = new_book(5.0);
        book.title = Some("x".repeat(TITLE_MAX_CHARS + 1));
        let errors = field_errors(book.validate().unwrap_err());
        assert_eq!(errors[0].0, "title");

        let mut book = new_book(5.0);
        book.title = Some("é".repeat(TITLE_MAX_CHARS));
        assert!(book.validate().is_ok());
    }

    #[test]
    fn form_text_price_is_accepted() {
        let payload = serde_json::json!({
            "title": "Kindred",
            "author": "Octavia E. Butler",
            "price": "12.50",
            "description": "Dana is pulled back in time."
        });
        let book = NewBook::from_body(payload).unwrap();
        assert_eq!(book.validate().unwrap().price(), 12.5);

        let mut bad = new_book(1.0);
        bad.price = Some(PriceInput::Text("cheap".into()));
        let errors = field_errors(bad.validate().unwrap_err());
        assert_eq!(errors, vec![("price", "must be a number".to_string())]);
    }

    #[test]
    fn wrongly_typed_fields_are_field_errors() {
        let payload = serde_json::json!({
            "title": 123,
            "author": "Octavia E. Butler",
            "price": true,
            "description": null
        });
        let errors = field_errors(NewBook::from_body(payload).unwrap_err());
        assert_eq!(
            errors,
            vec![
                ("title", "must be a string".to_string()),
                ("price", "must be a number".to_string()),
            ]
        );

        let changes = BookChanges::from_body(serde_json::json!({ "author": ["x"] }));
        assert_eq!(
            field_errors(changes.unwrap_err()),
            vec![("author", "must be a string".to_string())]
        );

        let not_an_object = NewBook::from_body(serde_json::json!([1, 2]));
        assert_eq!(
            field_errors(not_an_object.unwrap_err()),
            vec![("body", "must be a JSON object".to_string())]
        );
    }

    #[test]
    fn changes_validate_only_supplied_fields() {
        let changes = BookChanges {
            price: Some(15.0_f64.into()),
            ..BookChanges::default()
        }
        .validate()
        .unwrap();
        assert!(!changes.is_empty());

        let bad = BookChanges {
            author: Some("   ".into()),
            ..BookChanges::default()
        };
        assert_eq!(
            field_errors(bad.validate().unwrap_err()),
            vec![("author", "required".to_string())]
        );
    }

    #[test]
    fn book_round_trips_through_its_document() {
        let now = timestamp::parse("2024-05-01T12:30:00.123456Z").unwrap();
        let mut doc = new_book(20.0).validate().unwrap().into_document(now);
        doc.insert("id".into(), Value::String("b1".into()));
        let book = Book::from_document(doc).unwrap();
        assert_eq!(book.id, "b1");
        assert_eq!(book.created_at, now);
        assert_eq!(
            serde_json::to_value(&book).unwrap()["createdAt"],
            "2024-05-01T12:30:00.123456Z"
        );
    }

    #[test]
    fn fields_parse_by_key() {
        assert_eq!(BookField::parse("createdAt"), Some(BookField::CreatedAt));
        assert_eq!(BookField::parse("created_at"), Some(BookField::CreatedAt));
        assert_eq!(BookField::parse("isbn"), None);
        assert!(!BookField::Description.is_sortable());
    }

    #[test]
    fn cursor_values_are_normalized() {
        assert_eq!(
            BookField::CreatedAt
                .parse_value("2024-05-01T14:30:00+02:00")
                .unwrap(),
            Value::String("2024-05-01T12:30:00.000000Z".into())
        );
        assert_eq!(BookField::Price.parse_value("7.5").unwrap(), serde_json::json!(7.5));
        assert!(BookField::Price.parse_value("seven").is_err());
        assert!(BookField::CreatedAt.parse_value("yesterday").is_err());
    }
}
