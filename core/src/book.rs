use serde::{Deserialize, Deserializer, Serialize};

use crate::normalize::clean_text;

pub type BookId = i64;

pub const UNKNOWN: &str = "Unknown";
pub const PLACEHOLDER_COVER: &str = "placeholder.svg";
pub const NO_LINK: &str = "#";

/// One catalog row in canonical form. Every field is populated; missing
/// source values have already been replaced by their sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub language: String,
    pub average_rating: f64,
    pub rater_count: u64,
    pub cover_image_path: String,
    pub link: String,
}

impl BookRecord {
    /// Re-applies the sentinels to a record that may have been written
    /// with blank text or a non-finite rating.
    pub fn sanitized(mut self) -> Self {
        fill_blank(&mut self.title, UNKNOWN);
        fill_blank(&mut self.author, UNKNOWN);
        fill_blank(&mut self.genre, UNKNOWN);
        fill_blank(&mut self.language, UNKNOWN);
        fill_blank(&mut self.cover_image_path, PLACEHOLDER_COVER);
        fill_blank(&mut self.link, NO_LINK);
        if !self.average_rating.is_finite() {
            self.average_rating = 0.0;
        }
        self
    }
}

fn fill_blank(field: &mut String, fallback: &str) {
    if field.trim().is_empty() {
        *field = fallback.to_string();
    }
}

/// The value a field will have once sentinels are applied.
pub(crate) fn or_sentinel<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// A catalog row as it arrives from an external source. Accepts the canonical
/// names plus the column names used by the source dataframes, including their
/// misspellings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBook {
    #[serde(default, alias = "BOOK_ID", alias = "book_id", deserialize_with = "lenient_i64")]
    pub id: Option<BookId>,
    #[serde(default, alias = "BOOK_TITLE", alias = "book_title")]
    pub title: Option<String>,
    #[serde(default, alias = "BOOK_AUTHOR", alias = "BOOK_AURTHOR", alias = "book_author")]
    pub author: Option<String>,
    #[serde(default, alias = "GENRE", alias = "GENERE")]
    pub genre: Option<String>,
    #[serde(default, alias = "LANGUAGE")]
    pub language: Option<String>,
    #[serde(default, alias = "A_RATINGS", alias = "average_rating", deserialize_with = "lenient_f64")]
    pub average_rating: Option<f64>,
    #[serde(default, alias = "RATERS", alias = "rater_count", deserialize_with = "lenient_u64")]
    pub rater_count: Option<u64>,
    #[serde(default, alias = "F_PAGE", alias = "cover_image_path")]
    pub cover_image_path: Option<String>,
    #[serde(default, alias = "LINK")]
    pub link: Option<String>,
}

impl From<RawBook> for BookRecord {
    fn from(raw: RawBook) -> Self {
        BookRecord {
            id: raw.id.unwrap_or(0),
            title: text_or(raw.title, UNKNOWN),
            author: text_or(raw.author, UNKNOWN),
            genre: text_or(raw.genre, UNKNOWN),
            language: text_or(raw.language, UNKNOWN),
            average_rating: raw.average_rating.filter(|r| r.is_finite()).unwrap_or(0.0),
            rater_count: raw.rater_count.unwrap_or(0),
            cover_image_path: text_or(raw.cover_image_path, PLACEHOLDER_COVER),
            link: text_or(raw.link, NO_LINK),
        }
    }
}

fn text_or(value: Option<String>, fallback: &str) -> String {
    value
        .map(|v| clean_text(&v))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

// Exported dataframes carry numbers as floats, strings or nulls depending on
// how the column was typed. Anything unparseable counts as missing.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?.filter(|v| v.is_finite()))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?
        .and_then(|v| whole_in_range(v, i64::MIN as f64, i64::MAX as f64, "id"))
        .map(|v| v as i64))
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?
        .and_then(|v| whole_in_range(v, 0.0, u64::MAX as f64, "rater count"))
        .map(|v| v as u64))
}

// Counts and ids must be whole numbers that fit the target type. `max` is
// exclusive: `i64::MAX as f64` and `u64::MAX as f64` round up past the type.
fn whole_in_range(value: f64, min: f64, max: f64, field: &str) -> Option<f64> {
    if value.is_finite() && value.fract() == 0.0 && value >= min && value < max {
        Some(value)
    } else {
        tracing::debug!(field, value, "dropping unusable numeric value");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_column_names_are_mapped() {
        let raw: RawBook = serde_json::from_str(
            r#"{"BOOK_ID": 7, "BOOK_TITLE": "Dune", "BOOK_AURTHOR": "Frank Herbert",
                "GENERE": "Science Fiction", "A_RATINGS": 4.3, "RATERS": 1200,
                "F_PAGE": "covers/dune.jpg", "LINK": "https://example.org/dune"}"#,
        )
        .unwrap();
        let book = BookRecord::from(raw);
        assert_eq!(book.id, 7);
        assert_eq!(book.title, "Dune");
        assert_eq!(book.author, "Frank Herbert");
        assert_eq!(book.genre, "Science Fiction");
        assert_eq!(book.rater_count, 1200);
        assert_eq!(book.cover_image_path, "covers/dune.jpg");
        assert_eq!(book.language, UNKNOWN);
    }

    #[test]
    fn missing_and_null_fields_get_sentinels() {
        let raw: RawBook =
            serde_json::from_str(r#"{"title": "  ", "averageRating": null, "raterCount": "n/a"}"#).unwrap();
        let book = BookRecord::from(raw);
        assert_eq!(book.id, 0);
        assert_eq!(book.title, UNKNOWN);
        assert_eq!(book.author, UNKNOWN);
        assert_eq!(book.average_rating, 0.0);
        assert_eq!(book.rater_count, 0);
        assert_eq!(book.cover_image_path, PLACEHOLDER_COVER);
        assert_eq!(book.link, NO_LINK);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let raw: RawBook =
            serde_json::from_str(r#"{"book_id": "12", "A_RATINGS": "3.5", "RATERS": 40.0}"#).unwrap();
        let book = BookRecord::from(raw);
        assert_eq!(book.id, 12);
        assert_eq!(book.average_rating, 3.5);
        assert_eq!(book.rater_count, 40);
    }

    #[test]
    fn fractional_or_negative_counts_count_as_missing() {
        let raw: RawBook = serde_json::from_str(r#"{"BOOK_ID": 2.5, "RATERS": 3.7}"#).unwrap();
        let book = BookRecord::from(raw);
        assert_eq!(book.id, 0);
        assert_eq!(book.rater_count, 0);

        let raw: RawBook = serde_json::from_str(r#"{"BOOK_ID": 1e300, "RATERS": -4}"#).unwrap();
        let book = BookRecord::from(raw);
        assert_eq!(book.id, 0);
        assert_eq!(book.rater_count, 0);
    }

    #[test]
    fn sanitized_repairs_blank_fields() {
        let book = BookRecord {
            id: 1,
            title: "T".into(),
            author: "".into(),
            genre: "g".into(),
            language: " ".into(),
            average_rating: f64::NAN,
            rater_count: 3,
            cover_image_path: "".into(),
            link: "".into(),
        }
        .sanitized();
        assert_eq!(book.author, UNKNOWN);
        assert_eq!(book.language, UNKNOWN);
        assert_eq!(book.average_rating, 0.0);
        assert_eq!(book.cover_image_path, PLACEHOLDER_COVER);
        assert_eq!(book.link, NO_LINK);
    }
}
