//! Mapping between records and hash field maps.
//!
//! Records stored with [`RemoteCache::set_field_map`](crate::remote::RemoteCache::set_field_map)
//! describe their own flattening through [`FieldMap`]. No reflection is
//! involved: the record lists its fields and parses them back.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

/// A record that can be stored as a hash of stringified fields.
///
/// # Example
///
/// ```
/// use open_cache::fields::{self, FieldMap};
/// use open_cache::error::Result;
/// use std::collections::HashMap;
///
/// struct Account {
///     id: u64,
///     email: Option<String>,
/// }
///
/// impl FieldMap for Account {
///     fn to_fields(&self) -> Vec<(&'static str, Option<String>)> {
///         vec![
///             ("id", Some(self.id.to_string())),
///             ("email", self.email.clone()),
///         ]
///     }
///
///     fn from_fields(map: &HashMap<String, String>) -> Result<Self> {
///         Ok(Account {
///             id: fields::required(map, "id")?,
///             email: fields::optional(map, "email")?,
///         })
///     }
/// }
/// ```
pub trait FieldMap: Sized {
    /// Field name and stringified value; `None` fields are not stored.
    fn to_fields(&self) -> Vec<(&'static str, Option<String>)>;

    /// Rebuild the record from the stored fields.
    ///
    /// # Errors
    /// Returns `Error::FieldMapping` if a field is missing or malformed
    fn from_fields(map: &HashMap<String, String>) -> Result<Self>;
}

/// Present fields of `record`, ready to be written.
pub fn flatten<R: FieldMap>(record: &R) -> Vec<(String, String)> {
    record
        .to_fields()
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
        .collect()
}

/// Parse a field that must be present.
///
/// # Errors
/// Returns `Error::FieldMapping` if the field is absent or does not parse
pub fn required<T>(map: &HashMap<String, String>, field: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = map.get(field).ok_or_else(|| Error::FieldMapping {
        field: field.to_string(),
        reason: "missing".to_string(),
    })?;
    parse(field, raw)
}

/// Parse a field that may be absent.
///
/// # Errors
/// Returns `Error::FieldMapping` if the field is present but does not parse
pub fn optional<T>(map: &HashMap<String, String>, field: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    map.get(field).map(|raw| parse(field, raw)).transpose()
}

fn parse<T>(field: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| Error::FieldMapping {
        field: field.to_string(),
        reason: format!("cannot parse {:?}: {}", raw, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Profile {
        id: u64,
        nickname: Option<String>,
        score: f64,
    }

    impl FieldMap for Profile {
        fn to_fields(&self) -> Vec<(&'static str, Option<String>)> {
            vec![
                ("id", Some(self.id.to_string())),
                ("nickname", self.nickname.clone()),
                ("score", Some(self.score.to_string())),
            ]
        }

        fn from_fields(map: &HashMap<String, String>) -> Result<Self> {
            Ok(Profile {
                id: required(map, "id")?,
                nickname: optional(map, "nickname")?,
                score: required(map, "score")?,
            })
        }
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_flatten_skips_absent_fields() {
        let profile = Profile {
            id: 7,
            nickname: None,
            score: 1.5,
        };

        let fields = flatten(&profile);
        assert_eq!(
            fields,
            vec![
                ("id".to_string(), "7".to_string()),
                ("score".to_string(), "1.5".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_fields_rebuilds_record() {
        let profile =
            Profile::from_fields(&map(&[("id", "7"), ("nickname", "neo"), ("score", "2")]))
                .unwrap();
        assert_eq!(
            profile,
            Profile {
                id: 7,
                nickname: Some("neo".to_string()),
                score: 2.0,
            }
        );
    }

    #[test]
    fn test_missing_required_field() {
        let err = Profile::from_fields(&map(&[("id", "7")])).unwrap_err();
        assert!(matches!(err, Error::FieldMapping { ref field, .. } if field == "score"));
    }

    #[test]
    fn test_malformed_field() {
        let err = Profile::from_fields(&map(&[("id", "seven"), ("score", "1")])).unwrap_err();
        match err {
            Error::FieldMapping { field, reason } => {
                assert_eq!(field, "id");
                assert!(reason.contains("seven"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
