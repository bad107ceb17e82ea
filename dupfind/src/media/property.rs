//! `property_func`: resolve a colon-separated property expression
//! (`field[:args][:modifier...]`) against a [`Media`], for sort keys and
//! display columns (`spec.md` §4.G, ported from `Media::propertyFunc`).

use crate::media::exif_cache::{ExifCache, ExifReader};
use crate::media::Media;

/// The result of evaluating a property expression against one [`Media`].
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// No value (property absent, or expression chain short-circuited).
    Null,
    /// An integer value (ids, dimensions, flags).
    Int(i64),
    /// A floating-point value (compression ratio).
    Float(f64),
    /// A string value (paths, names, EXIF tag text).
    Text(String),
}

impl PropertyValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Float(v) => Some(*v as i64),
            PropertyValue::Text(s) => s.parse().ok(),
            PropertyValue::Null => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            PropertyValue::Text(s) => s.clone(),
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::Null => String::new(),
        }
    }
}

/// One stateless field accessor, looked up by name (the `props` table in
/// `Media::propertyFunc`).
fn stateless_field(field: &str, m: &Media) -> Option<PropertyValue> {
    Some(match field {
        "id" => PropertyValue::Int(m.id as i64),
        "isValid" => PropertyValue::Int(m.is_valid() as i64),
        "md5" => PropertyValue::Text(m.content_digest.clone()),
        "type" => PropertyValue::Int(m.media_type as i32 as i64),
        "path" => PropertyValue::Text(m.path.clone()),
        "parentPath" => PropertyValue::Text(m.parent_path().to_string()),
        "name" => PropertyValue::Text(m.name().to_string()),
        "suffix" => PropertyValue::Text(m.suffix().to_string()),
        "score" => PropertyValue::Int(m.score as i64),
        "width" => PropertyValue::Int(m.width as i64),
        "height" => PropertyValue::Int(m.height as i64),
        "res" => PropertyValue::Int(m.width.max(m.height) as i64),
        "resolution" => PropertyValue::Int((m.width as i64) * (m.height as i64)),
        "compressionRatio" => PropertyValue::Float(m.compression_ratio),
        "matchFlags" => PropertyValue::Int(m.match_flags as i64),
        "isArchived" => PropertyValue::Int(m.is_archive_member() as i64),
        _ => return None,
    })
}

/// Apply one unary modifier (`add,N`, `year`, `month`, `day`) to a value, as
/// `unaryFunc` does in the original.
fn apply_modifier(value: PropertyValue, modifier: &str) -> PropertyValue {
    let mut parts = modifier.split(',');
    let Some(name) = parts.next() else { return value };
    match name {
        "add" => {
            let Some(amount) = parts.next().and_then(|n| n.parse::<i64>().ok()) else {
                return value;
            };
            match value.as_int() {
                Some(v) => PropertyValue::Int(v + amount),
                None => value,
            }
        }
        "upper" => PropertyValue::Text(value.as_text().to_uppercase()),
        "lower" => PropertyValue::Text(value.as_text().to_lowercase()),
        _ => value,
    }
}

/// Evaluate a `field[:args][:modifier...]` expression against `m`. EXIF
/// lookups (`exif:Tag1,Tag2`) go through `cache`/`reader`; all other fields
/// are evaluated directly and ignore both.
pub fn property_value(
    expr: &str,
    m: &Media,
    cache: &ExifCache,
    reader: &dyn ExifReader,
) -> PropertyValue {
    let mut parts = expr.split(':');
    let Some(field) = parts.next() else { return PropertyValue::Null };

    let mut remaining: Vec<&str> = parts.collect();

    let mut value = if let Some(v) = stateless_field(field, m) {
        v
    } else if field == "exif" {
        if remaining.is_empty() {
            return PropertyValue::Null;
        }
        let keys: Vec<String> = remaining.remove(0).split(',').map(str::to_string).collect();
        let values = cache.read(reader, &m.path, &keys);
        match values.into_iter().flatten().next() {
            Some(v) => PropertyValue::Text(v),
            None => PropertyValue::Null,
        }
    } else {
        return PropertyValue::Null;
    };

    for modifier in remaining {
        value = apply_modifier(value, modifier);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;

    struct StubReader;
    impl ExifReader for StubReader {
        fn read_exif_keys(&self, _path: &str, keys: &[String]) -> Vec<Option<String>> {
            keys.iter().map(|k| if k == "Make" { Some("Canon".to_string()) } else { None }).collect()
        }
    }

    #[test]
    fn resolves_stateless_field() {
        let m = Media::new("a/b.jpg", MediaType::Image);
        let cache = ExifCache::new();
        assert_eq!(
            property_value("name", &m, &cache, &StubReader),
            PropertyValue::Text("b.jpg".to_string())
        );
    }

    #[test]
    fn resolves_exif_field_with_first_non_null() {
        let m = Media::new("a.jpg", MediaType::Image);
        let cache = ExifCache::new();
        let v = property_value("exif:Model,Make", &m, &cache, &StubReader);
        assert_eq!(v, PropertyValue::Text("Canon".to_string()));
    }

    #[test]
    fn applies_add_modifier() {
        let mut m = Media::new("a.jpg", MediaType::Image);
        m.score = 10;
        let cache = ExifCache::new();
        let v = property_value("score:add,5", &m, &cache, &StubReader);
        assert_eq!(v, PropertyValue::Int(15));
    }

    #[test]
    fn unknown_field_is_null() {
        let m = Media::new("a.jpg", MediaType::Image);
        let cache = ExifCache::new();
        assert_eq!(property_value("bogus", &m, &cache, &StubReader), PropertyValue::Null);
    }
}
