use serde_yaml::{Mapping, Value};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::media::AssetReference;
use crate::normalize::{canonical_asset_id, canonical_author_slug, AssetKind};
use crate::tags::remap_tag_list;

/// Jekyll-only keys that have no meaning on the new site
const OBSOLETE_POST_KEYS: &[&str] = &["layout", "category", "wordpress_id", "slug"];
const OBSOLETE_AUTHOR_KEYS: &[&str] = &["username"];

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("frontmatter is not valid YAML")]
    Yaml(#[from] serde_yaml::Error),
    #[error("frontmatter must be a mapping of keys to values")]
    NotAMapping,
    #[error("unrecognised date {0:?}")]
    InvalidDate(String),
}

/// The migrated frontmatter of one document and the assets it refers to
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub frontmatter: Mapping,
    pub assets: Vec<AssetReference>,
}

pub fn parse_frontmatter(raw: &str) -> Result<Mapping, FrontmatterError> {
    match serde_yaml::from_str::<Value>(raw)? {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(FrontmatterError::NotAMapping),
    }
}

/// serialize_frontmatter renders a mapping as a complete `---` delimited block
pub fn serialize_frontmatter(frontmatter: &Mapping) -> Result<String, FrontmatterError> {
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("---\n{yaml}---"))
}

/// rewrite_post migrates the frontmatter of a blog post
///
/// Keys the new site does not know about are carried over untouched and in place. `author`,
/// `image` and `tags` are recomputed, `related` is reset, and `date` becomes a UTC instant.
pub fn rewrite_post(data: Mapping) -> Result<Rewritten, FrontmatterError> {
    let image = str_field(&data, "image").map(str::to_string);
    let author = str_field(&data, "author").map(canonical_author_slug);
    let tags = remap_tag_list(legacy_tags(&data));
    let date = match data.get("date") {
        Some(Value::Null) | None => None,
        Some(value) => Some(normalize_date(value)?),
    };

    let mut frontmatter = without_keys(data, OBSOLETE_POST_KEYS);
    set_or_remove(&mut frontmatter, "author", author.map(Value::from));
    set_or_remove(
        &mut frontmatter,
        "image",
        canonical_asset_id(image.as_deref(), AssetKind::Blog).map(Value::from),
    );
    frontmatter.insert(
        "tags".into(),
        Value::Sequence(tags.into_iter().map(Value::from).collect()),
    );
    frontmatter.insert("related".into(), Value::Sequence(Vec::new()));
    if let Some(date) = date {
        frontmatter.insert("date".into(), Value::from(date));
    }

    let assets = image
        .as_deref()
        .and_then(|path| AssetReference::new(path, AssetKind::Blog))
        .into_iter()
        .collect();
    Ok(Rewritten { frontmatter, assets })
}

/// rewrite_author migrates the frontmatter of an author record
///
/// Several legacy records repeat the first name as the last name, those get an empty last name.
pub fn rewrite_author(data: Mapping) -> Rewritten {
    let image = str_field(&data, "image").map(str::to_string);
    let last_name = if data.get("last_name") == data.get("first_name") {
        Some(Value::from(""))
    } else {
        data.get("last_name").cloned()
    };

    let mut frontmatter = without_keys(data, OBSOLETE_AUTHOR_KEYS);
    set_or_remove(
        &mut frontmatter,
        "image",
        canonical_asset_id(image.as_deref(), AssetKind::Author).map(Value::from),
    );
    set_or_remove(&mut frontmatter, "last_name", last_name);

    let assets = image
        .as_deref()
        .and_then(|path| AssetReference::new(path, AssetKind::Author))
        .into_iter()
        .collect();
    Rewritten { frontmatter, assets }
}

fn str_field<'a>(data: &'a Mapping, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Jekyll accepts both a list and a single string for `tags`
fn legacy_tags(data: &Mapping) -> Vec<&str> {
    match data.get("tags") {
        Some(Value::Sequence(labels)) => labels.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(label)) => vec![label.as_str()],
        _ => Vec::new(),
    }
}

fn without_keys(data: Mapping, keys: &[&str]) -> Mapping {
    data.into_iter()
        .filter(|(key, _)| !key.as_str().is_some_and(|key| keys.contains(&key)))
        .collect()
}

fn set_or_remove(data: &mut Mapping, key: &str, value: Option<Value>) {
    match value {
        // Existing keys keep their position
        Some(value) => {
            data.insert(key.into(), value);
        }
        None => *data = without_keys(std::mem::take(data), &[key]),
    }
}

/// normalize_date reparses a legacy date and renders it as `YYYY-MM-DDTHH:MM:SS.sssZ`
///
/// Dates without an offset are taken as UTC so repeated runs agree regardless of the host's zone.
pub fn normalize_date(value: &Value) -> Result<String, FrontmatterError> {
    let raw = match value {
        Value::String(raw) => raw.trim(),
        other => {
            return Err(FrontmatterError::InvalidDate(
                serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
            ))
        }
    };
    let instant = parse_legacy_date(raw)
        .ok_or_else(|| FrontmatterError::InvalidDate(raw.to_string()))?
        .to_offset(UtcOffset::UTC);
    let iso = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    instant
        .format(&iso)
        .map_err(|_| FrontmatterError::InvalidDate(raw.to_string()))
}

fn parse_legacy_date(raw: &str) -> Option<OffsetDateTime> {
    let with_offset = OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| {
            OffsetDateTime::parse(
                raw,
                format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
                ),
            )
        })
        .or_else(|_| {
            OffsetDateTime::parse(
                raw,
                format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
                ),
            )
        })
        .or_else(|_| {
            OffsetDateTime::parse(
                raw,
                format_description!(
                    "[year]-[month]-[day] [hour]:[minute] [offset_hour sign:mandatory][offset_minute]"
                ),
            )
        });
    if let Ok(instant) = with_offset {
        return Some(instant);
    }

    let naive = PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day] [hour]:[minute]"))
    })
    .or_else(|_| {
        Date::parse(raw, format_description!("[year]-[month]-[day]")).map(Date::midnight)
    });
    naive.ok().map(PrimitiveDateTime::assume_utc)
}
