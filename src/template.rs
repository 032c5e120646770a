//! A minimal parser for the legacy site's template tags.
//!
//! Only what image embeds need is supported: `{% <name> <raw args...> %}` where the arguments are
//! kept as raw whitespace separated strings.

use thiserror::Error;

const TAG_OPEN: &str = "{%";
const TAG_CLOSE: &str = "%}";

/// The marker that identifies a paragraph holding a legacy image embed
pub const IMAGE_INCLUDE_MARKER: &str = "{% include image.html";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("text does not start with a template tag: {0:?}")]
    NotATag(String),
    #[error("template tag is never closed: {0:?}")]
    Unclosed(String),
    #[error("template tag has no name")]
    MissingName,
    #[error("image include has no path argument: {0:?}")]
    MissingPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateTag {
    pub name: String,
    /// Raw arguments, `args[0]` is the first word after the tag name
    pub args: Vec<String>,
    /// Byte length of the tag in the parsed text, delimiters included
    pub len: usize,
}

/// parse_tag reads the template tag at the start of `text`
///
/// Anything following the closing `%}` is not part of the tag and is left to the caller.
pub fn parse_tag(text: &str) -> Result<TemplateTag, TemplateError> {
    let trimmed = text.trim_start();
    let leading = text.len() - trimmed.len();
    let inner = trimmed
        .strip_prefix(TAG_OPEN)
        .ok_or_else(|| TemplateError::NotATag(text.to_string()))?;
    let close = inner
        .find(TAG_CLOSE)
        .ok_or_else(|| TemplateError::Unclosed(text.to_string()))?;

    let mut words = inner[..close]
        .trim_start_matches('-')
        .trim_end_matches('-')
        .split_whitespace();
    let name = words.next().ok_or(TemplateError::MissingName)?.to_string();
    let args = words.map(str::to_string).collect();

    Ok(TemplateTag {
        name,
        args,
        len: leading + TAG_OPEN.len() + close + TAG_CLOSE.len(),
    })
}

/// The path and alt text carried by `{% include image.html path="..." alt="..." %}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInclude {
    pub path: String,
    pub alt: String,
    pub len: usize,
}

/// parse_image_include extracts the image path and alt text from a legacy image embed
///
/// The first argument after the included file name is the path. Everything after it is the alt
/// text, the words are rejoined since alt text usually contains spaces.
pub fn parse_image_include(text: &str) -> Result<ImageInclude, TemplateError> {
    let tag = parse_tag(text)?;
    let path = tag
        .args
        .get(1)
        .map(|arg| strip_quotes(arg.strip_prefix("path=").unwrap_or(arg)))
        .filter(|path| !path.is_empty())
        .ok_or_else(|| TemplateError::MissingPath(text.to_string()))?;

    let rest = tag.args.get(2..).unwrap_or_default().join(" ");
    let alt = strip_quotes(rest.strip_prefix("alt=").unwrap_or(&rest));

    Ok(ImageInclude {
        path,
        alt,
        len: tag.len,
    })
}

fn strip_quotes(value: &str) -> String {
    value.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_raw_args() {
        let tag = parse_tag(r#"{% include image.html path="x/y.jpg" alt="A cat" %}"#).unwrap();
        assert_eq!(tag.name, "include");
        assert_eq!(
            tag.args,
            vec!["image.html", r#"path="x/y.jpg""#, r#"alt="A"#, r#"cat""#]
        );
    }

    #[test]
    fn tag_length_stops_at_close() {
        let text = "{% include image.html path=\"a.png\" %}\ntrailing text";
        let tag = parse_tag(text).unwrap();
        assert_eq!(&text[tag.len..], "\ntrailing text");
    }

    #[test]
    fn whitespace_control_dashes_are_ignored() {
        let tag = parse_tag("{%- include image.html path=a.png -%}").unwrap();
        assert_eq!(tag.name, "include");
        assert_eq!(tag.args, vec!["image.html", "path=a.png"]);
    }

    #[test]
    fn image_include_extracts_path_and_alt() {
        let include =
            parse_image_include(r#"{% include image.html path="x/y.jpg" alt="A cat" %}"#).unwrap();
        assert_eq!(include.path, "x/y.jpg");
        assert_eq!(include.alt, "A cat");
    }

    #[test]
    fn image_include_without_alt_has_empty_alt() {
        let include = parse_image_include(r#"{% include image.html path="/a/b.png" %}"#).unwrap();
        assert_eq!(include.path, "/a/b.png");
        assert_eq!(include.alt, "");
    }

    #[test]
    fn malformed_tags_are_errors() {
        assert!(matches!(
            parse_tag("{% include image.html path=\"a.png\""),
            Err(TemplateError::Unclosed(_))
        ));
        assert!(matches!(parse_tag("plain text"), Err(TemplateError::NotATag(_))));
        assert_eq!(parse_tag("{% %}"), Err(TemplateError::MissingName));
        assert!(matches!(
            parse_image_include("{% include image.html %}"),
            Err(TemplateError::MissingPath(_))
        ));
    }
}
