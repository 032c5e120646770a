use std::fmt;

/// Every canonical asset id lives under this namespace on the media host
const ASSET_NAMESPACE: &str = "linaro-website/images";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum AssetKind {
    Blog,
    Author,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blog => "blog",
            Self::Author => "author",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// canonical_asset_id maps a legacy image path onto the id it is stored under on the media host
///
/// Example:
///     "/assets/images/blog/Pic.Name.PNG?v=2", Blog
///     "linaro-website/images/blog/Pic.Name"
///
/// Only the basename survives, so two legacy paths sharing a basename collapse onto the same id.
pub fn canonical_asset_id(legacy_path: Option<&str>, kind: AssetKind) -> Option<String> {
    let legacy_path = legacy_path.filter(|p| !p.is_empty())?;
    let basename = legacy_path.rsplit('/').next().unwrap_or(legacy_path);
    // Drop the last extension only: "a.tar.gz" keeps "a.tar". The query goes after, so a dotted
    // query ("c.png?v=1.2") takes the extension's place and "c.png" stays.
    let stem = match basename.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => basename,
    };
    let stem = stem.split('?').next().unwrap_or(stem);
    Some(format!("{ASSET_NAMESPACE}/{kind}/{stem}"))
}

/// canonical_author_slug turns an author identity (email, username or display name) into the slug
/// author records are keyed by on the new site
///
/// Only the FIRST `.`, `_` and space are replaced. Slugs already published on the new site were
/// produced this way, so "a.b.c" must stay "a-b.c".
pub fn canonical_author_slug(identity: &str) -> String {
    let local = identity.split('@').next().unwrap_or_default();
    local
        .to_lowercase()
        .trim()
        .replacen('.', "-", 1)
        .replacen('_', "-", 1)
        .replacen(' ', "-", 1)
}
