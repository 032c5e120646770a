use anyhow::Context;
use markdown::mdast::{Image, Link, Node, Paragraph, Text};
use markdown::unist::{Point, Position};

use crate::content::{ContentTree, Walk};
use crate::media::AssetReference;
use crate::normalize::AssetKind;
use crate::template::{parse_image_include, IMAGE_INCLUDE_MARKER};

const WEB_SCHEMES: &[&str] = &["https://", "http://"];
const MAILTO: &str = "mailto:";

/// rewrite_inline applies the body rules to a blog post, in order:
///
/// 1. external and `mailto:` links become their bare target as text
/// 2. images point at their canonical id on the media host
/// 3. `{% include image.html %}` embeds become images
///
/// Each rule walks the whole tree again and sees what the previous ones produced. The returned
/// assets still have to be migrated.
pub fn rewrite_inline(tree: &mut ContentTree) -> anyhow::Result<Vec<AssetReference>> {
    tree.replace_where(Walk::All, is_link, |node, _| Ok(link_replacement(node)))?;

    let mut assets = Vec::new();
    tree.replace_where(Walk::All, is_image, |node, _| {
        Ok(image_replacement(node).map(|(image, asset)| {
            assets.push(asset);
            image
        }))
    })?;
    tree.replace_where(Walk::All, is_paragraph, |node, source| {
        let replacement = embed_replacement(node, source)?;
        Ok(replacement.map(|(paragraph, asset)| {
            assets.push(asset);
            paragraph
        }))
    })?;
    Ok(assets)
}

fn is_link(node: &Node) -> bool {
    matches!(node, Node::Link(_))
}

fn is_image(node: &Node) -> bool {
    matches!(node, Node::Image(_))
}

fn is_paragraph(node: &Node) -> bool {
    matches!(node, Node::Paragraph(_))
}

/// Web links are shown as bare text without their scheme, mail links as the bare address
fn link_replacement(node: &Node) -> Option<Node> {
    let Node::Link(Link { url, position, .. }) = node else {
        return None;
    };
    let value = WEB_SCHEMES
        .iter()
        .chain(std::iter::once(&MAILTO))
        .find_map(|prefix| url.strip_prefix(*prefix))?;
    Some(Node::Text(Text {
        value: value.to_string(),
        position: position.clone(),
    }))
}

fn image_replacement(node: &Node) -> Option<(Node, AssetReference)> {
    let Node::Image(image) = node else {
        return None;
    };
    let asset = AssetReference::new(&image.url, AssetKind::Blog)?;
    let replacement = Node::Image(Image {
        url: format!("/{}", asset.canonical_id),
        ..image.clone()
    });
    Some((replacement, asset))
}

/// The embed's text node becomes an image. Text that followed the tag inside the same node and
/// the paragraph's other children are kept.
fn embed_replacement(node: &Node, source: &str) -> anyhow::Result<Option<(Node, AssetReference)>> {
    let Node::Paragraph(paragraph) = node else {
        return Ok(None);
    };
    let Some(Node::Text(first)) = paragraph.children.first() else {
        return Ok(None);
    };
    if !first.value.starts_with(IMAGE_INCLUDE_MARKER) {
        return Ok(None);
    }

    let include = parse_image_include(&first.value)
        .with_context(|| format!("Invalid image embed: {}", first.value))?;
    let asset = AssetReference::new(&include.path, AssetKind::Blog)
        .with_context(|| format!("Image embed has an empty path: {}", first.value))?;

    let mut children = vec![Node::Image(Image {
        alt: include.alt,
        url: format!("/{}", asset.canonical_id),
        title: None,
        position: first.position.clone(),
    })];
    let trailing = &first.value[include.len..];
    if !trailing.is_empty() {
        children.push(Node::Text(Text {
            value: trailing.to_string(),
            position: trailing_position(first.position.as_ref(), source),
        }));
    }
    children.extend(paragraph.children.iter().skip(1).cloned());

    let replacement = Node::Paragraph(Paragraph {
        children,
        position: paragraph.position.clone(),
    });
    Ok(Some((replacement, asset)))
}

/// The source span of whatever follows the closing `%}` of the tag in a text node. Escapes and
/// character references after the tag keep their source form through it.
fn trailing_position(text: Option<&Position>, source: &str) -> Option<Position> {
    let text = text?;
    let raw = source.get(text.start.offset..text.end.offset)?;
    let tag_end = raw.find("%}")? + 2;
    let tag = &raw[..tag_end];

    let line = text.start.line + tag.matches('\n').count();
    let column = match tag.rfind('\n') {
        Some(newline) => tag[newline + 1..].chars().count() + 1,
        None => text.start.column + tag.chars().count(),
    };
    Some(Position {
        start: Point {
            line,
            column,
            offset: text.start.offset + tag_end,
        },
        end: text.end.clone(),
    })
}
