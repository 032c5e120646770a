//! The parsed body of a legacy document.
//!
//! Documents are parsed into an mdast tree and rewritten node by node. Serializing does not
//! re-render the whole tree: each replaced node becomes an edit over the span of the source it was
//! parsed from, and everything that was never touched is copied through byte for byte. That keeps
//! the output of a re-run identical and avoids reformatting content nobody asked to migrate.

use anyhow::{anyhow, bail};
use markdown::mdast::{Image, Node, Text, Yaml};
use markdown::unist::Position;
use markdown::{Constructs, ParseOptions};
use tracing::warn;

/// Legacy documents are GFM with YAML frontmatter. Bare URLs stay text, only written links are
/// links.
fn legacy_options() -> ParseOptions {
    ParseOptions {
        constructs: Constructs {
            frontmatter: true,
            gfm_autolink_literal: false,
            ..Constructs::gfm()
        },
        ..ParseOptions::gfm()
    }
}

fn mdx_options() -> ParseOptions {
    ParseOptions {
        constructs: Constructs {
            frontmatter: true,
            ..Constructs::mdx()
        },
        ..ParseOptions::mdx()
    }
}

/// check_mdx reports why `document` would not compile as MDX, if it would not
pub fn check_mdx(document: &str) -> Result<(), String> {
    markdown::to_mdast(document, &mdx_options())
        .map(|_| ())
        .map_err(|message| message.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// How many matching nodes a walk may replace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// Stop the whole walk after the first replacement
    First,
    All,
}

#[derive(Debug)]
pub struct ContentTree {
    source: String,
    root: Node,
    edits: Vec<Edit>,
}

impl ContentTree {
    pub fn parse(source: String) -> anyhow::Result<Self> {
        let root = markdown::to_mdast(&source, &legacy_options())
            .map_err(|message| anyhow!("markdown parse failed: {message}"))?;
        Ok(Self {
            source,
            root,
            edits: Vec::new(),
        })
    }

    #[cfg(test)]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The raw YAML of the first frontmatter block
    pub fn frontmatter(&self) -> Option<&str> {
        self.root.children()?.iter().find_map(|node| match node {
            Node::Yaml(Yaml { value, .. }) => Some(value.as_str()),
            _ => None,
        })
    }

    /// replace_where walks the tree depth first and offers every node matching `select` to
    /// `replace`, along with the document source its positions index into. A returned node takes
    /// the place of the old one at the same index; `None` leaves it alone. Replacement nodes are
    /// not walked into.
    ///
    /// Returns the number of nodes replaced.
    pub fn replace_where<S, R>(&mut self, walk: Walk, select: S, mut replace: R) -> anyhow::Result<usize>
    where
        S: Fn(&Node) -> bool,
        R: FnMut(&Node, &str) -> anyhow::Result<Option<Node>>,
    {
        let mut replaced = Vec::new();
        let mut with_source = |node: &Node| replace(node, &self.source);
        visit_replace(&mut self.root, walk, &select, &mut with_source, &mut replaced)?;

        let count = replaced.len();
        for (old, new) in replaced {
            let edit = self.edit_for(&old, &new)?;
            self.push_edit(edit);
        }
        Ok(count)
    }

    /// serialize applies every replacement to the original source
    pub fn serialize(&self) -> String {
        self.spliced(0, self.source.len())
    }

    /// The source between `start` and `end` with the edits recorded inside that range applied
    fn spliced(&self, start: usize, end: usize) -> String {
        let mut edits: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|edit| edit.start >= start && edit.end <= end)
            .collect();
        edits.sort_by_key(|edit| edit.start);

        let mut out = String::with_capacity(end - start);
        let mut cursor = start;
        for edit in edits {
            if edit.start < cursor {
                warn!(
                    "Skipping overlapping edit at bytes {}..{}",
                    edit.start, edit.end
                );
                continue;
            }
            out.push_str(&self.source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&self.source[cursor..end]);
        out
    }

    fn push_edit(&mut self, edit: Edit) {
        // A later walk may replace a node an earlier walk produced, or an ancestor of it
        self.edits
            .retain(|old| !(old.start >= edit.start && old.end <= edit.end));
        self.edits.push(edit);
    }

    fn edit_for(&self, old: &Node, new: &Node) -> anyhow::Result<Edit> {
        let position = old
            .position()
            .ok_or_else(|| anyhow!("cannot replace a node without a source position"))?;
        Ok(Edit {
            start: position.start.offset,
            end: position.end.offset,
            text: self.render_replacement(old, position, new)?,
        })
    }

    /// Containers keep the source of every child that survived, with the edits earlier walks made
    /// inside it. New text children that carry a position inside the span are copied from the
    /// source as well, other new children are rendered.
    fn render_replacement(&self, old: &Node, span: &Position, new: &Node) -> anyhow::Result<String> {
        let (Some(old_children), Some(new_children)) = (old.children(), new.children()) else {
            return render_leaf(new);
        };
        let first = old_children.first().and_then(Node::position);
        let last = old_children.last().and_then(Node::position);
        let (Some(first), Some(last)) = (first, last) else {
            bail!("cannot rewrite the children of an empty node");
        };

        let mut out = self.spliced(span.start.offset, first.start.offset);
        for child in new_children {
            let survived = old_children
                .iter()
                .find(|old| *old == child)
                .and_then(Node::position);
            let verbatim = match child {
                Node::Text(Text {
                    position: Some(position),
                    ..
                }) if position.start.offset >= span.start.offset
                    && position.end.offset <= span.end.offset =>
                {
                    Some(position)
                }
                _ => None,
            };
            match survived.or(verbatim) {
                Some(position) => {
                    out.push_str(&self.spliced(position.start.offset, position.end.offset))
                }
                None => out.push_str(&render_leaf(child)?),
            }
        }
        out.push_str(&self.spliced(last.end.offset, span.end.offset));
        Ok(out)
    }
}

fn visit_replace<S, R>(
    node: &mut Node,
    walk: Walk,
    select: &S,
    replace: &mut R,
    replaced: &mut Vec<(Node, Node)>,
) -> anyhow::Result<bool>
where
    S: Fn(&Node) -> bool,
    R: FnMut(&Node) -> anyhow::Result<Option<Node>>,
{
    let Some(children) = node.children_mut() else {
        return Ok(false);
    };
    for child in children.iter_mut() {
        if select(child) {
            if let Some(new) = replace(child)? {
                let old = std::mem::replace(child, new.clone());
                replaced.push((old, new));
                if walk == Walk::First {
                    return Ok(true);
                }
                continue;
            }
        }
        if visit_replace(child, walk, select, replace, replaced)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn render_leaf(node: &Node) -> anyhow::Result<String> {
    match node {
        Node::Text(Text { value, .. }) => Ok(escape_text(value)),
        Node::Image(image) => Ok(render_image(image)),
        Node::Yaml(Yaml { value, .. }) => Ok(format!("---\n{}\n---", value.trim_end())),
        other => Err(anyhow!("no renderer for replacement node {other:?}")),
    }
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '*' | '[' | ']' | '<' | '>' | '{' | '}' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn render_image(image: &Image) -> String {
    let alt = image
        .alt
        .replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]");
    let url = if image.url.contains([' ', '(', ')', '<', '>']) {
        format!("<{}>", image.url.replace('<', "%3C").replace('>', "%3E"))
    } else {
        image.url.clone()
    };
    match &image.title {
        Some(title) => format!("![{alt}]({url} \"{}\")", title.replace('"', "\\\"")),
        None => format!("![{alt}]({url})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree(source: &str) -> ContentTree {
        ContentTree::parse(source.to_string()).unwrap()
    }

    fn as_text(node: &Node) -> Option<Node> {
        Some(Node::Text(Text {
            value: "plain".into(),
            position: node.position().cloned(),
        }))
    }

    #[test]
    fn untouched_document_serializes_verbatim() {
        let source = "---\ntitle: x\n---\n\n# Heading\n\n* a *list*\n\n```rust\nfn main() {}\n```\n";
        assert_eq!(tree(source).serialize(), source);
    }

    #[test]
    fn frontmatter_is_exposed_raw() {
        let doc = tree("---\ntitle: x\ntags: [a]\n---\nbody\n");
        assert_eq!(doc.frontmatter(), Some("title: x\ntags: [a]"));
        assert_eq!(tree("no frontmatter\n").frontmatter(), None);
    }

    #[test]
    fn replacement_only_touches_the_node_span() {
        let mut doc = tree("Before [a link](/x) after.\n\nNext [b](/y).\n");
        let count = doc
            .replace_where(Walk::All, |node| matches!(node, Node::Link(_)), |node, _| Ok(as_text(node)))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(doc.serialize(), "Before plain after.\n\nNext plain.\n");
    }

    #[test]
    fn first_walk_stops_after_one_replacement() {
        let mut doc = tree("[a](/x) and [b](/y)\n");
        let count = doc
            .replace_where(Walk::First, |node| matches!(node, Node::Link(_)), |node, _| Ok(as_text(node)))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(doc.serialize(), "plain and [b](/y)\n");
    }

    #[test]
    fn later_walks_see_earlier_replacements() {
        let mut doc = tree("[![pic](/a.png)](/page)\n");
        doc.replace_where(Walk::All, |node| matches!(node, Node::Link(_)), |node, _| Ok(as_text(node)))
            .unwrap();
        let images = doc
            .replace_where(Walk::All, |node| matches!(node, Node::Image(_)), |_, _| {
                panic!("image was removed with its link")
            })
            .unwrap();
        assert_eq!(images, 0);
        assert_eq!(doc.serialize(), "plain\n");
    }

    #[test]
    fn replacing_a_replacement_keeps_only_the_latest_edit() {
        let mut doc = tree("[a](/x)\n");
        doc.replace_where(Walk::All, |node| matches!(node, Node::Link(_)), |node, _| Ok(as_text(node)))
            .unwrap();
        doc.replace_where(
            Walk::All,
            |node| matches!(node, Node::Text(Text { value, .. }) if value == "plain"),
            |node, _| {
                Ok(Some(Node::Text(Text {
                    value: "second".into(),
                    position: node.position().cloned(),
                })))
            },
        )
        .unwrap();
        assert_eq!(doc.serialize(), "second\n");
    }

    #[test]
    fn container_replacement_keeps_edits_inside_surviving_children() {
        let mut doc = tree("Intro [a](/x) end\n");
        doc.replace_where(Walk::All, |node| matches!(node, Node::Link(_)), |node, _| Ok(as_text(node)))
            .unwrap();
        doc.replace_where(
            Walk::All,
            |node| matches!(node, Node::Paragraph(_)),
            |node, _| {
                let Node::Paragraph(paragraph) = node else {
                    return Ok(None);
                };
                let mut paragraph = paragraph.clone();
                paragraph.children[0] = Node::Text(Text {
                    value: "Start ".into(),
                    position: None,
                });
                Ok(Some(Node::Paragraph(paragraph)))
            },
        )
        .unwrap();
        assert_eq!(doc.serialize(), "Start plain end\n");
    }

    #[test]
    fn positioned_text_children_are_copied_from_source() {
        let mut doc = tree("a \\_b\\_ &amp; c\n");
        doc.replace_where(
            Walk::All,
            |node| matches!(node, Node::Paragraph(_)),
            |node, source| {
                let Node::Paragraph(paragraph) = node else {
                    return Ok(None);
                };
                let span = paragraph.position.clone().unwrap();
                let mut tail = span.clone();
                tail.start.offset += 2;
                let value = source[tail.start.offset..tail.end.offset].to_string();
                let mut paragraph = paragraph.clone();
                paragraph.children = vec![
                    Node::Text(Text {
                        value: "<x>".into(),
                        position: None,
                    }),
                    Node::Text(Text {
                        value,
                        position: Some(tail),
                    }),
                ];
                Ok(Some(Node::Paragraph(paragraph)))
            },
        )
        .unwrap();
        assert_eq!(doc.serialize(), "\\<x\\>\\_b\\_ &amp; c\n");
    }

    #[test]
    fn leaves_render_as_markdown() {
        let image = Node::Image(Image {
            alt: "A [cat]".into(),
            url: "/linaro-website/images/blog/my pic".into(),
            title: Some("Say \"hi\"".into()),
            position: None,
        });
        assert_eq!(
            render_leaf(&image).unwrap(),
            r#"![A \[cat\]](</linaro-website/images/blog/my pic> "Say \"hi\"")"#
        );
        assert_eq!(
            render_leaf(&Node::Text(Text {
                value: "a <b> {c}".into(),
                position: None
            }))
            .unwrap(),
            r"a \<b\> \{c\}"
        );
    }

    #[test]
    fn mdx_check_flags_invalid_documents() {
        assert!(check_mdx("---\ntitle: x\n---\n\n# Fine\n").is_ok());
        assert!(check_mdx("Unclosed <div> tag\n").is_err());
    }
}
