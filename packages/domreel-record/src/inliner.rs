//! Serialization of live subtrees into wire form.
//!
//! The inliner walks a subtree depth-first, assigning stream ids on first
//! encounter, and produces the virtual-DOM wire form with every asset
//! reference rewritten to an `asset:N` placeholder. Freshly interned URLs are
//! collected as [`AssetFetch`]es for the recorder to capture out-of-band.

use markup5ever::local_name;
use url::Url;

use domreel_dom::node::{
    attr_wire_name, element_wire_namespace, is_asset_attribute, Attribute, NodeData, TextKind,
};
use domreel_dom::Document;
use domreel_protocol::urls::{
    format_asset_token, is_self_contained_url, rewrite_css_urls, rewrite_srcset,
};
use domreel_protocol::{VAdoptedSheet, VDocument, VElement, VNode};

use crate::assets::{AssetFetch, AssetKind, PendingAssets};

pub struct InlineContext<'a> {
    pub assets: &'a mut PendingAssets,
    pub fetches: Vec<AssetFetch>,
    pub inline_cross_origin: bool,
}

impl<'a> InlineContext<'a> {
    pub fn new(assets: &'a mut PendingAssets, inline_cross_origin: bool) -> Self {
        Self {
            assets,
            fetches: Vec::new(),
            inline_cross_origin,
        }
    }

    /// Intern a raw URL reference, returning its placeholder token. `None`
    /// leaves the reference untouched (empty, unresolvable, or carrying its
    /// own content).
    fn intern(&mut self, doc: &Document, raw: &str, kind: AssetKind) -> Option<String> {
        if raw.trim().is_empty() || is_self_contained_url(raw) {
            return None;
        }
        let url = doc.resolve_url(raw)?;
        let (id, fresh) = self.assets.intern(&url);
        if fresh {
            let policy_blocked =
                !self.inline_cross_origin && url.origin() != doc.base_url().origin();
            self.fetches.push(AssetFetch {
                id,
                url,
                kind,
                policy_blocked,
            });
        }
        Some(format_asset_token(id))
    }
}

/// Expected asset kind for a URL referenced from CSS or a stylesheet link.
pub(crate) fn kind_for_url(raw: &str) -> AssetKind {
    let path = raw.split(['?', '#']).next().unwrap_or(raw);
    if path.rsplit_once('.').map(|(_, ext)| ext) == Some("css") {
        AssetKind::Stylesheet
    } else {
        AssetKind::Media
    }
}

/// Serialize the whole document for a keyframe: adopted sheets (whose stream
/// ids must already be stamped) followed by the root's children.
pub fn serialize_document(doc: &mut Document, ctx: &mut InlineContext) -> VDocument {
    let id = doc.id_map.get_id(&mut doc.nodes, 0);

    let adopted_keys = doc.adopted_sheets.clone();
    let adopted_sheets = adopted_keys
        .into_iter()
        .filter_map(|key| {
            let sheet = doc.sheet(key)?;
            let stream_id = sheet.stream_id.unwrap_or_else(|| {
                tracing::warn!("adopted sheet {key} serialized without a stream id");
                0
            });
            let media = sheet.media.clone();
            let text = sheet.text();
            let text = rewrite_css_urls(&text, |url| ctx.intern(doc, url, kind_for_url(url)));
            Some(VAdoptedSheet {
                id: stream_id,
                media,
                text,
            })
        })
        .collect();

    let children = doc.root_node().children.clone();
    let children = children
        .into_iter()
        .filter_map(|child| serialize_subtree(doc, ctx, child))
        .collect();

    VDocument {
        id,
        adopted_sheets,
        children,
    }
}

/// Serialize one subtree, assigning stream ids on first encounter.
pub fn serialize_subtree(doc: &mut Document, ctx: &mut InlineContext, node_id: usize) -> Option<VNode> {
    serialize_node(doc, ctx, node_id, false)
}

fn serialize_node(
    doc: &mut Document,
    ctx: &mut InlineContext,
    node_id: usize,
    in_style_element: bool,
) -> Option<VNode> {
    if doc.nodes[node_id].is_shadow_root() {
        tracing::warn!("shadow-root container {node_id} serialized directly");
        return None;
    }

    let id = doc.id_map.get_id(&mut doc.nodes, node_id);

    match &doc.nodes[node_id].data {
        NodeData::Document => {
            tracing::warn!("nested document node {node_id} cannot be serialized");
            None
        }
        NodeData::ShadowRoot => None,
        NodeData::Text(data) => {
            let kind = data.kind;
            let content = data.content.clone();
            let content = if in_style_element && kind == TextKind::Text {
                rewrite_css_urls(&content, |url| ctx.intern(doc, url, kind_for_url(url)))
            } else {
                content
            };
            Some(match kind {
                TextKind::Text => VNode::Text { id, text: content },
                TextKind::Cdata => VNode::Cdata { id, data: content },
                TextKind::Comment => VNode::Comment { id, data: content },
            })
        }
        NodeData::ProcessingInstruction { target, data } => Some(VNode::ProcessingInstruction {
            id,
            target: target.clone(),
            data: data.clone(),
        }),
        NodeData::Doctype(data) => Some(VNode::DocumentType {
            id,
            name: data.name.clone(),
            public_id: data.public_id.clone(),
            system_id: data.system_id.clone(),
        }),
        NodeData::Element(_) => {
            let (name, attrs, children, shadow_root) = {
                let node = &doc.nodes[node_id];
                let element = node.element_data().expect("matched as element");
                (
                    element.name.clone(),
                    element.attrs.clone(),
                    node.children.clone(),
                    element.shadow_root,
                )
            };

            let tag = name.local.to_string();
            let namespace = element_wire_namespace(&name);
            let is_style = name.local == local_name!("style");

            let attributes = attrs
                .iter()
                .map(|attr| {
                    let value = rewrite_attr_value(doc, ctx, &name.local, &attrs, attr);
                    (attr_wire_name(&attr.name), value)
                })
                .collect();

            let children = children
                .into_iter()
                .filter_map(|child| serialize_node(doc, ctx, child, is_style))
                .collect();

            let shadow = shadow_root.map(|shadow| {
                let shadow_children = doc.nodes[shadow].children.clone();
                shadow_children
                    .into_iter()
                    .filter_map(|child| serialize_node(doc, ctx, child, false))
                    .collect()
            });

            Some(VNode::Element(VElement {
                id,
                tag,
                namespace,
                attributes,
                children,
                shadow,
            }))
        }
    }
}

/// Rewrite one attribute value according to its syntax, interning referenced
/// URLs. Values that carry no asset references pass through unchanged.
fn rewrite_attr_value(
    doc: &Document,
    ctx: &mut InlineContext,
    tag: &markup5ever::LocalName,
    attrs: &[Attribute],
    attr: &Attribute,
) -> String {
    if !is_asset_attribute(&attr.name) {
        return attr.value.clone();
    }

    let local = attr.name.local.as_ref();
    match local {
        "srcset" => rewrite_srcset(&attr.value, |url| {
            ctx.intern(doc, url, AssetKind::Media)
        }),
        "style" => rewrite_css_urls(&attr.value, |url| {
            ctx.intern(doc, url, kind_for_url(url))
        }),
        "href" => {
            // Only link relations that name a subresource are assets; a
            // document hyperlink stays a hyperlink.
            let is_xlink = attr.name.prefix.as_ref().map(|p| p.as_ref()) == Some("xlink");
            if is_xlink {
                return ctx
                    .intern(doc, &attr.value, AssetKind::Media)
                    .unwrap_or_else(|| attr.value.clone());
            }
            if tag.as_ref() != "link" {
                return attr.value.clone();
            }
            let rel = attrs
                .iter()
                .find(|a| a.name.local == local_name!("rel"))
                .map(|a| a.value.as_str())
                .unwrap_or("");
            let mut rels = rel.split_ascii_whitespace();
            let kind = if rels.clone().any(|r| r.eq_ignore_ascii_case("stylesheet")) {
                Some(AssetKind::Stylesheet)
            } else if rels.any(|r| r.eq_ignore_ascii_case("icon")) {
                Some(AssetKind::Media)
            } else {
                None
            };
            match kind {
                Some(kind) => ctx
                    .intern(doc, &attr.value, kind)
                    .unwrap_or_else(|| attr.value.clone()),
                None => attr.value.clone(),
            }
        }
        // src, poster, data-src
        _ => ctx
            .intern(doc, &attr.value, AssetKind::Media)
            .unwrap_or_else(|| attr.value.clone()),
    }
}
