//! Resolution of `asset:N` references during playback.
//!
//! Every referenced asset id is always bound to a resolvable synthetic URL:
//! a placeholder with empty bytes until the asset's frame arrives, upgraded
//! to a real-content URL on resolve. Binding sites — `(element, attribute)`
//! pairs and stylesheets — are re-pointed at the new URL when an asset
//! resolves, and the old placeholder is revoked. Reference counts track how
//! many sites hold an asset; at zero the synthetic URL is revoked and the
//! bytes released.

use bytes::Bytes;
use rustc_hash::FxHashMap;

use domreel_dom::stylesheet::SheetKey;
use domreel_dom::{Document, QualName};
use domreel_protocol::urls::{parse_asset_token, rewrite_css_urls, rewrite_srcset};
use domreel_protocol::{Asset, AssetId};

use crate::object_url::ObjectUrlStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetState {
    Unresolved,
    Pending,
    Resolved,
}

#[derive(Debug, Clone, PartialEq)]
enum BindingSite {
    Attr { node: usize, name: QualName },
    Sheet { key: SheetKey },
}

struct AssetEntry {
    state: AssetState,
    /// Synthetic empty-bytes URL handed to binding sites before resolution
    placeholder_url: Option<String>,
    /// Synthetic content URL, or the original URL for empty-bytes fallbacks
    resolved_url: Option<String>,
    waiters: Vec<BindingSite>,
    ref_count: usize,
}

impl Default for AssetEntry {
    fn default() -> Self {
        Self {
            state: AssetState::Unresolved,
            placeholder_url: None,
            resolved_url: None,
            waiters: Vec::new(),
            ref_count: 0,
        }
    }
}

#[derive(Default)]
pub struct AssetManager {
    entries: FxHashMap<AssetId, AssetEntry>,
    urls: ObjectUrlStore,
    assets_by_node: FxHashMap<usize, Vec<AssetId>>,
    assets_by_sheet: FxHashMap<SheetKey, Vec<AssetId>>,
}

impl AssetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The synthetic URL store, for hosts resolving `blob:domreel/N` URLs.
    pub fn object_urls(&self) -> &ObjectUrlStore {
        &self.urls
    }

    /// The URL an asset reference currently resolves to.
    fn current_url(&mut self, id: AssetId) -> String {
        let entry = self.entries.entry(id).or_default();
        if let Some(url) = &entry.resolved_url {
            return url.clone();
        }
        if let Some(url) = &entry.placeholder_url {
            return url.clone();
        }
        let url = self.urls.create(Bytes::new(), None);
        self.entries.get_mut(&id).unwrap().placeholder_url = Some(url.clone());
        url
    }

    fn bind(&mut self, id: AssetId, site: BindingSite) -> String {
        match &site {
            BindingSite::Attr { node, .. } => {
                self.assets_by_node.entry(*node).or_default().push(id)
            }
            BindingSite::Sheet { key } => self.assets_by_sheet.entry(*key).or_default().push(id),
        }
        let url = self.current_url(id);
        let entry = self.entries.get_mut(&id).expect("entry created above");
        if !entry.waiters.contains(&site) {
            entry.waiters.push(site);
        }
        entry.ref_count += 1;
        if entry.state == AssetState::Unresolved {
            entry.state = AssetState::Pending;
        }
        url
    }

    /// Rewrite an attribute value according to its syntax, binding every
    /// `asset:N` token in it to this `(element, attribute)` site.
    pub fn rewrite_attr_value(&mut self, node: usize, name: &QualName, value: &str) -> String {
        let site = |this: &mut Self, id: AssetId| {
            this.bind(
                id,
                BindingSite::Attr {
                    node,
                    name: name.clone(),
                },
            )
        };
        match name.local.as_ref() {
            "srcset" => rewrite_srcset(value, |url| {
                parse_asset_token(url).map(|id| site(self, id))
            }),
            "style" => rewrite_css_urls(value, |url| {
                parse_asset_token(url).map(|id| site(self, id))
            }),
            _ => match parse_asset_token(value) {
                Some(id) => site(self, id),
                None => value.to_string(),
            },
        }
    }

    /// Rewrite a stylesheet text, binding every nested `url(asset:N)` to the
    /// sheet.
    pub fn rewrite_sheet_text(&mut self, key: SheetKey, text: &str) -> String {
        rewrite_css_urls(text, |url| {
            parse_asset_token(url).map(|id| self.bind(id, BindingSite::Sheet { key }))
        })
    }

    /// An asset frame arrived: upgrade the entry to resolved, update every
    /// waiting binding site in the target document, revoke the placeholder.
    pub fn on_asset(&mut self, doc: &mut Document, asset: Asset) {
        let entry = self.entries.entry(asset.id).or_default();
        if entry.resolved_url.is_some() {
            tracing::warn!("duplicate asset frame for id {}", asset.id);
            return;
        }

        let new_url = if asset.is_fallback() {
            // Nothing was captured; waiters get the original URL and the
            // host's own loading machinery takes over from there.
            asset.url.clone()
        } else {
            self.urls.create(asset.bytes.clone(), asset.mime.clone())
        };

        let entry = self.entries.get_mut(&asset.id).expect("entry exists");
        entry.state = AssetState::Resolved;
        entry.resolved_url = Some(new_url.clone());
        let old_url = entry.placeholder_url.take();
        let waiters = entry.waiters.clone();

        if let Some(old_url) = old_url {
            for site in waiters {
                match site {
                    BindingSite::Attr { node, name } => {
                        let Some(element) =
                            doc.get_node_mut(node).and_then(|n| n.element_data_mut())
                        else {
                            continue;
                        };
                        if let Some(attr) =
                            element.attrs.iter_mut().find(|attr| attr.name == name)
                        {
                            attr.value = attr.value.replace(&old_url, &new_url);
                        }
                    }
                    BindingSite::Sheet { key } => {
                        // Full-text re-derive and replace; rule-level editing
                        // in place is not portable across sheet backends.
                        if let Some(sheet) = doc.sheets.get_mut(key) {
                            let text = sheet.text().replace(&old_url, &new_url);
                            sheet.replace_text(&text);
                        }
                    }
                }
            }
            self.urls.revoke(&old_url);
        }
    }

    /// An element left the target tree: release its bindings.
    pub fn element_removed(&mut self, node: usize) {
        if let Some(ids) = self.assets_by_node.remove(&node) {
            for id in ids {
                self.release(id);
            }
        }
    }

    /// A stylesheet was removed: release its bindings.
    pub fn sheet_removed(&mut self, key: SheetKey) {
        if let Some(ids) = self.assets_by_sheet.remove(&key) {
            for id in ids {
                self.release(id);
            }
        }
    }

    fn release(&mut self, id: AssetId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return;
        }
        let entry = self.entries.remove(&id).expect("entry exists");
        if let Some(url) = entry.placeholder_url {
            self.urls.revoke(&url);
        }
        if let Some(url) = entry.resolved_url {
            // No-op for fallback (original) URLs, which are not ours
            self.urls.revoke(&url);
        }
    }

    /// Final sweep: revoke every synthetic URL still alive.
    pub fn teardown(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(url) = entry.placeholder_url {
                self.urls.revoke(&url);
            }
            if let Some(url) = entry.resolved_url {
                self.urls.revoke(&url);
            }
        }
        self.assets_by_node.clear();
        self.assets_by_sheet.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domreel_dom::node::attr_name_from_wire;
    use domreel_dom::{Document, DocumentConfig};

    fn manager_with_doc() -> (AssetManager, Document) {
        (AssetManager::new(), Document::new(DocumentConfig::default()))
    }

    fn png_asset(id: AssetId) -> Asset {
        Asset {
            id,
            url: "https://example.com/a.png".to_string(),
            mime: Some("image/png".to_string()),
            bytes: Bytes::from_static(&[1, 2, 3]),
        }
    }

    #[test]
    fn bind_before_bytes_gets_a_placeholder_then_upgrades() {
        let (mut assets, mut doc) = manager_with_doc();
        let name = attr_name_from_wire("src");
        let node = {
            use domreel_dom::node::{Attribute, ElementData};
            let data = ElementData::new(
                attr_qual("img"),
                vec![Attribute {
                    name: name.clone(),
                    value: String::new(),
                }],
            );
            doc.create_element_node(data)
        };

        let bound = assets.rewrite_attr_value(node, &name, "asset:7");
        assert!(ObjectUrlStore::is_synthetic(&bound));
        assert!(assets.object_urls().get(&bound).unwrap().bytes.is_empty());
        doc.nodes[node].element_data_mut().unwrap().attrs[0].value = bound.clone();

        assets.on_asset(&mut doc, png_asset(7));
        let value = doc.nodes[node].element_data().unwrap().attrs[0].value.clone();
        assert_ne!(value, bound, "waiter updated to the content URL");
        let entry = assets.object_urls().get(&value).expect("content URL resolves");
        assert_eq!(entry.bytes.as_ref(), &[1, 2, 3]);
        assert_eq!(entry.mime.as_deref(), Some("image/png"));
        assert!(
            assets.object_urls().get(&bound).is_none(),
            "placeholder revoked on resolve"
        );
    }

    fn attr_qual(name: &str) -> domreel_dom::QualName {
        attr_name_from_wire(name)
    }

    #[test]
    fn bytes_before_bind_resolve_immediately() {
        let (mut assets, mut doc) = manager_with_doc();
        assets.on_asset(&mut doc, png_asset(3));

        let name = attr_name_from_wire("src");
        let bound = assets.rewrite_attr_value(1, &name, "asset:3");
        assert_eq!(
            assets.object_urls().get(&bound).unwrap().bytes.as_ref(),
            &[1, 2, 3]
        );
    }

    #[test]
    fn srcset_descriptors_survive_binding() {
        let (mut assets, _doc) = manager_with_doc();
        let name = attr_name_from_wire("srcset");
        let bound = assets.rewrite_attr_value(1, &name, "asset:1 1x, asset:2 2x");
        let parts: Vec<&str> = bound.split(", ").collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with(" 1x"));
        assert!(parts[1].ends_with(" 2x"));
        assert_ne!(parts[0], parts[1]);
    }

    #[test]
    fn fallback_assets_hand_back_the_original_url() {
        let (mut assets, mut doc) = manager_with_doc();
        let name = attr_name_from_wire("src");
        let bound = assets.rewrite_attr_value(1, &name, "asset:4");
        assert!(ObjectUrlStore::is_synthetic(&bound));

        assets.on_asset(
            &mut doc,
            Asset {
                id: 4,
                url: "https://example.com/miss.png".to_string(),
                mime: None,
                bytes: Bytes::new(),
            },
        );
        let url = assets.current_url(4);
        assert_eq!(url, "https://example.com/miss.png");
    }

    #[test]
    fn refcount_zero_revokes_the_synthetic_url() {
        let (mut assets, mut doc) = manager_with_doc();
        let name = attr_name_from_wire("src");
        let _ = assets.rewrite_attr_value(5, &name, "asset:9");
        assets.on_asset(&mut doc, png_asset(9));
        assert_eq!(assets.object_urls().len(), 1);

        assets.element_removed(5);
        assert_eq!(assets.object_urls().len(), 0);
    }
}
