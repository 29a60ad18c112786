//! The asset intern table and the fetch plumbing behind it.
//!
//! URLs discovered while serializing the tree are interned to dense asset
//! ids; the placeholder token `asset:N` stands in for the URL everywhere on
//! the wire. Fetches complete on the net provider's threads and come back to
//! the recorder over a channel, drained in `poll`.

use std::sync::mpsc::Sender;

use rustc_hash::FxHashMap;
use url::Url;

use domreel_protocol::urls::format_asset_token;
use domreel_protocol::AssetId;
use domreel_traits::net::{Bytes, NetHandler};

/// Intern table mapping absolute URL → asset id.
pub struct PendingAssets {
    by_url: FxHashMap<String, AssetId>,
    next_id: AssetId,
}

impl PendingAssets {
    pub fn new() -> Self {
        Self {
            by_url: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Intern a URL, returning its asset id and whether it is fresh (seen for
    /// the first time, so its bytes still need to be captured).
    pub fn intern(&mut self, url: &Url) -> (AssetId, bool) {
        if let Some(&id) = self.by_url.get(url.as_str()) {
            return (id, false);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_url.insert(url.to_string(), id);
        (id, true)
    }

    /// The placeholder token standing in for a URL on the wire.
    pub fn placeholder(&self, id: AssetId) -> String {
        format_asset_token(id)
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

impl Default for PendingAssets {
    fn default() -> Self {
        Self::new()
    }
}

/// What an asset is expected to be, decided at the reference site. Stylesheet
/// bytes get their nested `url(...)` references rewritten and chased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Media,
}

/// A capture the inliner wants performed.
#[derive(Debug, Clone)]
pub struct AssetFetch {
    pub id: AssetId,
    pub url: Url,
    pub kind: AssetKind,
    /// Cross-origin reference with inlining disabled: no fetch is made and an
    /// empty-bytes asset frame signals the player to fall back to the URL.
    pub policy_blocked: bool,
}

/// Fetch completions delivered back to the recorder's thread.
#[derive(Debug)]
pub enum RecorderEvent {
    AssetLoaded {
        id: AssetId,
        url: String,
        mime: Option<String>,
        bytes: Bytes,
    },
    AssetFailed {
        id: AssetId,
        url: String,
    },
}

/// Net handler routing a fetch result into the recorder's event channel.
pub struct AssetFetchHandler {
    pub id: AssetId,
    pub url: String,
    pub tx: Sender<RecorderEvent>,
}

impl NetHandler for AssetFetchHandler {
    fn bytes(self: Box<Self>, resolved_url: String, bytes: Bytes) {
        let mime = sniff_mime(&resolved_url, &bytes);
        let _ = self.tx.send(RecorderEvent::AssetLoaded {
            id: self.id,
            url: self.url,
            mime,
            bytes,
        });
    }

    fn fail(self: Box<Self>, reason: Option<String>) {
        tracing::warn!(
            "asset fetch failed for {}: {}",
            self.url,
            reason.as_deref().unwrap_or("unknown error")
        );
        let _ = self.tx.send(RecorderEvent::AssetFailed {
            id: self.id,
            url: self.url,
        });
    }
}

/// Guess an asset's MIME type from its magic numbers, falling back to the URL
/// extension.
pub fn sniff_mime(url: &str, bytes: &[u8]) -> Option<String> {
    let sniffed = match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some(mime::IMAGE_PNG.as_ref()),
        [0xFF, 0xD8, 0xFF, ..] => Some(mime::IMAGE_JPEG.as_ref()),
        [b'G', b'I', b'F', b'8', ..] => Some(mime::IMAGE_GIF.as_ref()),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        // https://w3c.github.io/woff/woff2/#woff20Header
        [0x77, 0x4F, 0x46, 0x32, ..] => Some("font/woff2"),
        [0x77, 0x4F, 0x46, 0x46, ..] => Some("font/woff"),
        [0x00, 0x01, 0x00, 0x00, ..] | [b't', b'r', b'u', b'e', ..] => Some("font/ttf"),
        [b'O', b'T', b'T', b'O', ..] => Some("font/otf"),
        _ => None,
    };
    if let Some(mime) = sniffed {
        return Some(mime.to_string());
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => mime::IMAGE_PNG.as_ref(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.as_ref(),
        "gif" => mime::IMAGE_GIF.as_ref(),
        "svg" => mime::IMAGE_SVG.as_ref(),
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "css" => mime::TEXT_CSS.as_ref(),
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime.to_string())
}
