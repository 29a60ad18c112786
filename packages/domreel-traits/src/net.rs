//! Abstractions of networking so that custom fetch implementations can be provided

pub use bytes::Bytes;
pub use http::{self, HeaderMap, Method};
use std::sync::Arc;
pub use url::Url;

pub type SharedProvider = Arc<dyn NetProvider>;
pub type BoxedHandler = Box<dyn NetHandler>;

/// A type that fetches resources for a document.
///
/// This may be over the network via http(s), via the filesystem, or some other method.
pub trait NetProvider: Send + Sync + 'static {
    fn fetch(&self, doc_id: usize, request: Request, handler: BoxedHandler);
}

/// A type that receives the raw bytes of a completed fetch, or is told that the
/// fetch failed. Handlers are one-shot: exactly one of the two methods is called.
pub trait NetHandler: Send + Sync + 'static {
    fn bytes(self: Box<Self>, resolved_url: String, bytes: Bytes);
    fn fail(self: Box<Self>, reason: Option<String>);
}

#[non_exhaustive]
#[derive(Debug, Clone)]
/// A request type loosely representing <https://fetch.spec.whatwg.org/#requests>
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
}

impl Request {
    /// A GET request to the specified Url
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }
}

/// A default noop NetProvider. Handlers passed to it are dropped without ever
/// being resolved, which readers should treat as a fetch that never completes.
#[derive(Default)]
pub struct DummyNetProvider;
impl NetProvider for DummyNetProvider {
    fn fetch(&self, _doc_id: usize, _request: Request, _handler: BoxedHandler) {}
}
