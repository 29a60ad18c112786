use crate::document::Viewport;

/// Options used when constructing a [`Document`](crate::Document)
#[derive(Default)]
pub struct DocumentConfig {
    /// The base url which relative URLs are resolved against
    pub base_url: Option<String>,
    /// The initial viewport
    pub viewport: Option<Viewport>,
}
