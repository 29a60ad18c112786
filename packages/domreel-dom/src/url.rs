use std::ops::Deref;
use std::str::FromStr;

use url::Url;

#[derive(Clone)]
pub(crate) struct DocumentUrl {
    base_url: Url,
}

impl DocumentUrl {
    pub(crate) fn resolve_relative(&self, raw: &str) -> Option<Url> {
        self.base_url.join(raw).ok()
    }
}

impl Default for DocumentUrl {
    fn default() -> Self {
        Self::from_str("about:blank").unwrap()
    }
}
impl FromStr for DocumentUrl {
    type Err = <Url as FromStr>::Err;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base_url = Url::parse(s)?;
        Ok(Self { base_url })
    }
}
impl From<Url> for DocumentUrl {
    fn from(base_url: Url) -> Self {
        Self { base_url }
    }
}
impl Deref for DocumentUrl {
    type Target = Url;
    fn deref(&self) -> &Self::Target {
        &self.base_url
    }
}
