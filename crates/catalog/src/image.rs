use serde::{Deserialize, Serialize};

/// Reference to a stored image asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
}

impl ImageRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            alt: None,
        }
    }

    /// Wrap a bare URL from a legacy `image_urls` payload.
    ///
    /// The synthetic id is deterministic in the URL's position so repeated
    /// loads of the same legacy snapshot produce identical state.
    pub fn legacy(index: usize, url: impl Into<String>) -> Self {
        Self {
            id: format!("legacy-{index}"),
            url: url.into(),
            alt: None,
        }
    }
}
