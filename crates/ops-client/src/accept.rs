//! `Accept` header selection by endpoint family
//!
//! OPS serves different document flavours per service family and rejects
//! requests whose `Accept` header does not match. The family is derived from
//! the URL path shape, never from what the caller intends to do with it.

use reqwest::header::HeaderValue;

/// Response flavour expected from an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Bibliographic, abstract and family documents
    ExchangeXml,
    /// Description and claims
    FulltextXml,
    /// Search results, number service, classification, legal events
    OpsXml,
    /// EP register
    RegisterXml,
    /// Page images
    Image,
}

impl Accept {
    /// Pick the flavour for a request path (query string ignored).
    pub fn for_path(path: &str) -> Self {
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let has = |segment: &str| path.contains(segment);

        if has("/images/") || path.ends_with("/images") {
            Accept::Image
        } else if has("/register/") || path.ends_with("/register") {
            Accept::RegisterXml
        } else if path.ends_with("/fulltext")
            || path.ends_with("/description")
            || path.ends_with("/claims")
        {
            Accept::FulltextXml
        } else if has("/number-service")
            || has("/classification")
            || has("/search")
            || has("/legal")
        {
            Accept::OpsXml
        } else {
            Accept::ExchangeXml
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Accept::ExchangeXml => "application/exchange+xml",
            Accept::FulltextXml => "application/fulltext+xml",
            Accept::OpsXml => "application/ops+xml",
            Accept::RegisterXml => "application/register+xml",
            Accept::Image => "application/tiff, application/pdf, image/png",
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.media_type())
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Accept::Image)
    }
}
