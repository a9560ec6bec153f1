//! Redirect instructions produced by the authorization endpoint.
//!
//! The engine never performs the redirect itself; the transport turns a
//! [`Redirect`] into a `302 Found` with a `Location` header.

use url::Url;
use url::form_urlencoded;

/// Where response parameters travel on the redirect URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Query component (authorization code flow).
    Query,
    /// Fragment component (implicit flow).
    Fragment,
}

/// A redirect target for the user agent.
#[derive(Clone, PartialEq, Eq)]
pub struct Redirect {
    location: Url,
    delivery: Delivery,
}

impl Redirect {
    /// Append `params` to `base` in the component chosen by `delivery`.
    ///
    /// Existing query parameters on `base` are kept; an existing fragment is replaced.
    pub(crate) fn build<'a>(
        base: &Url,
        delivery: Delivery,
        params: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut location = base.clone();
        match delivery {
            Delivery::Query => {
                location.query_pairs_mut().extend_pairs(params);
            }
            Delivery::Fragment => {
                let fragment = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params)
                    .finish();
                location.set_fragment(Some(&fragment));
            }
        }
        Self { location, delivery }
    }

    /// Value for the `Location` header.
    #[must_use]
    pub fn location(&self) -> &str {
        self.location.as_str()
    }

    #[must_use]
    pub const fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Look up a response parameter carried by this redirect.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        let encoded = match self.delivery {
            Delivery::Query => self.location.query(),
            Delivery::Fragment => self.location.fragment(),
        }?;
        form_urlencoded::parse(encoded.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

// Locations carry codes and tokens.
impl std::fmt::Debug for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut target = self.location.clone();
        target.set_query(None);
        target.set_fragment(None);
        f.debug_struct("Redirect")
            .field("target", &target.as_str())
            .field("delivery", &self.delivery)
            .finish()
    }
}
