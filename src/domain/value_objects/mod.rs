//! Value Objects for the redirect layer

use std::fmt;

/// Path the gateway navigates back to once the payment settles.
pub const CALLBACK_PATH: &str = "/api/onepay/callback";

/// Decides whether a navigation target belongs to the payment gateway.
///
/// Matching is a case-sensitive substring check against a small token set.
/// Keep the set narrow: a loose token redirects unrelated navigations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayPolicy { tokens: Vec<String> }

impl GatewayPolicy {
    pub fn new<I, S>(tokens: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() { return Err(PolicyError::Empty); }
        if tokens.iter().any(|t| t.trim().is_empty()) { return Err(PolicyError::BlankToken); }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] { &self.tokens }

    pub fn is_gateway_target(&self, url: &str) -> bool {
        self.tokens.iter().any(|token| url.contains(token.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PolicyError { Empty, BlankToken }
impl std::error::Error for PolicyError {}
impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "no gateway tokens"), Self::BlankToken => write!(f, "blank gateway token") }
    }
}

/// Post-payment navigation target handed to the widget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackUrl(String);

impl CallbackUrl {
    pub fn from_origin(origin: &str) -> Self {
        Self(format!("{}{}", origin.trim().trim_end_matches('/'), CALLBACK_PATH))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CallbackUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
