use serde::Deserialize;

/// Token pair returned by login and refresh.
///
/// Login replies in camelCase and refresh in snake_case; both decode here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthTokens {
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: String,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

impl AuthTokens {
    /// The refresh token, treating an empty string as absent
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}
