/// Credential collaborator for outgoing requests.
///
/// The repository attaches the anti-forgery pair to every mutating
/// request; the bearer credential is for session-level calls (logout and
/// the like) owned by the caller.
pub trait AuthProvider: Send + Sync {
    fn antiforgery_header(&self) -> Option<(String, String)>;
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed credentials, for tests and single-user tools.
#[derive(Clone, Debug, Default)]
pub struct StaticAuth {
    pub antiforgery: Option<(String, String)>,
    pub bearer: Option<String>,
}

impl AuthProvider for StaticAuth {
    fn antiforgery_header(&self) -> Option<(String, String)> {
        self.antiforgery.clone()
    }

    fn bearer_token(&self) -> Option<String> {
        self.bearer.clone()
    }
}
