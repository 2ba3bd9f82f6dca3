//! Access policy guard.
//!
//! Every pipeline operation passes through [`AccessPolicy`]. The token is
//! verified on each call and its scopes are checked against the owner of the
//! asset being touched; nothing is cached between requests.

use tracing::debug;

use super::scope::{Operation, Scope};
use super::token::TokenService;
use crate::error::PolicyDenial;

/// The verified identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub scopes: Vec<Scope>,
}

/// Authorizes token holders against asset owners.
#[derive(Clone, Debug)]
pub struct AccessPolicy {
    tokens: TokenService,
}

impl AccessPolicy {
    pub fn new(tokens: TokenService) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verify a bearer token and return the principal it names.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Principal, PolicyDenial> {
        let token = token.ok_or(PolicyDenial::Unauthenticated)?;
        let claims = self.tokens.verify(token).map_err(|e| {
            debug!(error = %e, "Token verification failed");
            PolicyDenial::from(e)
        })?;

        Ok(Principal {
            subject: claims.sub,
            scopes: claims.scopes,
        })
    }

    /// Check an authenticated principal against an asset owner.
    ///
    /// Writes and deletes are only ever allowed on the principal's own
    /// assets. Reads need `read` or `read:*` for own assets, and `read:*` or
    /// `read:<owner>` for anyone else's. A principal holding no scope for the
    /// operation at all is refused with `ScopeInsufficient`, one holding a
    /// scope that does not reach this owner with `NotOwner`.
    pub fn permit(
        &self,
        principal: &Principal,
        asset_owner: &str,
        op: Operation,
    ) -> Result<(), PolicyDenial> {
        let own = principal.scopes.iter().any(|s| s.grants(op));
        let reads_owner = op == Operation::Read
            && principal
                .scopes
                .iter()
                .any(|s| s.grants_cross_owner_read(asset_owner));

        if reads_owner || (own && principal.subject == asset_owner) {
            return Ok(());
        }

        let holds_scope =
            own || (op == Operation::Read && principal.scopes.iter().any(Scope::is_read));
        if holds_scope && principal.subject != asset_owner {
            Err(PolicyDenial::NotOwner)
        } else {
            Err(PolicyDenial::ScopeInsufficient(op))
        }
    }

    /// Verify the token and check it against the asset owner in one step.
    pub fn authorize(
        &self,
        token: Option<&str>,
        asset_owner: &str,
        op: Operation,
    ) -> Result<Principal, PolicyDenial> {
        let principal = self.authenticate(token)?;
        self.permit(&principal, asset_owner, op)?;
        Ok(principal)
    }
}
