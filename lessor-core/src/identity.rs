//! Delegated trust.
//!
//! At lease creation the requester's roles on their project are delegated to
//! the manager's service identity. When a lifecycle action runs later, the
//! trust is redeemed for a fresh context scoped to that project and those
//! roles, without needing the requester's original session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::context::RequestContext;
use crate::error::IdentityError;

/// Parameters for minting a trust
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRequest {
    pub trustor_user_id: String,
    pub trustee_user_id: String,
    pub project_id: String,
    pub roles: Vec<String>,
    /// Always false here: the trustee acts as itself, scoped to the trustor's project
    pub impersonation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trust {
    pub id: String,
    pub trustor_user_id: String,
    pub trustee_user_id: String,
    pub project_id: String,
    pub roles: Vec<String>,
    pub impersonation: bool,
}

/// Client for the external identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Mint a trust. `ctx` is the trustor's own, still-valid context.
    async fn create_trust(
        &self,
        ctx: &RequestContext,
        request: TrustRequest,
    ) -> Result<Trust, IdentityError>;

    /// Authenticate as the trustee and return a context scoped by the trust.
    async fn redeem_trust(&self, trust_id: &str) -> Result<RequestContext, IdentityError>;

    async fn delete_trust(&self, trust_id: &str) -> Result<(), IdentityError>;
}

/// Issues and redeems trusts for one fixed service identity.
#[derive(Clone)]
pub struct Delegation {
    provider: Arc<dyn IdentityProvider>,
    service_user_id: String,
}

impl Delegation {
    pub fn new(provider: Arc<dyn IdentityProvider>, service_user_id: impl Into<String>) -> Self {
        Self {
            provider,
            service_user_id: service_user_id.into(),
        }
    }

    /// Delegate the caller's roles on their project to the service identity.
    pub async fn issue(&self, ctx: &RequestContext) -> Result<Trust, IdentityError> {
        let trustor_user_id = ctx
            .user_id
            .clone()
            .ok_or_else(|| IdentityError::Unauthorized("caller has no user id".into()))?;
        let project_id = ctx
            .project_id
            .clone()
            .ok_or_else(|| IdentityError::Unauthorized("caller has no project".into()))?;

        let request = TrustRequest {
            trustor_user_id,
            trustee_user_id: self.service_user_id.clone(),
            project_id,
            roles: ctx.roles.clone(),
            impersonation: false,
        };
        let trust = self.provider.create_trust(ctx, request).await?;
        tracing::debug!(trust_id = %trust.id, trustor = %trust.trustor_user_id, "Trust issued");
        Ok(trust)
    }

    pub async fn redeem(&self, trust_id: &str) -> Result<RequestContext, IdentityError> {
        self.provider.redeem_trust(trust_id).await
    }

    pub async fn revoke(&self, trust_id: &str) -> Result<(), IdentityError> {
        self.provider.delete_trust(trust_id).await
    }
}

/// In-process identity provider.
///
/// Keeps trusts in memory and hands out random tokens on redemption. Suitable
/// for single-node runs and tests; it has no notion of passwords.
#[derive(Default)]
pub struct LocalIdentityProvider {
    trusts: Mutex<HashMap<String, Trust>>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Trust>>, IdentityError> {
        self.trusts
            .lock()
            .map_err(|_| IdentityError::Backend("trust table poisoned".into()))
    }

    pub fn trust_count(&self) -> usize {
        self.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn create_trust(
        &self,
        ctx: &RequestContext,
        request: TrustRequest,
    ) -> Result<Trust, IdentityError> {
        if ctx.user_id.as_deref() != Some(request.trustor_user_id.as_str()) {
            return Err(IdentityError::Unauthorized(
                "only the trustor may delegate its roles".into(),
            ));
        }
        if let Some(missing) = request.roles.iter().find(|r| !ctx.roles.contains(r)) {
            return Err(IdentityError::Unauthorized(format!(
                "caller does not hold role '{}'",
                missing
            )));
        }

        let trust = Trust {
            id: nanoid::nanoid!(),
            trustor_user_id: request.trustor_user_id,
            trustee_user_id: request.trustee_user_id,
            project_id: request.project_id,
            roles: request.roles,
            impersonation: request.impersonation,
        };
        self.lock()?.insert(trust.id.clone(), trust.clone());
        Ok(trust)
    }

    async fn redeem_trust(&self, trust_id: &str) -> Result<RequestContext, IdentityError> {
        let trust = self
            .lock()?
            .get(trust_id)
            .cloned()
            .ok_or_else(|| IdentityError::TrustNotFound(trust_id.to_string()))?;

        Ok(RequestContext {
            user_id: Some(trust.trustee_user_id),
            user_name: None,
            project_id: Some(trust.project_id),
            project_name: None,
            auth_token: Some(nanoid::nanoid!(32)),
            service_catalog: Vec::new(),
            roles: trust.roles,
            trust_id: Some(trust.id),
            trustor_user_id: Some(trust.trustor_user_id),
        })
    }

    async fn delete_trust(&self, trust_id: &str) -> Result<(), IdentityError> {
        self.lock()?
            .remove(trust_id)
            .map(|_| ())
            .ok_or_else(|| IdentityError::TrustNotFound(trust_id.to_string()))
    }
}
