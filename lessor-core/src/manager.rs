//! Manager facade: turns lease requests into store mutations and scheduled
//! events. Every operation takes the caller's context explicitly.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::actions::{ActionTable, PluginRegistry};
use crate::config::ManagerConfig;
use crate::context::{self, RequestContext};
use crate::error::{ConfigError, IdentityError, ManagerError, ManagerResult};
use crate::identity::{Delegation, IdentityProvider};
use crate::infrastructure::SharedStore;
use crate::plugin::{PluginCatalog, PluginInfo};
use crate::scheduler::EventScheduler;
use crate::types::{EventType, Lease, LeaseUpdate, ReservationRequest, ReservationStatus};

/// Accepted format for lease dates (UTC)
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLeaseRequest {
    pub name: String,
    /// `"now"` or [`DATE_FORMAT`]
    pub start_date: String,
    /// [`DATE_FORMAT`]
    pub end_date: String,
    #[serde(default)]
    pub reservations: Vec<ReservationRequest>,
}

/// Only renaming and prolonging are allowed on an existing lease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLeaseRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Seconds to add to the end date
    #[serde(default)]
    pub prolong_for: Option<i64>,
}

impl UpdateLeaseRequest {
    pub fn from_json(value: serde_json::Value) -> ManagerResult<Self> {
        serde_json::from_value(value).map_err(|_| {
            ManagerError::validation("Only name changing and prolonging may be proceeded.")
        })
    }
}

fn parse_date(field: &str, raw: &str) -> ManagerResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .map(|d| d.and_utc())
        .map_err(|_| {
            ManagerError::validation(format!(
                "{} '{}' does not match format '{}'",
                field, raw, DATE_FORMAT
            ))
        })
}

/// Parse and check a lease interval; `start_date` may be `"now"`.
pub fn resolve_interval(
    start_date: &str,
    end_date: &str,
    now: DateTime<Utc>,
) -> ManagerResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start = if start_date == "now" {
        now
    } else {
        parse_date("start_date", start_date)?
    };
    let end = parse_date("end_date", end_date)?;

    if end <= start {
        return Err(ManagerError::validation(format!(
            "end_date {} must be later than start_date {}",
            end, start
        )));
    }
    Ok((start, end))
}

#[derive(Clone)]
pub struct ManagerService {
    store: SharedStore,
    registry: Arc<PluginRegistry>,
    actions: Arc<ActionTable>,
    delegation: Delegation,
}

impl ManagerService {
    pub fn new(
        store: SharedStore,
        registry: Arc<PluginRegistry>,
        actions: Arc<ActionTable>,
        delegation: Delegation,
    ) -> Self {
        Self {
            store,
            registry,
            actions,
            delegation,
        }
    }

    /// Load plugins and actions from `config`. Fails on any configuration
    /// mismatch instead of starting with a partial table.
    pub fn from_config(
        config: &ManagerConfig,
        catalog: &PluginCatalog,
        store: SharedStore,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        let (registry, actions) = ActionTable::from_config(catalog, config)?;
        if registry.is_empty() {
            tracing::warn!("No resource plugins loaded, every reservation will be rejected");
        } else {
            tracing::info!(plugins = registry.len(), "Resource plugins ready");
        }
        Ok(Self::new(
            store,
            Arc::new(registry),
            Arc::new(actions),
            Delegation::new(identity, config.service_user_id.clone()),
        ))
    }

    /// A scheduler sharing this service's store, actions and delegation
    pub fn scheduler(&self, period: Duration) -> EventScheduler {
        EventScheduler::new(
            self.store.clone(),
            Arc::clone(&self.actions),
            self.delegation.clone(),
            period,
        )
    }

    pub fn actions(&self) -> &Arc<ActionTable> {
        &self.actions
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.registry.infos()
    }

    fn visible(ctx: &RequestContext, lease: &Lease) -> bool {
        ctx.is_admin() || ctx.project_id.as_deref() == Some(lease.project_id.as_str())
    }

    pub async fn get_lease(&self, ctx: &RequestContext, lease_id: &str) -> ManagerResult<Lease> {
        self.store
            .lock()
            .await
            .get_lease(lease_id)?
            .filter(|lease| Self::visible(ctx, lease))
            .ok_or_else(|| ManagerError::not_found("lease", lease_id))
    }

    /// Leases of the caller's project; all leases for admins.
    pub async fn list_leases(&self, ctx: &RequestContext) -> ManagerResult<Vec<Lease>> {
        let project = if ctx.is_admin() {
            None
        } else {
            Some(ctx.project_id.as_deref().ok_or_else(|| {
                IdentityError::Unauthorized("caller has no project".into())
            })?)
        };
        Ok(self.store.lock().await.list_leases(project)?)
    }

    pub async fn create_lease(
        &self,
        ctx: &RequestContext,
        request: CreateLeaseRequest,
    ) -> ManagerResult<Lease> {
        self.create_lease_at(ctx, request, Utc::now()).await
    }

    /// Create a lease with `now` standing in for `"now"`.
    ///
    /// Everything is validated before the trust is minted; nothing is
    /// persisted unless the whole request is valid.
    pub async fn create_lease_at(
        &self,
        ctx: &RequestContext,
        request: CreateLeaseRequest,
        now: DateTime<Utc>,
    ) -> ManagerResult<Lease> {
        let (start_date, end_date) = resolve_interval(&request.start_date, &request.end_date, now)?;
        if let Some(r) = request
            .reservations
            .iter()
            .find(|r| !self.actions.supports(&r.resource_type))
        {
            return Err(ManagerError::validation(format!(
                "resource type '{}' is not supported",
                r.resource_type
            )));
        }

        let trust = self.delegation.issue(ctx).await?;
        let lease = Lease::new(
            request.name,
            trust.trustor_user_id.clone(),
            trust.project_id.clone(),
            start_date,
            end_date,
            trust.id.clone(),
            request.reservations,
        );

        let created = self.store.lock().await.create_lease(lease);
        match created {
            Ok(lease) => {
                tracing::info!(
                    lease_id = %lease.id,
                    project_id = %lease.project_id,
                    start = %lease.start_date,
                    end = %lease.end_date,
                    reservations = lease.reservations.len(),
                    "Lease created"
                );
                Ok(lease)
            }
            Err(e) => {
                if let Err(revoke) = self.delegation.revoke(&trust.id).await {
                    tracing::warn!(trust_id = %trust.id, error = %revoke, "Failed to delete trust of unsaved lease");
                }
                Err(e.into())
            }
        }
    }

    /// Rename and/or prolong a lease.
    ///
    /// Prolonging moves both the lease's end date and its `end_lease` event,
    /// and only while that event is still `UNDONE`. `prolong_for: 0` leaves
    /// the end date alone. The lease is read and written under one store lock
    /// so concurrent prolongs add up.
    pub async fn update_lease(
        &self,
        ctx: &RequestContext,
        lease_id: &str,
        request: UpdateLeaseRequest,
    ) -> ManagerResult<Lease> {
        let mut store = self.store.lock().await;
        let lease = store
            .get_lease(lease_id)?
            .filter(|lease| Self::visible(ctx, lease))
            .ok_or_else(|| ManagerError::not_found("lease", lease_id))?;
        let mut update = LeaseUpdate {
            name: request.name,
            end_date: None,
        };

        match request.prolong_for {
            None | Some(0) => {}
            Some(seconds) if seconds < 0 => {
                return Err(ManagerError::validation("prolong_for must not be negative"));
            }
            Some(seconds) => {
                let end_event = lease
                    .event(&EventType::EndLease)
                    .ok_or_else(|| ManagerError::not_found("end_lease event", lease_id))?;
                let delta = TimeDelta::try_seconds(seconds)
                    .ok_or_else(|| ManagerError::validation("prolong_for is out of range"))?;
                let new_end = lease
                    .end_date
                    .checked_add_signed(delta)
                    .ok_or_else(|| ManagerError::validation("prolong_for is out of range"))?;

                if !store.reschedule_event(&end_event.id, new_end)? {
                    return Err(ManagerError::validation(format!(
                        "lease '{}' has already ended and cannot be prolonged",
                        lease_id
                    )));
                }
                update.end_date = Some(new_end);
            }
        }

        if update == LeaseUpdate::default() {
            return Ok(lease);
        }
        let updated = store.update_lease(lease_id, update)?;
        tracing::info!(lease_id, end = %updated.end_date, "Lease updated");
        Ok(updated)
    }

    /// Tear down every remaining reservation, then drop the lease and its trust.
    ///
    /// Runs the plugins' `delete` directly instead of queueing an event. If a
    /// teardown fails the lease is kept.
    pub async fn delete_lease(&self, ctx: &RequestContext, lease_id: &str) -> ManagerResult<()> {
        let lease = self.get_lease(ctx, lease_id).await?;
        let trusted = self.delegation.redeem(&lease.trust_id).await?;

        context::scope(trusted.clone(), self.teardown(&lease, &trusted)).await?;

        self.store.lock().await.destroy_lease(lease_id)?;
        if let Err(e) = self.delegation.revoke(&lease.trust_id).await {
            tracing::warn!(lease_id, trust_id = %lease.trust_id, error = %e, "Failed to delete trust");
        }
        tracing::info!(lease_id, "Lease deleted");
        Ok(())
    }

    /// Run each plugin's `delete`. Reservations the scheduler already marked
    /// deleted are skipped; statuses are left to the scheduler.
    async fn teardown(&self, lease: &Lease, ctx: &RequestContext) -> ManagerResult<()> {
        for reservation in &lease.reservations {
            if reservation.status == ReservationStatus::Deleted {
                continue;
            }
            let action = self.actions.teardown(&reservation.resource_type).ok_or_else(|| {
                ManagerError::HandlerFailure(format!(
                    "no teardown action for resource type '{}'",
                    reservation.resource_type
                ))
            })?;

            action.invoke(&reservation.resource_id, ctx).await.map_err(|e| {
                tracing::error!(
                    lease_id = %lease.id,
                    reservation_id = %reservation.id,
                    plugin = action.plugin_name(),
                    error = %e,
                    "Teardown failed"
                );
                ManagerError::from(e)
            })?;
        }
        Ok(())
    }
}
