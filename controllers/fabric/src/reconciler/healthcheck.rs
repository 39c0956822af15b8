//! Periodic database health verification.
//!
//! A second control loop over the same Configuration object: once the
//! managed objects are deployed it locates the northbound and southbound
//! leader pods, runs the cluster-status probes inside them and folds the
//! results into conditions. Probe failures are recorded, never fatal, so a
//! sick database shows up in status instead of crashing the loop.

use chrono::Utc;
use kube::{Resource as _, ResourceExt};
use kube::api::{Patch, PatchParams};
use kube_runtime::controller::Action;
use tracing::{info, warn};

use super::Context;
use crate::error::ControllerError;
use fabric_api::{
    Condition, ConditionStatus, Configuration, ConfigurationState, NB_DB_HEALTH_CONDITION,
    NB_LEADER_FOUND_CONDITION, NB_LEADER_LABEL, REASON_DB_HEALTH, REASON_LEADER_FOUND,
    REASON_LEADER_NOT_FOUND, SB_DB_HEALTH_CONDITION, SB_LEADER_FOUND_CONDITION, SB_LEADER_LABEL,
};
use fabric_render::{NB_HEALTH_PROBE, SB_HEALTH_PROBE};

/// True when the gate condition is old enough for another probe round.
/// A missing condition means no probe has ever run.
pub(crate) fn check_needed(
    gate: Option<&Condition>,
    interval: std::time::Duration,
    now: chrono::DateTime<Utc>,
) -> bool {
    match gate {
        Some(condition) => {
            let elapsed = now.signed_duration_since(condition.last_transition_time);
            elapsed.to_std().is_ok_and(|e| e >= interval)
        }
        None => true,
    }
}

impl Context {
    /// Runs one health-check pass over the Configuration.
    pub async fn reconcile_healthcheck(
        &self,
        original: &Configuration,
    ) -> Result<Action, ControllerError> {
        if original.meta().deletion_timestamp.is_some() {
            info!("configuration being deleted, no further healthchecks needed");
            return Ok(Action::await_change());
        }
        if original.state() != ConfigurationState::Deployed {
            info!("waiting for resources to be deployed");
            return Ok(Action::await_change());
        }

        let mut config = original.clone();
        self.probe_databases(&mut config).await?;

        // only conditions belong to this loop; everything else is owned by
        // the configuration reconciler
        let original_conditions = original.status.as_ref().map(|s| s.conditions.as_slice());
        let updated_conditions = config.status.as_ref().map(|s| s.conditions.as_slice());
        if original_conditions != updated_conditions {
            let patch = serde_json::json!({
                "metadata": { "resourceVersion": original.resource_version() },
                "status": { "conditions": updated_conditions },
            });
            self.configurations()
                .patch_status(
                    &original.name_any(),
                    &PatchParams::default(),
                    &Patch::Merge(&patch),
                )
                .await?;
        }
        Ok(Action::requeue(self.healthcheck_interval))
    }

    /// Locates the leaders and probes both databases, recording outcomes as
    /// conditions.
    async fn probe_databases(&self, config: &mut Configuration) -> Result<(), ControllerError> {
        if !check_needed(
            config.lookup_condition(NB_LEADER_FOUND_CONDITION),
            self.healthcheck_interval,
            Utc::now(),
        ) {
            info!("healthcheck interval has not elapsed, skipping");
            return Ok(());
        }
        info!("performing database healthcheck");

        let nb_leader = self.leader_pod(NB_LEADER_LABEL).await;
        match &nb_leader {
            Ok(pod) => config.set_condition(
                NB_LEADER_FOUND_CONDITION,
                ConditionStatus::True,
                format!("northbound leader found {}", pod.name_any()),
                REASON_LEADER_FOUND,
            ),
            Err(_) => config.set_condition(
                NB_LEADER_FOUND_CONDITION,
                ConditionStatus::False,
                "no pods matching northbound leader label requirements found",
                REASON_LEADER_NOT_FOUND,
            ),
        }

        let sb_leader = self.leader_pod(SB_LEADER_LABEL).await;
        match &sb_leader {
            Ok(pod) => config.set_condition(
                SB_LEADER_FOUND_CONDITION,
                ConditionStatus::True,
                format!("southbound leader found {}", pod.name_any()),
                REASON_LEADER_FOUND,
            ),
            Err(_) => config.set_condition(
                SB_LEADER_FOUND_CONDITION,
                ConditionStatus::False,
                "no pods matching southbound leader label requirements found",
                REASON_LEADER_NOT_FOUND,
            ),
        }

        if nb_leader.is_ok() {
            match self.execute_on_leader(NB_LEADER_LABEL, NB_HEALTH_PROBE).await {
                Ok(output) => config.set_condition(
                    NB_DB_HEALTH_CONDITION,
                    ConditionStatus::True,
                    output,
                    REASON_DB_HEALTH,
                ),
                Err(e) => {
                    warn!(error = %e, "northbound database probe failed");
                    config.set_condition(
                        NB_DB_HEALTH_CONDITION,
                        ConditionStatus::False,
                        e.to_string(),
                        REASON_DB_HEALTH,
                    );
                }
            }
        }

        if sb_leader.is_ok() {
            match self.execute_on_leader(SB_LEADER_LABEL, SB_HEALTH_PROBE).await {
                Ok(output) => config.set_condition(
                    SB_DB_HEALTH_CONDITION,
                    ConditionStatus::True,
                    output,
                    REASON_DB_HEALTH,
                ),
                Err(e) => {
                    warn!(error = %e, "southbound database probe failed");
                    config.set_condition(
                        SB_DB_HEALTH_CONDITION,
                        ConditionStatus::False,
                        e.to_string(),
                        REASON_DB_HEALTH,
                    );
                }
            }
        }
        Ok(())
    }
}
