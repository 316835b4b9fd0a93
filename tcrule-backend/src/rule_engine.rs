//! Rule engine: listing, Set, Delete, Reset and orphan cleanup.
//!
//! Every operation starts from a fresh read of the control plane; nothing is
//! cached between calls. Mutations are issued one command at a time and a
//! failure part-way leaves earlier steps in place. Since qdisc and filter
//! replacement are idempotent, repeating a failed Set converges.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tcrule_backend::context::TcContext;
//! use tcrule_backend::rule_engine::RuleEngine;
//! use tcrule_shared::RuleSpec;
//!
//! async fn slow_down_dns() -> anyhow::Result<()> {
//!     let engine = RuleEngine::new(TcContext::system());
//!     let spec = RuleSpec::on("eth0").dst_port(53).latency_ms(200);
//!     engine.set_rule(&spec).await?;
//!     println!("{:#?}", engine.list_rules().await?.rules);
//!     Ok(())
//! }
//! ```

use tcrule_shared::errors::{BackendResult, TcruleError};
use tcrule_shared::{Filter, MatchPredicates, Rule, RuleSnapshot, RuleSpec, TcValidate};
use tracing::{debug, info, instrument, warn};

use crate::bootstrap;
use crate::commands::{FilterAddress, TcCommand};
use crate::context::TcContext;
use crate::flow_id::{self, FlowAllocation};
use crate::interfaces::without_loopback;
use crate::rule_joiner;
use crate::tc_state::StateReader;
use tcrule_shared::LOOPBACK;

/// How Set handled the classifier on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// A classifier with the same selectors existed and now points at the flow.
    Retargeted { handle: String },
    Added,
}

/// What Set did on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    pub interface: String,
    pub flow_id: String,
    pub qdisc_handle: String,
    /// The shaping qdisc already existed with this exact profile.
    pub reused_profile: bool,
    pub filter: FilterAction,
}

/// What Delete did on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub interface: String,
    /// Handle of the removed classifier; `None` when nothing matched.
    pub filter_handle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuleEngine {
    ctx: TcContext,
}

impl RuleEngine {
    pub fn new(ctx: TcContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TcContext {
        &self.ctx
    }

    fn reader(&self) -> StateReader<'_> {
        StateReader::new(&self.ctx)
    }

    /// Devices rules can be iterated over (loopback excluded).
    #[instrument(skip(self), fields(namespace = ?self.ctx.namespace()))]
    pub async fn list_interfaces(&self) -> BackendResult<Vec<String>> {
        let all = self.reader().list_interfaces().await?;
        Ok(without_loopback(&all))
    }

    /// Full listing: devices, raw qdiscs and filters, and joined rules.
    #[instrument(skip(self), fields(namespace = ?self.ctx.namespace()))]
    pub async fn list_rules(&self) -> BackendResult<RuleSnapshot> {
        let interfaces = self.list_interfaces().await?;
        self.snapshot(interfaces).await
    }

    /// Read filters for `interfaces` and every qdisc, then join.
    async fn snapshot(&self, interfaces: Vec<String>) -> BackendResult<RuleSnapshot> {
        let reader = self.reader();
        let mut filters = Vec::new();
        for interface in &interfaces {
            filters.extend(reader.list_filters(interface).await?);
        }
        let qdiscs = reader.list_qdiscs().await?;
        let rules = rule_joiner::join(&filters, &qdiscs);
        debug!(
            "Snapshot: {} interfaces, {} qdiscs, {} filters, {} rules",
            interfaces.len(),
            qdiscs.len(),
            filters.len(),
            rules.len()
        );
        Ok(RuleSnapshot {
            interfaces,
            qdiscs,
            filters,
            rules,
        })
    }

    /// Targets of a request plus the devices a snapshot must cover. An
    /// explicit device is checked against the full list, loopback included.
    async fn resolve_targets(
        &self,
        interface: Option<&str>,
    ) -> BackendResult<(Vec<String>, Vec<String>)> {
        let all = self.reader().list_interfaces().await?;
        let mut scope = without_loopback(&all);
        let targets = match interface {
            Some(name) => {
                if !all.iter().any(|i| i == name) {
                    return Err(TcruleError::UnknownInterface {
                        interface: name.to_string(),
                    });
                }
                if name == LOOPBACK {
                    scope.push(name.to_string());
                }
                vec![name.to_string()]
            }
            None => scope.clone(),
        };
        Ok((targets, scope))
    }

    /// Install the priority root wherever it is missing.
    #[instrument(skip(self), fields(namespace = ?self.ctx.namespace()))]
    pub async fn bootstrap(&self) -> BackendResult<Vec<String>> {
        let interfaces = self.list_interfaces().await?;
        let qdiscs = self.reader().list_qdiscs().await?;
        bootstrap::ensure_roots(&self.ctx, &qdiscs, &interfaces).await
    }

    /// Create or update a rule on one device, or on every device.
    #[instrument(skip(self, spec), fields(interface = ?spec.interface, namespace = ?self.ctx.namespace()))]
    pub async fn set_rule(&self, spec: &RuleSpec) -> BackendResult<Vec<SetOutcome>> {
        spec.validate()?;
        let predicates = normalize(&spec.predicates);
        let (targets, scope) = self.resolve_targets(spec.interface.as_deref()).await?;

        let mut snapshot = self.snapshot(scope.clone()).await?;
        let installed = bootstrap::ensure_roots(&self.ctx, &snapshot.qdiscs, &scope).await?;
        if !installed.is_empty() {
            snapshot = self.snapshot(scope).await?;
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for interface in &targets {
            outcomes.push(self.set_on(&snapshot, interface, &predicates, spec).await?);
        }

        self.sweep_orphans(spec.interface.as_deref()).await?;
        Ok(outcomes)
    }

    async fn set_on(
        &self,
        snapshot: &RuleSnapshot,
        interface: &str,
        predicates: &MatchPredicates,
        spec: &RuleSpec,
    ) -> BackendResult<SetOutcome> {
        let reusable = snapshot
            .rules_on(interface)
            .find(|r| r.has_qdisc() && r.profile == spec.profile)
            .and_then(|r| {
                Some(FlowAllocation {
                    flow_id: r.flow_id.clone()?,
                    qdisc_handle: r.qdisc_handle.clone()?,
                })
            });
        let reused_profile = reusable.is_some();
        let allocation = match reusable {
            Some(existing) => existing,
            None => flow_id::allocate(&snapshot.rules, interface)?,
        };

        self.ctx
            .run(&TcCommand::replace_shaping(
                interface,
                &allocation.flow_id,
                &allocation.qdisc_handle,
                &spec.profile,
            )?)
            .await?;

        let existing = find_classifier(snapshot.filters_on(interface), predicates)
            .and_then(FilterAddress::of);
        let filter = match existing {
            Some(address) => {
                self.ctx
                    .run(&TcCommand::retarget_filter(
                        interface,
                        &address,
                        &allocation.flow_id,
                    )?)
                    .await?;
                FilterAction::Retargeted {
                    handle: address.handle,
                }
            }
            None => {
                self.ctx
                    .run(&TcCommand::add_filter(
                        interface,
                        predicates,
                        &allocation.flow_id,
                    )?)
                    .await?;
                FilterAction::Added
            }
        };

        info!(
            "{}: {} -> flow {} (qdisc {}, {})",
            interface, predicates, allocation.flow_id, allocation.qdisc_handle, spec.profile
        );
        Ok(SetOutcome {
            interface: interface.to_string(),
            flow_id: allocation.flow_id,
            qdisc_handle: allocation.qdisc_handle,
            reused_profile,
            filter,
        })
    }

    /// Remove the first classifier whose selectors equal the request's, per
    /// device, then drop shaping qdiscs nothing feeds any more.
    #[instrument(skip(self, spec), fields(interface = ?spec.interface, namespace = ?self.ctx.namespace()))]
    pub async fn delete_rule(&self, spec: &RuleSpec) -> BackendResult<Vec<DeleteOutcome>> {
        spec.validate()?;
        let predicates = normalize(&spec.predicates);
        let (targets, scope) = self.resolve_targets(spec.interface.as_deref()).await?;
        let snapshot = self.snapshot(scope).await?;

        let mut outcomes = Vec::with_capacity(targets.len());
        for interface in &targets {
            let address = find_classifier(snapshot.filters_on(interface), &predicates)
                .and_then(FilterAddress::of);
            let filter_handle = match address {
                Some(address) => {
                    self.ctx
                        .run(&TcCommand::delete_filter(interface, &address)?)
                        .await?;
                    info!("{}: removed classifier {} ({})", interface, address.handle, predicates);
                    Some(address.handle)
                }
                None => {
                    info!("{}: no classifier matches {}", interface, predicates);
                    None
                }
            };
            outcomes.push(DeleteOutcome {
                interface: interface.clone(),
                filter_handle,
            });
        }

        self.sweep_orphans(spec.interface.as_deref()).await?;
        Ok(outcomes)
    }

    /// Remove the root qdisc (and everything under it). Failures are logged
    /// and otherwise ignored: an absent root is already the desired state.
    #[instrument(skip(self), fields(namespace = ?self.ctx.namespace()))]
    pub async fn reset(&self, interface: Option<&str>) -> BackendResult<()> {
        let targets = match interface {
            Some(name) => vec![name.to_string()],
            None => self.list_interfaces().await?,
        };
        for target in &targets {
            let command = TcCommand::delete_root(target)?;
            match self.ctx.run(&command).await {
                Ok(_) => info!("{}: root qdisc removed", target),
                Err(e) => warn!("{}: reset ignored failure: {}", target, e),
            }
        }
        Ok(())
    }

    /// Post-mutation sweep over every device. Loopback is only swept when it
    /// was the explicit target.
    async fn sweep_orphans(&self, target: Option<&str>) -> BackendResult<()> {
        self.cleanup_orphans(None).await?;
        if target == Some(LOOPBACK) {
            self.cleanup_orphans(Some(LOOPBACK)).await?;
        }
        Ok(())
    }

    /// Delete every shaping qdisc no classifier feeds. With an interface,
    /// only that device is examined.
    #[instrument(skip(self), fields(namespace = ?self.ctx.namespace()))]
    pub async fn cleanup_orphans(&self, interface: Option<&str>) -> BackendResult<Vec<Rule>> {
        let mut scope = self.list_interfaces().await?;
        if let Some(name) = interface
            && !scope.iter().any(|i| i == name)
        {
            scope.push(name.to_string());
        }
        let snapshot = self.snapshot(scope).await?;

        let mut removed = Vec::new();
        for rule in &snapshot.rules {
            // Devices whose filters were not read cannot be judged.
            let in_scope = match interface {
                Some(name) => rule.interface == name,
                None => snapshot.interfaces.contains(&rule.interface),
            };
            if rule.has_filter() || !in_scope {
                continue;
            }
            let (Some(flow_id), Some(handle)) = (&rule.flow_id, &rule.qdisc_handle) else {
                continue;
            };
            self.ctx
                .run(&TcCommand::delete_child_qdisc(&rule.interface, flow_id, handle)?)
                .await?;
            info!("{}: removed orphan qdisc {} under {}", rule.interface, handle, flow_id);
            removed.push(rule.clone());
        }
        Ok(removed)
    }
}

/// First key-node classifier on the device with exactly these selectors.
fn find_classifier<'a>(
    filters: impl Iterator<Item = &'a Filter>,
    predicates: &MatchPredicates,
) -> Option<&'a Filter> {
    filters
        .filter(|f| f.is_classifier())
        .find(|f| f.predicates() == Some(predicates))
}

/// Clear host bits so a request compares equal to what `tc` reports back.
fn normalize(predicates: &MatchPredicates) -> MatchPredicates {
    MatchPredicates {
        src_ip: predicates.src_ip.map(|ip| ip.normalized()),
        dst_ip: predicates.dst_ip.map(|ip| ip.normalized()),
        ..predicates.clone()
    }
}
