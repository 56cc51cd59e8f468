// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quota field registry.
//!
//! Fields are declared once per scope type at startup through a
//! [`RegistryBuilder`]. [`RegistryBuilder::build`] validates aggregator
//! references, rejects cyclic aggregation and freezes the result into a
//! [`Registry`] that is shared read-only for the rest of the process.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::entity::Entity;
use crate::error::{QuotaError, Result};
use crate::fields::{AggregatorField, CounterField, FieldKind, QuotaField};
use crate::recalculation::RecalculationHook;

/// A quota field bound to its scope type and name.
#[derive(Debug)]
pub struct FieldDefinition {
    scope_type: String,
    name: String,
    field: QuotaField,
}

impl FieldDefinition {
    /// Scope type owning the field.
    pub fn scope_type(&self) -> &str {
        &self.scope_type
    }

    /// Field name, unique within the scope type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `scope_type.name`, used in logs and errors.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.scope_type, self.name)
    }

    /// The field declaration.
    pub fn field(&self) -> &QuotaField {
        &self.field
    }

    /// Whether the field applies to `scope`.
    pub fn is_applicable(&self, scope: &Entity) -> bool {
        scope.kind() == self.scope_type && self.field.is_connected_to(scope)
    }

    /// Default limit for a new record of this field on `scope`.
    pub fn default_limit_for(&self, scope: &Entity) -> Result<f64> {
        self.field.default_limit.evaluate(scope)
    }

    /// Counter/total settings, if this is a counter or total.
    pub fn as_counter(&self) -> Option<&CounterField> {
        match &self.field.kind {
            FieldKind::Counter(counter) => Some(counter),
            _ => None,
        }
    }

    /// Aggregator settings, if this is an aggregator.
    pub fn as_aggregator(&self) -> Option<&AggregatorField> {
        match &self.field.kind {
            FieldKind::Aggregator(aggregator) => Some(aggregator),
            _ => None,
        }
    }

    /// Name of the child quota read by this aggregator.
    fn child_key(&self) -> Option<(String, String)> {
        self.as_aggregator().map(|a| {
            (
                a.children.kind.clone(),
                a.child_field_name(&self.name).to_string(),
            )
        })
    }
}

/// Collects field declarations before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    fields: Vec<Arc<FieldDefinition>>,
    hooks: Vec<Arc<dyn RecalculationHook>>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `field` under `name` for `scope_type`.
    ///
    /// Fails with [`QuotaError::DuplicateField`] if the name is taken.
    pub fn add(
        &mut self,
        scope_type: &str,
        name: &str,
        field: impl Into<QuotaField>,
    ) -> Result<&mut Self> {
        if self
            .fields
            .iter()
            .any(|f| f.scope_type == scope_type && f.name == name)
        {
            return Err(QuotaError::DuplicateField {
                scope_type: scope_type.to_string(),
                name: name.to_string(),
            });
        }

        self.fields.push(Arc::new(FieldDefinition {
            scope_type: scope_type.to_string(),
            name: name.to_string(),
            field: field.into(),
        }));
        Ok(self)
    }

    /// Run `hook` at the end of every full recalculation.
    pub fn add_recalculation_hook(&mut self, hook: Arc<dyn RecalculationHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    /// Validate and freeze the registry.
    pub fn build(self) -> Result<Registry> {
        let index: HashMap<(String, String), Arc<FieldDefinition>> = self
            .fields
            .iter()
            .map(|f| ((f.scope_type.clone(), f.name.clone()), f.clone()))
            .collect();

        for def in &self.fields {
            if let Some((child_type, child_field)) = def.child_key()
                && !index.contains_key(&(child_type.clone(), child_field.clone()))
            {
                return Err(QuotaError::UnknownChildField {
                    scope_type: def.scope_type.clone(),
                    name: def.name.clone(),
                    child_type,
                    child_field,
                });
            }
        }

        let order = dependency_order(&self.fields, &index)?;

        let mut by_scope: HashMap<String, Vec<Arc<FieldDefinition>>> = HashMap::new();
        let mut scope_types = Vec::new();
        let mut counters_by_target: HashMap<String, Vec<Arc<FieldDefinition>>> = HashMap::new();
        let mut aggregators_by_child: HashMap<(String, String), Vec<Arc<FieldDefinition>>> =
            HashMap::new();
        let mut aggregators_by_child_kind: HashMap<String, Vec<Arc<FieldDefinition>>> =
            HashMap::new();

        for def in &self.fields {
            if !by_scope.contains_key(&def.scope_type) {
                scope_types.push(def.scope_type.clone());
            }
            by_scope
                .entry(def.scope_type.clone())
                .or_default()
                .push(def.clone());

            if let Some(counter) = def.as_counter() {
                for kind in &counter.target_kinds {
                    counters_by_target
                        .entry(kind.clone())
                        .or_default()
                        .push(def.clone());
                }
            }

            if let Some(key) = def.child_key() {
                aggregators_by_child_kind
                    .entry(key.0.clone())
                    .or_default()
                    .push(def.clone());
                aggregators_by_child.entry(key).or_default().push(def.clone());
            }
        }

        debug!(
            fields = self.fields.len(),
            scope_types = scope_types.len(),
            hooks = self.hooks.len(),
            "Quota registry built"
        );

        Ok(Registry {
            by_scope,
            scope_types,
            counters_by_target,
            aggregators_by_child,
            aggregators_by_child_kind,
            order,
            hooks: self.hooks,
        })
    }
}

/// Order fields so that every aggregator comes after the child field it reads.
///
/// Plain and counter fields keep registration order and come first.
fn dependency_order(
    fields: &[Arc<FieldDefinition>],
    index: &HashMap<(String, String), Arc<FieldDefinition>>,
) -> Result<Vec<Arc<FieldDefinition>>> {
    let (mut pending, aggregators): (Vec<_>, Vec<_>) = fields
        .iter()
        .cloned()
        .partition(|f| f.as_aggregator().is_none());
    pending.extend(aggregators);

    let mut placed: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|def| {
            let ready = match def.child_key() {
                None => true,
                Some((t, n)) => placed.contains(&format!("{}.{}", t, n)),
            };
            if ready {
                placed.insert(def.qualified_name());
                order.push(def.clone());
            }
            !ready
        });

        if pending.len() == before {
            return Err(QuotaError::CyclicAggregation {
                fields: find_cycle(&pending[0], index),
            });
        }
    }

    Ok(order)
}

/// Follow child references from `start` until a field repeats.
fn find_cycle(
    start: &Arc<FieldDefinition>,
    index: &HashMap<(String, String), Arc<FieldDefinition>>,
) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();
    let mut current = start.clone();
    loop {
        let name = current.qualified_name();
        if let Some(pos) = path.iter().position(|p| p == &name) {
            let mut cycle = path.split_off(pos);
            cycle.push(name);
            return cycle;
        }
        path.push(name);
        match current.child_key().and_then(|key| index.get(&key)) {
            Some(next) => current = next.clone(),
            None => return path,
        }
    }
}

/// Frozen set of quota fields for every scope type.
pub struct Registry {
    by_scope: HashMap<String, Vec<Arc<FieldDefinition>>>,
    scope_types: Vec<String>,
    counters_by_target: HashMap<String, Vec<Arc<FieldDefinition>>>,
    aggregators_by_child: HashMap<(String, String), Vec<Arc<FieldDefinition>>>,
    aggregators_by_child_kind: HashMap<String, Vec<Arc<FieldDefinition>>>,
    order: Vec<Arc<FieldDefinition>>,
    hooks: Vec<Arc<dyn RecalculationHook>>,
}

impl Registry {
    /// Start declaring fields.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Fields of a scope type in registration order.
    pub fn fields_for(&self, scope_type: &str) -> &[Arc<FieldDefinition>] {
        self.by_scope
            .get(scope_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look a field up by scope type and name.
    pub fn field(&self, scope_type: &str, name: &str) -> Option<&Arc<FieldDefinition>> {
        self.fields_for(scope_type).iter().find(|f| f.name == name)
    }

    /// Whether any field is registered for `kind`.
    pub fn is_scope_type(&self, kind: &str) -> bool {
        self.by_scope.contains_key(kind)
    }

    /// Scope types in registration order.
    pub fn scope_types(&self) -> &[String] {
        &self.scope_types
    }

    /// Whether `field` applies to `scope`.
    pub fn is_applicable(&self, field: &FieldDefinition, scope: &Entity) -> bool {
        field.is_applicable(scope)
    }

    /// Counter and total fields counting entities of `kind`.
    pub fn counters_targeting(&self, kind: &str) -> &[Arc<FieldDefinition>] {
        self.counters_by_target
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Aggregators reading `child_field` of `child_kind` scopes.
    pub fn aggregators_of(&self, child_kind: &str, child_field: &str) -> &[Arc<FieldDefinition>] {
        self.aggregators_by_child
            .get(&(child_kind.to_string(), child_field.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Aggregators whose children are `child_kind` scopes.
    pub fn aggregators_over(&self, child_kind: &str) -> &[Arc<FieldDefinition>] {
        self.aggregators_by_child_kind
            .get(child_kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All fields, each aggregator after the child field it reads.
    pub fn dependency_order(&self) -> &[Arc<FieldDefinition>] {
        &self.order
    }

    /// Hooks run at the end of a full recalculation.
    pub fn recalculation_hooks(&self) -> &[Arc<dyn RecalculationHook>] {
        &self.hooks
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("scope_types", &self.scope_types)
            .field(
                "fields",
                &self
                    .order
                    .iter()
                    .map(|d| d.qualified_name())
                    .collect::<Vec<_>>(),
            )
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
