//! Pot registry: the ordered pot set and its sum-to-100 invariant

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use crate::common::errors::{LedgerError, Result};
use crate::common::types::{checked_balance, Pot, FULL_ALLOCATION, PERCENTAGE_SCALE};

/// Validate a complete set of `(name, percentage)` pairs
///
/// Names must be unique and non-empty, every percentage must lie in
/// (0, 100] with at most four decimal places, and the total must be within
/// `epsilon` of 100.
pub fn validate_percentage_set(entries: &[(&str, Decimal)], epsilon: Decimal) -> Result<()> {
    if entries.is_empty() {
        return Err(LedgerError::InvalidConfiguration(
            "at least one pot is required".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for (name, percentage) in entries {
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidConfiguration(
                "pot names must not be empty".to_string(),
            ));
        }
        if !seen.insert(*name) {
            return Err(LedgerError::InvalidConfiguration(format!(
                "duplicate pot name: {}",
                name
            )));
        }
        if *percentage <= Decimal::ZERO || *percentage > FULL_ALLOCATION {
            return Err(LedgerError::InvalidConfiguration(format!(
                "percentage for {} must be in (0, 100], got {}",
                name, percentage
            )));
        }
        if percentage.normalize().scale() > PERCENTAGE_SCALE {
            return Err(LedgerError::InvalidConfiguration(format!(
                "percentage for {} has more than {} decimal places: {}",
                name, PERCENTAGE_SCALE, percentage
            )));
        }
    }

    let total: Decimal = entries.iter().map(|(_, p)| *p).sum();
    if (total - FULL_ALLOCATION).abs() > epsilon {
        return Err(LedgerError::InvalidConfiguration(format!(
            "percentages sum to {}, expected 100",
            total
        )));
    }

    Ok(())
}

/// In-memory pot set, ordered by creation
#[derive(Debug, Clone)]
pub struct PotRegistry {
    pots: Vec<Pot>,
    epsilon: Decimal,
}

impl PotRegistry {
    /// Build a registry from a fresh setup, enforcing every invariant
    pub fn new(mut pots: Vec<Pot>, epsilon: Decimal) -> Result<Self> {
        pots.sort_by_key(|p| p.position);
        let entries: Vec<(&str, Decimal)> =
            pots.iter().map(|p| (p.name.as_str(), p.percentage)).collect();
        validate_percentage_set(&entries, epsilon)?;
        if let Some(pot) = pots.iter().find(|p| p.balance < Decimal::ZERO) {
            return Err(LedgerError::InvalidConfiguration(format!(
                "pot {} has negative balance {}",
                pot.name, pot.balance
            )));
        }
        Ok(Self { pots, epsilon })
    }

    /// Pots in creation order
    pub fn list(&self) -> &[Pot] {
        &self.pots
    }

    pub fn len(&self) -> usize {
        self.pots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pots.is_empty()
    }

    pub fn epsilon(&self) -> Decimal {
        self.epsilon
    }

    /// Look up a pot by name
    pub fn get(&self, name: &str) -> Result<&Pot> {
        self.pots
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pots.iter().any(|p| p.name == name)
    }

    /// Re-check the sum-to-100 invariant against the live percentages
    pub fn ensure_balanced(&self) -> Result<()> {
        let entries: Vec<(&str, Decimal)> = self
            .pots
            .iter()
            .map(|p| (p.name.as_str(), p.percentage))
            .collect();
        validate_percentage_set(&entries, self.epsilon)
    }

    /// Validate a full percentage replacement without applying it
    ///
    /// The mapping must name every pot exactly once. Returns the new
    /// percentages in creation order.
    pub fn plan_percentages(&self, mapping: &HashMap<String, Decimal>) -> Result<Vec<(String, Decimal)>> {
        if let Some(unknown) = mapping.keys().find(|name| !self.contains(name)) {
            return Err(LedgerError::InvalidConfiguration(format!(
                "unknown pot: {}",
                unknown
            )));
        }

        let mut updates = Vec::with_capacity(self.pots.len());
        for pot in &self.pots {
            let percentage = mapping.get(&pot.name).ok_or_else(|| {
                LedgerError::InvalidConfiguration(format!("missing percentage for pot {}", pot.name))
            })?;
            updates.push((pot.name.clone(), *percentage));
        }

        let entries: Vec<(&str, Decimal)> =
            updates.iter().map(|(n, p)| (n.as_str(), *p)).collect();
        validate_percentage_set(&entries, self.epsilon)?;
        Ok(updates)
    }

    /// Replace percentages (callers validate with `plan_percentages` first)
    pub(crate) fn apply_percentages(&mut self, updates: &[(String, Decimal)]) {
        for (name, percentage) in updates {
            if let Some(pot) = self.pots.iter_mut().find(|p| &p.name == name) {
                pot.percentage = *percentage;
            }
        }
    }

    /// Apply a signed balance change (callers check funds first)
    pub(crate) fn apply_delta(&mut self, name: &str, delta: Decimal) -> Result<()> {
        let pot = self
            .pots
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))?;
        pot.balance = checked_balance(name, pot.balance, delta)?;
        Ok(())
    }

    /// Overwrite the pot set with a fresh copy from the store
    pub(crate) fn replace_pots(&mut self, mut pots: Vec<Pot>) {
        pots.sort_by_key(|p| p.position);
        self.pots = pots;
    }

    /// Indices ordered by remainder priority: largest percentage first,
    /// ties broken by creation order
    pub fn remainder_priority(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.pots.len()).collect();
        order.sort_by(|&a, &b| {
            self.pots[b]
                .percentage
                .cmp(&self.pots[a].percentage)
                .then(self.pots[a].position.cmp(&self.pots[b].position))
        });
        order
    }

    pub fn total_balance(&self) -> Decimal {
        self.pots.iter().map(|p| p.balance).sum()
    }
}
