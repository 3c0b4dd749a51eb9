//! Entry, exit and filter rule sets built from an [`EffectiveConfig`].
//!
//! - Entry: ALL entry rules true AND all filters true; an empty entry list never fires
//! - Exit: ANY exit rule true; an empty exit list never fires
//! - Filters: empty list passes; a failing filter vetoes entry but never forces an exit
//! - Short side evaluates the inverted entry and exit rules; filters are not inverted

use crate::domain::bar::Bar;
use crate::domain::condition::Condition;
use crate::domain::condition_eval::evaluate;
use crate::domain::config_resolver::EffectiveConfig;
use crate::domain::position::Side;
use crate::domain::strategy::DirectionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Stay,
    /// Entry rules fired but a filter failed.
    Vetoed,
    Enter(Side),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub direction: DirectionPolicy,
    entry_long: Vec<Condition>,
    exit_long: Vec<Condition>,
    entry_short: Vec<Condition>,
    exit_short: Vec<Condition>,
    filters: Vec<Condition>,
}

impl RuleSet {
    pub fn new(
        direction: DirectionPolicy,
        entry_rules: Vec<Condition>,
        exit_rules: Vec<Condition>,
        filters: Vec<Condition>,
    ) -> Self {
        Self {
            direction,
            entry_short: entry_rules.iter().map(Condition::inverted).collect(),
            exit_short: exit_rules.iter().map(Condition::inverted).collect(),
            entry_long: entry_rules,
            exit_long: exit_rules,
            filters,
        }
    }

    pub fn from_config(cfg: &EffectiveConfig) -> Self {
        Self::new(
            cfg.direction,
            cfg.entry_rules.clone(),
            cfg.exit_rules.clone(),
            cfg.filters.clone(),
        )
    }

    fn entry_rules(&self, side: Side) -> &[Condition] {
        match side {
            Side::Long => &self.entry_long,
            Side::Short => &self.entry_short,
        }
    }

    fn exit_rules(&self, side: Side) -> &[Condition] {
        match side {
            Side::Long => &self.exit_long,
            Side::Short => &self.exit_short,
        }
    }

    pub fn filters_pass(&self, prev: Option<&Bar>, bar: &Bar) -> bool {
        self.filters.iter().all(|f| evaluate(f, prev, bar))
    }

    fn entry_fires(&self, side: Side, prev: Option<&Bar>, bar: &Bar) -> bool {
        let rules = self.entry_rules(side);
        !rules.is_empty() && rules.iter().all(|c| evaluate(c, prev, bar))
    }

    pub fn should_enter(&self, side: Side, prev: Option<&Bar>, bar: &Bar) -> bool {
        self.entry_fires(side, prev, bar) && self.filters_pass(prev, bar)
    }

    /// Picks the side to enter, long first when both are allowed.
    pub fn entry_decision(&self, prev: Option<&Bar>, bar: &Bar) -> EntryDecision {
        let sides: &[Side] = match self.direction {
            DirectionPolicy::Long => &[Side::Long],
            DirectionPolicy::Short => &[Side::Short],
            DirectionPolicy::Both => &[Side::Long, Side::Short],
        };
        let Some(side) = sides
            .iter()
            .copied()
            .find(|s| self.entry_fires(*s, prev, bar))
        else {
            return EntryDecision::Stay;
        };
        if self.filters_pass(prev, bar) {
            EntryDecision::Enter(side)
        } else {
            EntryDecision::Vetoed
        }
    }

    pub fn should_exit(&self, side: Side, prev: Option<&Bar>, bar: &Bar) -> ExitDecision {
        if self.exit_rules(side).iter().any(|c| evaluate(c, prev, bar)) {
            ExitDecision::Signal
        } else {
            ExitDecision::Hold
        }
    }
}
