//! Multi-way branch procedures
//!
//! A switch compares a tag value against `n` match constants under one
//! comparator and jumps to the continuation paired with the first match,
//! or to the default continuation when none matches. The argument layout
//! is positional: `[tag, match_1 .. match_n, target_1 .. target_n, default]`,
//! so a switch over `n` matches always takes `2n + 2` arguments.

use std::fmt;

use crate::fold::FoldError;
use crate::graph::call::Call;
use crate::graph::value::{Constant, Value};
use crate::graph::{GraphError, GraphResult};
use crate::kind::Kind;

/// Comparison applied between the tag and each match value
///
/// Each comparator has exactly one tag; the unsigned forms compare the
/// scalar bit patterns as unsigned integers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchComparator {
    IntEqual = 0,
    IntNotEqual = 1,
    SignedIntLessThan = 2,
    SignedIntGreaterEqual = 3,
    UnsignedIntLessThan = 4,
    UnsignedIntGreaterEqual = 5,
}

impl SwitchComparator {
    pub(crate) fn tag(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SwitchComparator::IntEqual),
            1 => Some(SwitchComparator::IntNotEqual),
            2 => Some(SwitchComparator::SignedIntLessThan),
            3 => Some(SwitchComparator::SignedIntGreaterEqual),
            4 => Some(SwitchComparator::UnsignedIntLessThan),
            5 => Some(SwitchComparator::UnsignedIntGreaterEqual),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SwitchComparator::IntEqual => "==",
            SwitchComparator::IntNotEqual => "!=",
            SwitchComparator::SignedIntLessThan => "<",
            SwitchComparator::SignedIntGreaterEqual => ">=",
            SwitchComparator::UnsignedIntLessThan => "u<",
            SwitchComparator::UnsignedIntGreaterEqual => "u>=",
        }
    }

    /// Apply the comparison to two scalar values
    pub fn compare(self, left: i64, right: i64) -> bool {
        match self {
            SwitchComparator::IntEqual => left == right,
            SwitchComparator::IntNotEqual => left != right,
            SwitchComparator::SignedIntLessThan => left < right,
            SwitchComparator::SignedIntGreaterEqual => left >= right,
            SwitchComparator::UnsignedIntLessThan => (left as u64) < right as u64,
            SwitchComparator::UnsignedIntGreaterEqual => left as u64 >= right as u64,
        }
    }
}

impl fmt::Display for SwitchComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A multi-way branch over `number_of_matches` match values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    value_kind: Kind,
    comparator: SwitchComparator,
    number_of_matches: u32,
}

impl Switch {
    pub fn new(
        value_kind: Kind,
        comparator: SwitchComparator,
        number_of_matches: u32,
    ) -> Self {
        Switch {
            value_kind,
            comparator,
            number_of_matches,
        }
    }

    /// Conditional branch: one match, one target, one default
    pub fn if_then_else(value_kind: Kind, comparator: SwitchComparator) -> Self {
        Switch::new(value_kind, comparator, 1)
    }

    #[inline]
    pub fn value_kind(&self) -> Kind {
        self.value_kind
    }

    #[inline]
    pub fn comparator(&self) -> SwitchComparator {
        self.comparator
    }

    #[inline]
    pub fn number_of_matches(&self) -> u32 {
        self.number_of_matches
    }

    /// Required call arity: tag, n matches, n targets, default
    pub fn call_arity(&self) -> usize {
        2 * self.number_of_matches as usize + 2
    }

    fn match_at<'a>(&self, arguments: &'a [Value], i: usize) -> &'a Value {
        &arguments[1 + i]
    }

    fn target_at<'a>(&self, arguments: &'a [Value], i: usize) -> &'a Value {
        &arguments[1 + self.number_of_matches as usize + i]
    }

    fn default_target<'a>(&self, arguments: &'a [Value]) -> &'a Value {
        &arguments[arguments.len() - 1]
    }

    /// Whether this switch can be decided at compile time
    ///
    /// The tag and every match value must be constant; the targets need not
    /// be, only the chosen one survives.
    pub fn is_foldable(&self, arguments: &[Value]) -> bool {
        if arguments.len() != self.call_arity() {
            return false;
        }
        arguments[0].is_constant()
            && (0..self.number_of_matches as usize)
                .all(|i| self.match_at(arguments, i).is_constant())
    }

    /// Decide the branch and jump to the selected continuation
    pub fn fold(&self, arguments: &[Value]) -> Result<Call, FoldError> {
        let tag = arguments[0]
            .as_constant()
            .and_then(Constant::as_scalar_i64)
            .ok_or(FoldError::Unsupported("switch tag is not a scalar constant"))?;
        for i in 0..self.number_of_matches as usize {
            let candidate = self
                .match_at(arguments, i)
                .as_constant()
                .and_then(Constant::as_scalar_i64)
                .ok_or(FoldError::Unsupported("match value is not a scalar constant"))?;
            if self.comparator.compare(tag, candidate) {
                return Ok(Call::new(self.target_at(arguments, i).clone(), vec![]));
            }
        }
        Ok(Call::new(self.default_target(arguments).clone(), vec![]))
    }

    /// Validate a call against this switch's arity
    pub fn check_call(&self, call: &Call) -> GraphResult<()> {
        if call.arguments().len() != self.call_arity() {
            return Err(GraphError::ArityMismatch {
                procedure: self.to_string(),
                expected: self.call_arity(),
                actual: call.arguments().len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "switch<{}, {}, {}>",
            self.value_kind, self.comparator, self.number_of_matches
        )
    }
}
