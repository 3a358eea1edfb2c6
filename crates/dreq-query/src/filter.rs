//! Filter protocol.
//!
//! Every element answers `filter_on_request(request)` with a
//! [`FilterOutcome`]: `None` when it does not know how to be filtered by an
//! element of that type, `Some(matched)` otherwise. A query tries the
//! [`STRATEGIES`] in order for each candidate until one of them applies.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::data_request::DataRequest;
use crate::element::{
    Element, ElementId, ElementKind, DATA_REQUEST_THEMES, EXPERIMENTS, EXPERIMENT_GROUPS, MIPS, PRIORITY_LEVEL,
    TIME_SUBSET, TIME_SUBSETS, VARIABLES, VARIABLE_GROUPS,
};
use crate::error::{QueryError, Result};

/// `None`: not applicable. `Some(matched)`: applicable.
pub type FilterOutcome = Option<bool>;

/// Variable leaf tables and the variable attributes that point at them.
const VARIABLE_LEAVES: &[(&str, &[&str])] = &[
    ("table_identifiers", &["table_identifier", "table"]),
    ("temporal_shape", &["temporal_shape"]),
    ("spatial_shape", &["spatial_shape"]),
    ("structure_title", &["structure_title", "structure"]),
    ("structure", &["structure_title", "structure"]),
    ("physical_parameters", &["physical_parameter"]),
    ("modelling_realm", &["modelling_realm"]),
    ("esm-bcv", &["esm-bcv", "esm_bcv"]),
    ("cf_standard_names", &["cf_standard_name"]),
    ("cell_methods", &["cell_methods"]),
    ("cell_measures", &["cell_measures"]),
    ("cmip7_frequency", &["cmip7_frequency"]),
];

fn variable_leaf(table: &str) -> Option<&'static [&'static str]> {
    VARIABLE_LEAVES
        .iter()
        .find(|(leaf, _)| *leaf == table)
        .map(|(_, attributes)| *attributes)
}

// ============================================================================
// Per-kind protocol
// ============================================================================

/// Can `element` be filtered by `request`, and does it match?
pub fn filter_on_request(dr: &DataRequest, element: &Element, request: &Element) -> Result<FilterOutcome> {
    let request_type = request.element_type();
    let request_id = request.id();
    let outcome = match element.kind() {
        ElementKind::ExperimentsGroup => match request_type {
            EXPERIMENTS => Some(contains(element, EXPERIMENTS, request_id)),
            _ => None,
        },
        ElementKind::Variable => match variable_leaf(request_type) {
            Some(attributes) => Some(variable_matches(dr, element, request_type, attributes, request_id)?),
            None => None,
        },
        ElementKind::VariablesGroup => match request_type {
            VARIABLES | MIPS => Some(contains(element, request_type, request_id)),
            PRIORITY_LEVEL => Some(
                element
                    .get_priority_level()
                    .is_some_and(|priority| priority.refers_to(request_id)),
            ),
            t if variable_leaf(t).is_some() => Some(any_related(dr, element, VARIABLES, request)?),
            _ => None,
        },
        ElementKind::Opportunity => match request_type {
            DATA_REQUEST_THEMES | EXPERIMENT_GROUPS | VARIABLE_GROUPS => {
                Some(contains(element, request_type, request_id))
            }
            TIME_SUBSET | TIME_SUBSETS => Some(contains(element, TIME_SUBSETS, request_id)),
            MIPS => Some(contains(element, MIPS, request_id) || any_related(dr, element, VARIABLE_GROUPS, request)?),
            VARIABLES | PRIORITY_LEVEL => Some(any_related(dr, element, VARIABLE_GROUPS, request)?),
            t if variable_leaf(t).is_some() => Some(any_related(dr, element, VARIABLE_GROUPS, request)?),
            EXPERIMENTS => Some(any_related(dr, element, EXPERIMENT_GROUPS, request)?),
            _ => None,
        },
        ElementKind::Generic => None,
    };
    Ok(outcome.or_else(|| identity(element, request)))
}

/// Fallback shared by every kind: elements of the same type match when
/// they are the same element.
fn identity(element: &Element, request: &Element) -> FilterOutcome {
    (element.element_type() == request.element_type()).then(|| element.id() == request.id())
}

fn contains(element: &Element, relation: &str, id: &ElementId) -> bool {
    element.relation(relation).iter().any(|item| item.refers_to(id))
}

/// Does any element of `relation` match `request`?
fn any_related(dr: &DataRequest, element: &Element, relation: &str, request: &Element) -> Result<bool> {
    for id in element.related(relation) {
        let child = dr.element(id)?;
        if filter_on_request(dr, &child, request)? == Some(true) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn variable_matches(
    dr: &DataRequest,
    variable: &Element,
    request_type: &str,
    attributes: &[&str],
    request_id: &ElementId,
) -> Result<bool> {
    if let Some(value) = attributes.iter().find_map(|key| variable.get(key)) {
        return Ok(value.refers_to(request_id));
    }
    // Standard names usually hang off the physical parameter.
    if request_type == "cf_standard_names" {
        if let Some(parameter) = variable.get("physical_parameter").and_then(|v| v.links().next()) {
            let parameter = dr.element(parameter)?;
            return Ok(parameter
                .get("cf_standard_name")
                .is_some_and(|value| value.refers_to(request_id)));
        }
    }
    Ok(false)
}

// ============================================================================
// Strategies
// ============================================================================

/// Collections tried as intermediaries between two otherwise unrelated
/// element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCollection {
    ExperimentGroups,
    Variables,
    VariableGroups,
    Opportunities,
}

impl BridgeCollection {
    fn elements(self, dr: &DataRequest) -> Result<Vec<Rc<Element>>> {
        match self {
            BridgeCollection::ExperimentGroups => dr.get_experiment_groups(),
            BridgeCollection::Variables => dr.get_variables(),
            BridgeCollection::VariableGroups => dr.get_variable_groups(),
            BridgeCollection::Opportunities => dr.get_opportunities(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `candidate.filter_on_request(request)`
    Direct,
    /// `request.filter_on_request(candidate)`
    Inverse,
    /// Some element of the collection is filterable by both sides and
    /// matches both.
    Bridge(BridgeCollection),
}

pub const STRATEGIES: [Strategy; 6] = [
    Strategy::Direct,
    Strategy::Inverse,
    Strategy::Bridge(BridgeCollection::ExperimentGroups),
    Strategy::Bridge(BridgeCollection::Variables),
    Strategy::Bridge(BridgeCollection::VariableGroups),
    Strategy::Bridge(BridgeCollection::Opportunities),
];

impl Strategy {
    pub fn apply(self, dr: &DataRequest, candidate: &Element, request: &Element) -> Result<FilterOutcome> {
        match self {
            Strategy::Direct => filter_on_request(dr, candidate, request),
            Strategy::Inverse => filter_on_request(dr, request, candidate),
            Strategy::Bridge(collection) => bridge(dr, &collection.elements(dr)?, request, candidate),
        }
    }
}

/// Applicability is decided on the first element of the collection; the
/// match on any element matching both sides.
fn bridge(dr: &DataRequest, collection: &[Rc<Element>], first: &Element, second: &Element) -> Result<FilterOutcome> {
    let Some(head) = collection.first() else {
        return Ok(None);
    };
    let (Some(a), Some(b)) = (
        filter_on_request(dr, head, first)?,
        filter_on_request(dr, head, second)?,
    ) else {
        return Ok(None);
    };
    if a && b {
        return Ok(Some(true));
    }
    for element in collection {
        if filter_on_request(dr, element, first)? == Some(true) && filter_on_request(dr, element, second)? == Some(true)
        {
            return Ok(Some(true));
        }
    }
    Ok(Some(false))
}

// ============================================================================
// Requests
// ============================================================================

/// How the hit-sets of several requested values are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Union: match at least one requirement.
    Any,
    /// Intersection: match all requirements.
    All,
}

impl FromStr for Operation {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "any" => Ok(Operation::Any),
            "all" => Ok(Operation::All),
            other => Err(QueryError::InvalidOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Any => "any",
            Operation::All => "all",
        })
    }
}

/// A requested value: a uid, a `link::` token or a name, or an element that
/// is already resolved.
#[derive(Debug, Clone)]
pub enum RequestValue {
    Text(String),
    Element(Rc<Element>),
}

impl From<&str> for RequestValue {
    fn from(value: &str) -> Self {
        RequestValue::Text(value.to_string())
    }
}

impl From<String> for RequestValue {
    fn from(value: String) -> Self {
        RequestValue::Text(value)
    }
}

impl From<Rc<Element>> for RequestValue {
    fn from(value: Rc<Element>) -> Self {
        RequestValue::Element(value)
    }
}

impl From<&Rc<Element>> for RequestValue {
    fn from(value: &Rc<Element>) -> Self {
        RequestValue::Element(Rc::clone(value))
    }
}

impl fmt::Display for RequestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestValue::Text(text) => f.write_str(text),
            RequestValue::Element(element) => write!(f, "{}", element.id()),
        }
    }
}

/// Requested values grouped by relation type, e.g.
/// `{"opportunities": ["o1"], "priority_level": ["High"]}`.
#[derive(Debug, Clone, Default)]
pub struct Requests {
    entries: Vec<(String, Vec<RequestValue>)>,
}

impl Requests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value for `relation`.
    pub fn with(mut self, relation: impl Into<String>, value: impl Into<RequestValue>) -> Self {
        self.push(relation, value);
        self
    }

    pub fn push(&mut self, relation: impl Into<String>, value: impl Into<RequestValue>) {
        let relation = relation.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(r, _)| *r == relation) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((relation, vec![value])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, values)| values.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RequestValue])> {
        self.entries.iter().map(|(relation, values)| (relation.as_str(), values.as_slice()))
    }
}

impl<R: Into<String>, V: Into<RequestValue>> FromIterator<(R, V)> for Requests {
    fn from_iter<I: IntoIterator<Item = (R, V)>>(iter: I) -> Self {
        let mut requests = Requests::new();
        for (relation, value) in iter {
            requests.push(relation, value);
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_parse() {
        assert_eq!("any".parse::<Operation>().unwrap(), Operation::Any);
        assert_eq!("all".parse::<Operation>().unwrap(), Operation::All);
        let err = "some".parse::<Operation>().unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperation(op) if op == "some"));
    }

    #[test]
    fn requests_group_values_per_relation() {
        let requests: Requests = [("variables", "v1"), ("opportunities", "o1"), ("variables", "v2")]
            .into_iter()
            .collect();
        let grouped: Vec<(&str, usize)> = requests.iter().map(|(r, v)| (r, v.len())).collect();
        assert_eq!(grouped, vec![("variables", 2), ("opportunities", 1)]);
        assert!(!requests.is_empty());
        assert!(Requests::new().is_empty());
    }

    #[test]
    fn strategies_are_tried_in_a_fixed_order() {
        assert_eq!(STRATEGIES[0], Strategy::Direct);
        assert_eq!(STRATEGIES[1], Strategy::Inverse);
        assert_eq!(
            STRATEGIES[2..],
            [
                Strategy::Bridge(BridgeCollection::ExperimentGroups),
                Strategy::Bridge(BridgeCollection::Variables),
                Strategy::Bridge(BridgeCollection::VariableGroups),
                Strategy::Bridge(BridgeCollection::Opportunities),
            ]
        );
        assert!(variable_leaf("physical_parameters").is_some());
        assert!(variable_leaf("opportunities").is_none());
    }
}
