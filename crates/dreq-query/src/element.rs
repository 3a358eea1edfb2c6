//! Elements of the Data Request object graph.
//!
//! An [`Element`] is one record of one table, with its attributes taken from
//! the Vocabulary Server and, for the structural tables, its relations taken
//! from the Data Request document. Cross references are kept as
//! [`ElementId`]s and resolved through [`DataRequest::element`], so the graph
//! never owns cycles.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;
use tracing::warn;

use crate::data_request::DataRequest;
use crate::vocabulary::VocabularyServer;

pub use dreq_content::transform::{EXPERIMENTS, EXPERIMENT_GROUPS, OPPORTUNITIES, VARIABLES, VARIABLE_GROUPS};

pub const DATA_REQUEST_THEMES: &str = "data_request_themes";
pub const MIPS: &str = "mips";
pub const PRIORITY_LEVEL: &str = "priority_level";
pub const TIME_SUBSET: &str = "time_subset";
pub const TIME_SUBSETS: &str = "time_subsets";

/// Display value of anything that could not be resolved.
pub const UNDEFINED: &str = "undef";

// ============================================================================
// Identifiers and resolved values
// ============================================================================

/// `(table, uid)`: the identity of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId {
    pub table: String,
    pub uid: String,
}

impl ElementId {
    pub fn new(table: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.uid)
    }
}

/// A string attribute after link resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Plain text, compared as is.
    Literal(String),
    /// Reference to another element.
    Link(ElementId),
    /// A reference that could not be resolved; keeps the raw value.
    Missing(String),
}

impl Resolved {
    /// Whether this value designates `id`. A literal designates an element
    /// whose uid is the same text.
    pub fn refers_to(&self, id: &ElementId) -> bool {
        match self {
            Resolved::Link(link) => link == id,
            Resolved::Literal(text) => *text == id.uid,
            Resolved::Missing(_) => false,
        }
    }

    pub fn as_link(&self) -> Option<&ElementId> {
        match self {
            Resolved::Link(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Single(Resolved),
    List(Vec<Resolved>),
    /// Numbers, booleans, nulls and anything else that is not text.
    Scalar(Value),
}

impl AttrValue {
    pub fn items(&self) -> &[Resolved] {
        match self {
            AttrValue::Single(value) => std::slice::from_ref(value),
            AttrValue::List(values) => values,
            AttrValue::Scalar(_) => &[],
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &ElementId> {
        self.items().iter().filter_map(Resolved::as_link)
    }

    pub fn refers_to(&self, id: &ElementId) -> bool {
        self.items().iter().any(|item| item.refers_to(id))
    }
}

// ============================================================================
// Element kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Opportunity,
    VariablesGroup,
    ExperimentsGroup,
    Variable,
    Generic,
}

impl ElementKind {
    pub fn for_table(table: &str) -> Self {
        match table {
            OPPORTUNITIES => ElementKind::Opportunity,
            VARIABLE_GROUPS => ElementKind::VariablesGroup,
            EXPERIMENT_GROUPS => ElementKind::ExperimentsGroup,
            VARIABLES => ElementKind::Variable,
            _ => ElementKind::Generic,
        }
    }

    /// Relations read from the Data Request document.
    pub fn relations(self) -> &'static [&'static str] {
        match self {
            ElementKind::Opportunity => &[EXPERIMENT_GROUPS, VARIABLE_GROUPS, DATA_REQUEST_THEMES, TIME_SUBSETS, MIPS],
            ElementKind::VariablesGroup => &[VARIABLES, MIPS, PRIORITY_LEVEL],
            ElementKind::ExperimentsGroup => &[EXPERIMENTS],
            ElementKind::Variable | ElementKind::Generic => &[],
        }
    }

    /// Relations holding one value instead of a list.
    pub(crate) fn is_single(relation: &str) -> bool {
        relation == PRIORITY_LEVEL
    }

    /// DR spelling of a relation, e.g. `themes -> data_request_themes`.
    pub(crate) fn relation_name(self, key: &str) -> &str {
        match (self, key) {
            (ElementKind::Opportunity, "themes") => DATA_REQUEST_THEMES,
            (ElementKind::Opportunity, TIME_SUBSET) => TIME_SUBSETS,
            _ => key,
        }
    }
}

// ============================================================================
// Element
// ============================================================================

/// One node of the graph. Equality, hashing and ordering only look at the id.
#[derive(Debug, Clone)]
pub struct Element {
    id: ElementId,
    kind: ElementKind,
    attributes: BTreeMap<String, AttrValue>,
    structure: BTreeMap<String, AttrValue>,
}

impl Element {
    pub(crate) fn new(
        id: ElementId,
        attributes: BTreeMap<String, AttrValue>,
        structure: BTreeMap<String, AttrValue>,
    ) -> Self {
        let kind = ElementKind::for_table(&id.table);
        Self {
            id,
            kind,
            attributes,
            structure,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn uid(&self) -> &str {
        &self.id.uid
    }

    /// Table the element belongs to.
    pub fn element_type(&self) -> &str {
        &self.id.table
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        match self.attributes.get("name") {
            Some(AttrValue::Single(Resolved::Literal(name))) => name,
            _ => UNDEFINED,
        }
    }

    /// An attribute from the Vocabulary Server, or a relation from the DR.
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key).or_else(|| self.structure.get(key))
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// Resolved items of a relation; empty for unknown relations.
    pub fn relation(&self, name: &str) -> &[Resolved] {
        self.structure.get(name).map(AttrValue::items).unwrap_or(&[])
    }

    pub fn related(&self, name: &str) -> impl Iterator<Item = &ElementId> {
        self.relation(name).iter().filter_map(Resolved::as_link)
    }

    pub fn get_experiments(&self) -> Vec<&ElementId> {
        self.related(EXPERIMENTS).collect()
    }

    pub fn get_variables(&self) -> Vec<&ElementId> {
        self.related(VARIABLES).collect()
    }

    pub fn get_mips(&self) -> Vec<&ElementId> {
        self.related(MIPS).collect()
    }

    pub fn get_experiment_groups(&self) -> Vec<&ElementId> {
        self.related(EXPERIMENT_GROUPS).collect()
    }

    pub fn get_variable_groups(&self) -> Vec<&ElementId> {
        self.related(VARIABLE_GROUPS).collect()
    }

    pub fn get_data_request_themes(&self) -> Vec<&ElementId> {
        self.related(DATA_REQUEST_THEMES).collect()
    }

    pub fn get_time_subsets(&self) -> Vec<&ElementId> {
        self.related(TIME_SUBSETS).collect()
    }

    pub fn get_priority_level(&self) -> Option<&Resolved> {
        self.relation(PRIORITY_LEVEL).first()
    }

    /// Number of experiments of an experiment group or variables of a
    /// variable group.
    pub fn count(&self) -> usize {
        match self.kind {
            ElementKind::ExperimentsGroup => self.get_experiments().len(),
            ElementKind::VariablesGroup => self.get_variables().len(),
            _ => 0,
        }
    }

    /// Data-quality problems of this element. Each one is logged; none of
    /// them is fatal.
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self.kind {
            ElementKind::ExperimentsGroup if self.count() == 0 => {
                problems.push(format!("No experiment defined for {} id {}", self.id.table, self.id.uid));
            }
            ElementKind::VariablesGroup if self.count() == 0 => {
                problems.push(format!("No variable defined for {} id {}", self.id.table, self.id.uid));
            }
            ElementKind::Opportunity => {
                for (relation, what) in [
                    (EXPERIMENT_GROUPS, "experiments group"),
                    (VARIABLE_GROUPS, "variables group"),
                    (DATA_REQUEST_THEMES, "theme"),
                ] {
                    if self.related(relation).next().is_none() {
                        problems.push(format!("No {what} defined for {} id {}", self.id.table, self.id.uid));
                    }
                }
            }
            _ => {}
        }
        for problem in &problems {
            warn!("{problem}");
        }
        problems
    }

    /// Text form of `key`, as used by exports and sorting. Links render as
    /// the name of their target.
    pub fn text(&self, dr: &DataRequest, key: &str) -> String {
        if key == "id" {
            return self.id.uid.clone();
        }
        match self.get(key) {
            Some(AttrValue::Single(value)) => resolved_text(dr, value),
            Some(AttrValue::List(values)) => values
                .iter()
                .map(|value| resolved_text(dr, value))
                .collect::<Vec<_>>()
                .join(", "),
            Some(AttrValue::Scalar(Value::String(text))) => text.clone(),
            Some(AttrValue::Scalar(Value::Null)) | None => UNDEFINED.to_string(),
            Some(AttrValue::Scalar(other)) => other.to_string(),
        }
    }

    /// Printable lines for this element, indented by `level`, with the
    /// content of its relations when `add_content` is set.
    pub fn print_content(&self, dr: &DataRequest, level: usize, add_content: bool) -> Vec<String> {
        let indent = "    ".repeat(level);
        if self.kind == ElementKind::Variable {
            return vec![format!(
                "{indent}variable: {} at frequency {} (id: {}, title: {})",
                self.text(dr, "physical_parameter"),
                self.text(dr, "cmip7_frequency"),
                self.id.uid,
                self.text(dr, "title"),
            )];
        }

        let mut lines = vec![format!(
            "{indent}{}: {} (id: {})",
            VocabularyServer::to_singular(&self.id.table),
            self.name(),
            self.id.uid
        )];
        if !add_content {
            return lines;
        }
        let inner = "    ".repeat(level + 1);
        let sections: &[(&str, &str, bool)] = match self.kind {
            ElementKind::ExperimentsGroup => &[("Experiments included:", EXPERIMENTS, true)],
            ElementKind::VariablesGroup => &[("Variables included:", VARIABLES, true)],
            ElementKind::Opportunity => &[
                ("Experiments groups included:", EXPERIMENT_GROUPS, false),
                ("Variables groups included:", VARIABLE_GROUPS, false),
                ("Themes included:", DATA_REQUEST_THEMES, false),
                ("Time subsets included:", TIME_SUBSETS, false),
            ],
            _ => &[],
        };
        for (title, relation, nested) in sections {
            lines.push(format!("{inner}{title}"));
            for id in self.related(relation) {
                match dr.element(id) {
                    Ok(child) => lines.extend(child.print_content(dr, level + 2, *nested)),
                    Err(err) => warn!(element = %id, %err, "could not print element"),
                }
            }
        }
        lines
    }
}

fn resolved_text(dr: &DataRequest, value: &Resolved) -> String {
    match value {
        Resolved::Literal(text) => text.clone(),
        Resolved::Missing(_) => UNDEFINED.to_string(),
        Resolved::Link(id) => match dr.element(id) {
            Ok(element) => element.name().to_string(),
            Err(_) => id.uid.clone(),
        },
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Element {}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(text: &str) -> Resolved {
        Resolved::Literal(text.to_string())
    }

    #[test]
    fn identity_is_table_and_uid() {
        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), AttrValue::Single(literal("one")));
        let a = Element::new(ElementId::new(VARIABLES, "v1"), attributes, BTreeMap::new());
        let b = Element::new(ElementId::new(VARIABLES, "v1"), BTreeMap::new(), BTreeMap::new());
        let c = Element::new(ElementId::new(EXPERIMENTS, "v1"), BTreeMap::new(), BTreeMap::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(c < a);
        assert_eq!(a.name(), "one");
        assert_eq!(b.name(), UNDEFINED);
        assert_eq!(a.kind(), ElementKind::Variable);
    }

    #[test]
    fn references_compare_by_id_or_literal_uid() {
        let target = ElementId::new(PRIORITY_LEVEL, "High");
        assert!(Resolved::Link(target.clone()).refers_to(&target));
        assert!(literal("High").refers_to(&target));
        assert!(!Resolved::Missing("High".into()).refers_to(&target));
        let list = AttrValue::List(vec![literal("Low"), Resolved::Link(target.clone())]);
        assert!(list.refers_to(&target));
        assert_eq!(list.links().count(), 1);
        assert!(AttrValue::Scalar(Value::from(3)).items().is_empty());
    }

    #[test]
    fn empty_groups_are_reported() {
        let mut structure = BTreeMap::new();
        structure.insert(EXPERIMENTS.to_string(), AttrValue::List(vec![]));
        let group = Element::new(ElementId::new(EXPERIMENT_GROUPS, "eg1"), BTreeMap::new(), structure);
        assert_eq!(group.check(), vec!["No experiment defined for experiment_groups id eg1"]);

        let opportunity = Element::new(ElementId::new(OPPORTUNITIES, "o1"), BTreeMap::new(), BTreeMap::new());
        assert_eq!(opportunity.check().len(), 3);
    }

    #[test]
    fn opportunity_relations_accept_short_spellings() {
        assert_eq!(ElementKind::Opportunity.relation_name("themes"), DATA_REQUEST_THEMES);
        assert_eq!(ElementKind::Opportunity.relation_name(TIME_SUBSET), TIME_SUBSETS);
        assert_eq!(ElementKind::VariablesGroup.relation_name("themes"), "themes");
        assert!(ElementKind::is_single(PRIORITY_LEVEL));
    }
}
