//! Data Request façade
//!
//! Owns the DR relations, the [`VocabularyServer`] and the element cache.
//! Elements are built lazily the first time they are asked for and then
//! shared: asking twice for the same element returns the same `Rc`.
//!
//! ```text
//! find_element(type, value)
//!     ├─► content cache (by uid)
//!     ├─► name cache
//!     └─► Vocabulary Server / DR document ──► build ──► cache
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use dreq_content::io::read_json_file;
use dreq_content::{is_link, transform_content, TransformConfig};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::element::{
    AttrValue, Element, ElementId, ElementKind, Resolved, DATA_REQUEST_THEMES, EXPERIMENTS, EXPERIMENT_GROUPS, MIPS,
    OPPORTUNITIES, PRIORITY_LEVEL, UNDEFINED, VARIABLES, VARIABLE_GROUPS,
};
use crate::error::{QueryError, Result};
use crate::filter::{Operation, RequestValue, Requests, STRATEGIES};
use crate::vocabulary::{resolve_table_name, IdType, VocabularyServer, VERSION_KEY};

type Relations = BTreeMap<String, BTreeMap<String, Map<String, Value>>>;

/// Priority of a variable group whose DR record names none.
pub const DEFAULT_PRIORITY_LEVEL: &str = "High";

/// Where a DR or VS document comes from.
#[derive(Debug, Clone)]
pub enum Input {
    Document(Value),
    File(PathBuf),
}

impl Input {
    fn load(self) -> Result<Value> {
        match self {
            Input::Document(value) => Ok(value),
            Input::File(path) => Ok(read_json_file(&path)?),
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Document(value)
    }
}

impl From<PathBuf> for Input {
    fn from(path: PathBuf) -> Self {
        Input::File(path)
    }
}

impl From<&Path> for Input {
    fn from(path: &Path) -> Self {
        Input::File(path.to_path_buf())
    }
}

pub struct DataRequest {
    vs: VocabularyServer,
    relations: Relations,
    content_version: String,
    content: RefCell<HashMap<ElementId, Rc<Element>>>,
    mapping: RefCell<HashMap<(String, String), ElementId>>,
    opportunities: Vec<ElementId>,
    experiment_groups: Vec<ElementId>,
    variable_groups: Vec<ElementId>,
}

impl fmt::Debug for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRequest")
            .field("content_version", &self.content_version)
            .field("opportunities", &self.opportunities.len())
            .field("experiment_groups", &self.experiment_groups.len())
            .field("variable_groups", &self.variable_groups.len())
            .field("cached", &self.content.borrow().len())
            .finish()
    }
}

// ============================================================================
// Construction
// ============================================================================

impl DataRequest {
    /// Build from a DR document and a Vocabulary Server.
    pub fn new(dr: Value, vs: VocabularyServer) -> Result<Self> {
        let (content_version, relations) = parse_relations(dr)?;
        if content_version != vs.version() {
            warn!(dr = %content_version, vs = %vs.version(), "DR and VS versions differ");
        }
        let opportunities: Vec<ElementId> = relations
            .get(OPPORTUNITIES)
            .ok_or_else(|| QueryError::InvalidDocument {
                what: "data request",
                reason: format!("table `{OPPORTUNITIES}` is missing"),
            })?
            .keys()
            .map(|uid| ElementId::new(OPPORTUNITIES, uid.clone()))
            .collect();

        let mut dr = Self {
            vs,
            relations,
            content_version,
            content: RefCell::new(HashMap::new()),
            mapping: RefCell::new(HashMap::new()),
            opportunities,
            experiment_groups: Vec::new(),
            variable_groups: Vec::new(),
        };
        dr.clean()?;
        info!(
            opportunities = dr.opportunities.len(),
            experiment_groups = dr.experiment_groups.len(),
            variable_groups = dr.variable_groups.len(),
            "data request loaded"
        );
        Ok(dr)
    }

    /// Build from a DR and a VS, each given as a document or a file.
    pub fn from_separated_inputs(dr: impl Into<Input>, vs: impl Into<Input>) -> Result<Self> {
        let dr = dr.into().load()?;
        let vs = VocabularyServer::from_value(vs.into().load()?)?;
        Self::new(dr, vs)
    }

    /// Transform a raw export first, then build from the resulting DR and VS.
    pub fn from_input(raw: impl Into<Input>, version: &str, config: &TransformConfig) -> Result<Self> {
        let raw = raw.into().load()?;
        let (dr, vs) = transform_content(&raw, version, config)?;
        Self::new(dr, VocabularyServer::from_value(vs)?)
    }

    /// Drop the experiment and variable groups no opportunity refers to.
    /// Returns how many were dropped.
    ///
    /// Only the listings and caches are pruned: a dropped group can still be
    /// looked up directly by uid or name.
    pub fn clean(&mut self) -> Result<usize> {
        let mut experiment_groups = BTreeSet::new();
        let mut variable_groups = BTreeSet::new();
        for id in &self.opportunities {
            let opportunity = self.element(id)?;
            experiment_groups.extend(opportunity.related(EXPERIMENT_GROUPS).cloned());
            variable_groups.extend(opportunity.related(VARIABLE_GROUPS).cloned());
        }

        let mut dropped = BTreeSet::new();
        for (table, kept) in [(EXPERIMENT_GROUPS, &experiment_groups), (VARIABLE_GROUPS, &variable_groups)] {
            let declared = self.relations.get(table).into_iter().flat_map(|records| records.keys());
            for uid in declared {
                let id = ElementId::new(table, uid.clone());
                if !kept.contains(&id) {
                    debug!(element = %id, "dropping group unreachable from any opportunity");
                    dropped.insert(id);
                }
            }
        }
        self.content.get_mut().retain(|id, _| !dropped.contains(id));
        self.mapping.get_mut().retain(|_, id| !dropped.contains(id));

        self.experiment_groups = experiment_groups.into_iter().collect();
        self.variable_groups = variable_groups.into_iter().collect();
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "removed unreachable groups");
        }
        Ok(dropped.len())
    }

    /// Run the data-quality checks of every group and opportunity.
    pub fn check(&self) -> Result<Vec<String>> {
        info!("Check data request metadata");
        let mut problems = Vec::new();
        info!("... Check experiments groups");
        for element in self.get_experiment_groups()? {
            problems.extend(element.check());
        }
        info!("... Check variables groups");
        for element in self.get_variable_groups()? {
            problems.extend(element.check());
        }
        info!("... Check opportunities");
        for element in self.get_opportunities()? {
            problems.extend(element.check());
        }
        Ok(problems)
    }

    pub fn software_version() -> &'static str {
        crate::VERSION
    }

    pub fn content_version(&self) -> &str {
        &self.content_version
    }

    /// Software and content versions together.
    pub fn version(&self) -> String {
        format!("Software {} - Content {}", Self::software_version(), self.content_version)
    }

    pub fn vocabulary_server(&self) -> &VocabularyServer {
        &self.vs
    }
}

fn parse_relations(document: Value) -> Result<(String, Relations)> {
    let invalid = |reason: String| QueryError::InvalidDocument {
        what: "data request",
        reason,
    };
    let Value::Object(mut document) = document else {
        return Err(invalid("the document is not an object".into()));
    };
    let version = match document.remove(VERSION_KEY) {
        Some(Value::String(version)) => version,
        _ => return Err(invalid("`version` is missing or not a string".into())),
    };
    let mut relations = Relations::new();
    for (table, records) in document {
        let Value::Object(records) = records else {
            return Err(invalid(format!("table `{table}` is not an object")));
        };
        let mut parsed = BTreeMap::new();
        for (uid, record) in records {
            let Value::Object(record) = record else {
                return Err(invalid(format!("record `{uid}` of table `{table}` is not an object")));
            };
            parsed.insert(uid, record);
        }
        relations.insert(table, parsed);
    }
    Ok((version, relations))
}

// ============================================================================
// Lookup and lazy construction
// ============================================================================

impl DataRequest {
    fn table_exists(&self, table: &str) -> bool {
        self.vs.has_table(table) || self.relations.contains_key(table)
    }

    /// Table an attribute, relation or request key refers to.
    pub fn resolve_table(&self, field: &str) -> String {
        resolve_table_name(field, |table| self.table_exists(table))
    }

    /// Find the id of the element of type `field` designated by `value`: a
    /// uid, a `link::` token or a name. Values of a type neither document
    /// knows stand for themselves.
    fn locate(&self, field: &str, value: &str) -> Result<Option<ElementId>> {
        let table = self.resolve_table(field);
        let (_, raw) = is_link(value);
        let id = ElementId::new(table.as_str(), raw);
        if self.content.borrow().contains_key(&id) {
            return Ok(Some(id));
        }
        let name_key = (table.clone(), raw.to_string());
        if let Some(found) = self.mapping.borrow().get(&name_key) {
            return Ok(Some(found.clone()));
        }

        let in_dr = self.relations.get(&table).is_some_and(|records| records.contains_key(raw));
        if in_dr || self.vs.record(&table, raw).is_some() {
            return Ok(Some(id));
        }
        if self.vs.has_table(&table) {
            let found = self
                .vs
                .find(&table, raw, IdType::NAME)?
                .map(|(uid, _)| ElementId::new(table.as_str(), uid));
            if let Some(found) = &found {
                self.mapping.borrow_mut().insert(name_key, found.clone());
            }
            return Ok(found);
        }
        if self.relations.contains_key(&table) {
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// The element with this id, built on first use.
    pub fn element(&self, id: &ElementId) -> Result<Rc<Element>> {
        let cached = self.content.borrow().get(id).cloned();
        if let Some(element) = cached {
            return Ok(element);
        }
        let element = Rc::new(self.build(id)?);
        self.content.borrow_mut().insert(id.clone(), Rc::clone(&element));
        Ok(element)
    }

    /// Find an element of type `element_type` by uid, link or name.
    pub fn try_find_element(&self, element_type: &str, value: &str) -> Result<Option<Rc<Element>>> {
        match self.locate(element_type, value)? {
            Some(id) => self.element(&id).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Self::try_find_element`], but a missing element is an error.
    pub fn find_element(&self, element_type: &str, value: &str) -> Result<Rc<Element>> {
        self.try_find_element(element_type, value)?.ok_or_else(|| {
            error!(element_type, value, "could not find element");
            QueryError::MissingReference {
                table: self.resolve_table(element_type),
                value: value.to_string(),
                id_type: "uid or name".to_string(),
            }
        })
    }

    fn build(&self, id: &ElementId) -> Result<Element> {
        let kind = ElementKind::for_table(&id.table);
        let mut attributes = BTreeMap::new();
        match self.vs.record(&id.table, &id.uid) {
            Some(record) => {
                for (key, value) in record {
                    attributes.insert(key.clone(), self.resolve_attribute(id, key, value)?);
                }
            }
            None if !self.table_exists(&id.table) => {
                attributes.insert("name".to_string(), AttrValue::Single(Resolved::Literal(id.uid.clone())));
            }
            None => {}
        }

        let mut structure = BTreeMap::new();
        if let Some(record) = self.relations.get(&id.table).and_then(|records| records.get(&id.uid)) {
            for (key, value) in record {
                let relation = kind.relation_name(key);
                if kind.relations().contains(&relation) {
                    structure.insert(relation.to_string(), self.resolve_relation(id, relation, value)?);
                } else {
                    attributes.insert(key.clone(), self.resolve_attribute(id, key, value)?);
                }
            }
        }
        for relation in kind.relations() {
            if structure.contains_key(*relation) {
                continue;
            }
            let value = if *relation == PRIORITY_LEVEL {
                self.resolve_relation(id, relation, &Value::String(DEFAULT_PRIORITY_LEVEL.to_string()))?
            } else {
                AttrValue::List(Vec::new())
            };
            structure.insert(relation.to_string(), value);
        }
        Ok(Element::new(id.clone(), attributes, structure))
    }

    /// Attribute values: only `link::` tokens are resolved.
    fn resolve_attribute(&self, owner: &ElementId, key: &str, value: &Value) -> Result<AttrValue> {
        match value {
            Value::String(text) => Ok(AttrValue::Single(self.resolve_text(owner, key, text, false)?)),
            Value::Array(items) if items.iter().all(Value::is_string) => {
                let mut resolved = Vec::with_capacity(items.len());
                for text in items.iter().filter_map(Value::as_str) {
                    resolved.push(self.resolve_text(owner, key, text, false)?);
                }
                Ok(AttrValue::List(resolved))
            }
            other => Ok(AttrValue::Scalar(other.clone())),
        }
    }

    /// Relation values: every string is a reference.
    fn resolve_relation(&self, owner: &ElementId, relation: &str, value: &Value) -> Result<AttrValue> {
        let texts: Vec<&str> = match value {
            Value::String(text) => vec![text.as_str()],
            Value::Array(items) => items
                .iter()
                .filter_map(|item| {
                    let text = item.as_str();
                    if text.is_none() {
                        warn!(element = %owner, relation, "ignoring non-text relation item");
                    }
                    text
                })
                .collect(),
            Value::Null => Vec::new(),
            other => {
                warn!(element = %owner, relation, value = %other, "ignoring malformed relation");
                Vec::new()
            }
        };
        let mut resolved = Vec::with_capacity(texts.len());
        for text in texts {
            resolved.push(self.resolve_text(owner, relation, text, true)?);
        }
        if ElementKind::is_single(relation) {
            let first = resolved
                .into_iter()
                .next()
                .unwrap_or_else(|| Resolved::Missing(UNDEFINED.to_string()));
            Ok(AttrValue::Single(first))
        } else {
            Ok(AttrValue::List(resolved))
        }
    }

    fn resolve_text(&self, owner: &ElementId, key: &str, text: &str, force: bool) -> Result<Resolved> {
        let (linked, _) = is_link(text);
        if !linked && !force {
            return Ok(Resolved::Literal(text.to_string()));
        }
        match self.locate(key, text)? {
            Some(id) => Ok(Resolved::Link(id)),
            None => {
                warn!(element = %owner, field = key, value = text, "dangling reference");
                Ok(Resolved::Missing(text.to_string()))
            }
        }
    }
}

// ============================================================================
// Listings
// ============================================================================

impl DataRequest {
    fn elements<'a>(&self, ids: impl IntoIterator<Item = &'a ElementId>) -> Result<Vec<Rc<Element>>> {
        ids.into_iter().map(|id| self.element(id)).collect()
    }

    /// Union of one relation over several elements, sorted.
    fn union_of(&self, owners: &[Rc<Element>], relation: &str) -> BTreeSet<ElementId> {
        owners
            .iter()
            .flat_map(|owner| owner.related(relation).cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn get_opportunities(&self) -> Result<Vec<Rc<Element>>> {
        self.elements(&self.opportunities)
    }

    /// Experiment groups reachable from an opportunity.
    pub fn get_experiment_groups(&self) -> Result<Vec<Rc<Element>>> {
        self.elements(&self.experiment_groups)
    }

    /// Variable groups reachable from an opportunity.
    pub fn get_variable_groups(&self) -> Result<Vec<Rc<Element>>> {
        self.elements(&self.variable_groups)
    }

    pub fn get_opportunity(&self, id: &str) -> Result<Rc<Element>> {
        self.find_element(OPPORTUNITIES, id)
    }

    pub fn get_experiment_group(&self, id: &str) -> Result<Rc<Element>> {
        self.find_element(EXPERIMENT_GROUPS, id)
    }

    pub fn get_variable_group(&self, id: &str) -> Result<Rc<Element>> {
        self.find_element(VARIABLE_GROUPS, id)
    }

    pub fn get_variables(&self) -> Result<Vec<Rc<Element>>> {
        let ids = self.union_of(&self.get_variable_groups()?, VARIABLES);
        self.elements(&ids)
    }

    pub fn get_mips(&self) -> Result<Vec<Rc<Element>>> {
        let mut ids = self.union_of(&self.get_opportunities()?, MIPS);
        ids.extend(self.union_of(&self.get_variable_groups()?, MIPS));
        self.elements(&ids)
    }

    pub fn get_experiments(&self) -> Result<Vec<Rc<Element>>> {
        let ids = self.union_of(&self.get_experiment_groups()?, EXPERIMENTS);
        self.elements(&ids)
    }

    pub fn get_data_request_themes(&self) -> Result<Vec<Rc<Element>>> {
        let ids = self.union_of(&self.get_opportunities()?, DATA_REQUEST_THEMES);
        self.elements(&ids)
    }

    /// Every element of a kind: the graph listings for the structural kinds,
    /// every record of the Vocabulary Server table otherwise.
    pub fn get_elements_per_kind(&self, element_type: &str) -> Result<Vec<Rc<Element>>> {
        let table = self.resolve_table(element_type);
        match table.as_str() {
            OPPORTUNITIES => self.get_opportunities(),
            EXPERIMENT_GROUPS => self.get_experiment_groups(),
            VARIABLE_GROUPS => self.get_variable_groups(),
            VARIABLES => self.get_variables(),
            EXPERIMENTS => self.get_experiments(),
            DATA_REQUEST_THEMES => self.get_data_request_themes(),
            MIPS => self.get_mips(),
            _ => {
                debug!(%table, "listing elements from the vocabulary server");
                let (table, uids) = self.vs.get_element_type_ids(&table)?;
                let ids: Vec<ElementId> = uids.into_iter().map(|uid| ElementId::new(table.as_str(), uid)).collect();
                self.elements(&ids)
            }
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

impl DataRequest {
    /// Elements of `element_type` related to the requested values.
    ///
    /// Each requested value yields a hit-set; hit-sets are united (`Any`) or
    /// intersected (`All`). Without any request every element is returned.
    /// A value that cannot be found is an error unless `skip_if_missing`.
    pub fn filter_elements_per_request(
        &self,
        element_type: &str,
        requests: &Requests,
        operation: Operation,
        skip_if_missing: bool,
    ) -> Result<Vec<Rc<Element>>> {
        let mut resolved: Vec<(&str, Rc<Element>)> = Vec::new();
        for (relation, values) in requests.iter() {
            for value in values {
                let element = match value {
                    RequestValue::Element(element) => Some(Rc::clone(element)),
                    RequestValue::Text(text) => self.try_find_element(relation, text)?,
                };
                match element {
                    Some(element) => resolved.push((relation, element)),
                    None if skip_if_missing => {
                        warn!(%value, element_type = relation, "could not find value, skip it");
                    }
                    None => {
                        error!(%value, element_type = relation, "could not find value");
                        return Err(QueryError::MissingReference {
                            table: self.resolve_table(relation),
                            value: value.to_string(),
                            id_type: "uid or name".to_string(),
                        });
                    }
                }
            }
        }

        let elements = self.get_elements_per_kind(element_type)?;
        if resolved.is_empty() {
            return Ok(elements);
        }

        let mut selected: Option<BTreeSet<ElementId>> = match operation {
            Operation::Any => Some(BTreeSet::new()),
            Operation::All => None,
        };
        for (relation, value) in &resolved {
            let mut hits = BTreeSet::new();
            for candidate in &elements {
                if self.matches(element_type, relation, candidate, value)? {
                    hits.insert(candidate.id().clone());
                }
            }
            selected = Some(match (operation, selected) {
                (Operation::Any, Some(acc)) => acc.union(&hits).cloned().collect(),
                (Operation::All, Some(acc)) => acc.intersection(&hits).cloned().collect(),
                (_, None) => hits,
            });
        }
        let selected = selected.unwrap_or_default();

        let mut result: Vec<Rc<Element>> = elements
            .into_iter()
            .filter(|element| selected.contains(element.id()))
            .collect();
        result.sort();
        Ok(result)
    }

    fn matches(&self, element_type: &str, relation: &str, candidate: &Element, request: &Element) -> Result<bool> {
        for strategy in STRATEGIES {
            if let Some(matched) = strategy.apply(self, candidate, request)? {
                return Ok(matched);
            }
        }
        error!(element_type, request = relation, "could not filter");
        Err(QueryError::InapplicableFilter {
            element_type: element_type.to_string(),
            request: relation.to_string(),
        })
    }

    fn find_per(&self, element_type: &str, relation: &str, value: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        let requests = Requests::new().with(relation, value);
        self.filter_elements_per_request(element_type, &requests, Operation::All, false)
    }

    pub fn find_opportunities(&self, requests: &Requests, operation: Operation, skip_if_missing: bool) -> Result<Vec<Rc<Element>>> {
        self.filter_elements_per_request(OPPORTUNITIES, requests, operation, skip_if_missing)
    }

    pub fn find_experiments(&self, requests: &Requests, operation: Operation, skip_if_missing: bool) -> Result<Vec<Rc<Element>>> {
        self.filter_elements_per_request(EXPERIMENTS, requests, operation, skip_if_missing)
    }

    pub fn find_variables(&self, requests: &Requests, operation: Operation, skip_if_missing: bool) -> Result<Vec<Rc<Element>>> {
        self.filter_elements_per_request(VARIABLES, requests, operation, skip_if_missing)
    }

    pub fn find_variables_per_priority(&self, priority: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(VARIABLES, PRIORITY_LEVEL, priority)
    }

    pub fn find_opportunities_per_theme(&self, theme: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(OPPORTUNITIES, DATA_REQUEST_THEMES, theme)
    }

    pub fn find_experiments_per_theme(&self, theme: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(EXPERIMENTS, DATA_REQUEST_THEMES, theme)
    }

    pub fn find_variables_per_theme(&self, theme: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(VARIABLES, DATA_REQUEST_THEMES, theme)
    }

    pub fn find_mips_per_theme(&self, theme: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(MIPS, DATA_REQUEST_THEMES, theme)
    }

    pub fn find_themes_per_opportunity(&self, opportunity: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(DATA_REQUEST_THEMES, OPPORTUNITIES, opportunity)
    }

    pub fn find_experiments_per_opportunity(&self, opportunity: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(EXPERIMENTS, OPPORTUNITIES, opportunity)
    }

    pub fn find_variables_per_opportunity(&self, opportunity: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(VARIABLES, OPPORTUNITIES, opportunity)
    }

    pub fn find_mips_per_opportunity(&self, opportunity: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(MIPS, OPPORTUNITIES, opportunity)
    }

    pub fn find_opportunities_per_variable(&self, variable: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(OPPORTUNITIES, VARIABLES, variable)
    }

    pub fn find_themes_per_variable(&self, variable: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(DATA_REQUEST_THEMES, VARIABLES, variable)
    }

    pub fn find_mips_per_variable(&self, variable: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(MIPS, VARIABLES, variable)
    }

    pub fn find_opportunities_per_experiment(&self, experiment: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(OPPORTUNITIES, EXPERIMENTS, experiment)
    }

    pub fn find_themes_per_experiment(&self, experiment: impl Into<RequestValue>) -> Result<Vec<Rc<Element>>> {
        self.find_per(DATA_REQUEST_THEMES, EXPERIMENTS, experiment)
    }

    /// Sort by successive attributes: group on the first one, order the
    /// groups by its text, and recurse into each group. Ties end up ordered
    /// by uid.
    pub fn sort_func(&self, items: &[Rc<Element>], attributes: &[&str]) -> Vec<Rc<Element>> {
        let Some((first, rest)) = attributes.split_first() else {
            let mut sorted = items.to_vec();
            sorted.sort_by(|a, b| a.uid().cmp(b.uid()));
            return sorted;
        };
        let mut groups: BTreeMap<String, Vec<Rc<Element>>> = BTreeMap::new();
        for item in items {
            groups.entry(item.text(self, first)).or_default().push(Rc::clone(item));
        }
        groups
            .into_values()
            .flat_map(|group| self.sort_func(&group, rest))
            .collect()
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec!["Data Request content:".to_string()];
        let sections: [(&str, &[ElementId]); 3] = [
            ("Experiments groups:", self.experiment_groups.as_slice()),
            ("Variables groups:", self.variable_groups.as_slice()),
            ("Opportunities:", self.opportunities.as_slice()),
        ];
        for (title, ids) in sections {
            lines.push(format!("    {title}"));
            for id in ids {
                match self.element(id) {
                    Ok(element) => lines.extend(element.print_content(self, 2, true)),
                    Err(err) => warn!(element = %id, %err, "could not print element"),
                }
            }
        }
        f.write_str(&lines.join("\n"))
    }
}
