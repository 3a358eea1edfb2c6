//! Tabular projections of a filtered, sorted element list.

use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::data_request::DataRequest;
use crate::element::Element;
use crate::error::Result;
use crate::filter::{Operation, Requests};

pub const DEFAULT_SEPARATOR: char = ';';

/// The filter applied before exporting.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub requests: Requests,
    pub operation: Operation,
    pub skip_if_missing: bool,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            requests: Requests::new(),
            operation: Operation::All,
            skip_if_missing: false,
        }
    }
}

/// Which attributes sort and title the lines and columns of a summary.
#[derive(Debug, Clone)]
pub struct SummaryLayout {
    pub sorting_line: String,
    pub title_line: String,
    pub sorting_column: String,
    pub title_column: String,
}

impl Default for SummaryLayout {
    fn default() -> Self {
        Self {
            sorting_line: "id".to_string(),
            title_line: "name".to_string(),
            sorting_column: "id".to_string(),
            title_column: "name".to_string(),
        }
    }
}

/// A header row followed by data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn to_delimited(&self, separator: char) -> String {
        let sep = separator.to_string();
        std::iter::once(&self.header)
            .chain(&self.rows)
            .map(|row| row.join(sep.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for TextTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_delimited(DEFAULT_SEPARATOR))
    }
}

impl DataRequest {
    /// One line per element of `main_data` matching `filter`, sorted by
    /// `sorting`, with an `id` column followed by `columns`.
    pub fn export_data(
        &self,
        main_data: &str,
        filter: &FilterSpec,
        columns: &[&str],
        sorting: &[&str],
    ) -> Result<TextTable> {
        let filtered = self.filter_elements_per_request(main_data, &filter.requests, filter.operation, filter.skip_if_missing)?;
        let sorted = self.sort_func(&filtered, sorting);

        let header: Vec<String> = std::iter::once("id").chain(columns.iter().copied()).map(String::from).collect();
        let rows = sorted
            .iter()
            .map(|element| header.iter().map(|key| element.text(self, key)).collect())
            .collect();
        Ok(TextTable { header, rows })
    }

    /// Cross table of `lines_data` against `columns_data`: a cell holds `x`
    /// when the line element is related to the column element.
    pub fn export_summary(
        &self,
        lines_data: &str,
        columns_data: &str,
        filter: &FilterSpec,
        layout: &SummaryLayout,
    ) -> Result<TextTable> {
        debug!(lines = lines_data, columns = columns_data, "generate summary");
        let filtered = self.filter_elements_per_request(lines_data, &filter.requests, filter.operation, filter.skip_if_missing)?;
        let lines = self.sort_func(&filtered, &[layout.sorting_line.as_str()]);
        let columns = self.filter_elements_per_request(columns_data, &Requests::new(), Operation::All, false)?;
        let columns = self.sort_func(&columns, &[layout.sorting_column.as_str()]);
        debug!(lines = lines.len(), columns = columns.len(), "summary dimensions");

        let mut header = vec![format!(
            "{lines_data} {} / {columns_data} {}",
            layout.title_line, layout.title_column
        )];
        header.extend(columns.iter().map(|column| column.text(self, &layout.title_column)));

        let mut cells: Vec<Vec<String>> = vec![Vec::with_capacity(columns.len()); lines.len()];
        for column in &columns {
            let requests = Requests::new().with(column.element_type(), column);
            let related: Vec<Rc<Element>> = self.filter_elements_per_request(lines_data, &requests, Operation::All, false)?;
            for (line, row) in lines.iter().zip(cells.iter_mut()) {
                let mark = if related.contains(line) { "x" } else { "" };
                row.push(mark.to_string());
            }
        }

        let rows = lines
            .iter()
            .zip(cells)
            .map(|(line, marks)| {
                let mut row = vec![line.text(self, &layout.title_line)];
                row.extend(marks);
                row
            })
            .collect();
        Ok(TextTable { header, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dr() -> DataRequest {
        let vs = json!({
            "version": "v",
            "variables": {
                "v1": {"name": "Amon.tas", "title": "Air temperature"},
                "v2": {"name": "Omon.tos", "title": "Sea surface temperature"}
            },
            "opportunities": {
                "o1": {"name": "Atmosphere"},
                "o2": {"name": "Ocean"}
            }
        });
        let dr = json!({
            "version": "v",
            "variable_groups": {
                "g1": {"variables": ["link::v1"], "priority_level": "High"},
                "g2": {"variables": ["link::v2"], "priority_level": "Medium"}
            },
            "opportunities": {
                "o1": {"variable_groups": ["link::g1"]},
                "o2": {"variable_groups": ["link::g1", "link::g2"]}
            }
        });
        DataRequest::from_separated_inputs(dr, vs).unwrap()
    }

    #[test]
    fn data_export_prepends_the_id_column() {
        let dr = dr();
        let filter = FilterSpec {
            requests: Requests::new().with("opportunities", "Ocean"),
            ..FilterSpec::default()
        };
        let table = dr.export_data("variables", &filter, &["name", "title"], &["title"]).unwrap();
        assert_eq!(
            table.to_string(),
            "id;name;title\nv1;Amon.tas;Air temperature\nv2;Omon.tos;Sea surface temperature"
        );
    }

    #[test]
    fn summary_marks_related_pairs() {
        let dr = dr();
        let table = dr
            .export_summary("variables", "opportunities", &FilterSpec::default(), &SummaryLayout::default())
            .unwrap();
        assert_eq!(table.header, vec!["variables name / opportunities name", "Atmosphere", "Ocean"]);
        assert_eq!(
            table.rows,
            vec![vec!["Amon.tas", "x", "x"], vec!["Omon.tos", "", "x"]]
        );
    }
}
