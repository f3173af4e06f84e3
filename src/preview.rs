use crate::dataset::TabularDataset;
use crate::decoder::{FileOutcome, GENERIC_ERROR_MESSAGE};
use crate::graph::ChartSpec;
use crate::selection::SelectorOptions;
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;
use serde_json::json;

/// Rows shown per page of the preview table
pub const PAGE_SIZE: usize = 15;

/// One page of a dataset, flattened to display strings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TablePage {
    /// Zero-based page index
    pub page: usize,
    pub page_count: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TablePage {
    /// Cuts page `page` out of `dataset`; indexes past the end show the last page
    pub fn from_dataset(dataset: &TabularDataset, page: usize) -> Self {
        let page_count = dataset.page_count(PAGE_SIZE);
        let page = page.min(page_count - 1);

        TablePage {
            page,
            page_count,
            page_size: PAGE_SIZE,
            total_rows: dataset.row_count(),
            columns: dataset.columns().to_vec(),
            rows: dataset
                .page(page, PAGE_SIZE)
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }
}

/// Renders the HTML fragments returned to the page
pub struct PreviewRenderer {
    registry: Handlebars<'static>,
}

impl PreviewRenderer {
    /// Registers the bundled templates
    ///
    /// # Errors
    /// * Returns a `TemplateError` if a bundled template does not parse
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_template_string("preview", include_str!("./templates/preview.hbs"))?;
        registry.register_template_string("error", include_str!("./templates/error.hbs"))?;
        registry.register_template_string("chart", include_str!("./templates/chart.hbs"))?;
        registry.register_template_string("table", include_str!("./templates/table.hbs"))?;
        registry.register_partial("table", include_str!("./templates/table.hbs"))?;

        Ok(Self { registry })
    }

    /// Preview block for one uploaded file
    ///
    /// A decoded file gets its selectors and the first page of its table; a
    /// failed one gets the generic error message instead.
    pub fn file_block(&self, outcome: &FileOutcome) -> Result<String, RenderError> {
        match &outcome.result {
            Ok(dataset) => {
                let data = json!({
                    "filename": outcome.filename,
                    "uploaded_at": outcome
                        .modified_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                    "options": SelectorOptions::from_dataset(Some(dataset)),
                    "table": TablePage::from_dataset(dataset, 0),
                });
                self.registry.render("preview", &data)
            }
            Err(_) => self.registry.render(
                "error",
                &json!({
                    "filename": outcome.filename,
                    "message": GENERIC_ERROR_MESSAGE,
                }),
            ),
        }
    }

    pub fn table(&self, page: &TablePage) -> Result<String, RenderError> {
        self.registry.render("table", page)
    }

    /// Chart fragment; `svg` is embedded as-is when present
    pub fn chart(&self, spec: &ChartSpec, svg: Option<&str>) -> Result<String, RenderError> {
        self.registry.render(
            "chart",
            &json!({
                "kind": spec.kind,
                "x_column": spec.x_column,
                "y_column": spec.y_column,
                "svg": svg,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CellValue;
    use crate::decoder::{DecodeError, decode_bytes};
    use crate::graph::ChartKind;

    fn outcome(filename: &str, bytes: &[u8]) -> FileOutcome {
        FileOutcome {
            filename: filename.to_string(),
            modified_at: None,
            result: decode_bytes(bytes, filename),
        }
    }

    #[test]
    fn table_pages_are_clamped() {
        let rows = (0..20).map(|i| vec![CellValue::Int(i)]).collect();
        let dataset = TabularDataset::new(vec!["n".to_string()], rows).unwrap();

        let first = TablePage::from_dataset(&dataset, 0);
        assert_eq!(first.rows.len(), 15);
        assert_eq!(first.page_count, 2);
        assert_eq!(first.total_rows, 20);

        let past_end = TablePage::from_dataset(&dataset, 9);
        assert_eq!(past_end.page, 1);
        assert_eq!(past_end.rows.len(), 5);
        assert_eq!(past_end.rows[0], vec!["15".to_string()]);
    }

    #[test]
    fn renders_selectors_and_table_for_decoded_file() {
        let renderer = PreviewRenderer::new().unwrap();
        let html = renderer
            .file_block(&outcome("pets.csv", b"animal,weight\ncat,4\ndog,<b>12</b>\n"))
            .unwrap();

        assert!(html.contains("pets.csv"));
        assert!(html.contains("<option value=\"boxplot\">boxplot</option>"));
        assert!(html.contains("<option value=\"Average\">Average</option>"));
        assert!(html.contains("<th>animal</th>"));
        assert!(html.contains("<td>cat</td>"));
        assert!(html.contains("Create Graph"));
        // cell text is escaped
        assert!(html.contains("&lt;b&gt;12&lt;/b&gt;"));
    }

    #[test]
    fn renders_generic_message_for_failed_file() {
        let renderer = PreviewRenderer::new().unwrap();
        let failed = outcome("notes.txt", b"whatever");
        assert!(matches!(failed.result, Err(DecodeError::UnsupportedFormat(_))));

        let html = renderer.file_block(&failed).unwrap();
        assert!(html.contains(GENERIC_ERROR_MESSAGE));
        assert!(!html.contains("<table"));
    }

    #[test]
    fn embeds_svg_in_chart_fragment() {
        let renderer = PreviewRenderer::new().unwrap();
        let spec = ChartSpec {
            kind: ChartKind::Histogram,
            x_column: "a".to_string(),
            y_column: "b".to_string(),
            bin_count: Some(50),
        };

        let html = renderer.chart(&spec, Some("<svg></svg>")).unwrap();
        assert!(html.contains("data-kind=\"histogram\""));
        assert!(html.contains("<svg></svg>"));

        let html = renderer.chart(&spec, None).unwrap();
        assert!(html.contains("No numeric data to plot."));
    }
}
