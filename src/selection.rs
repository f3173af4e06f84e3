use crate::dataset::TabularDataset;
use serde::{Deserialize, Serialize};

/// Plot types offered by the "Select Plot Type" dropdown
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlotType {
    #[serde(rename = "scatterplot")]
    Scatter,
    #[serde(rename = "lineplot")]
    Line,
    #[serde(rename = "boxplot")]
    Box,
    #[serde(rename = "histogram")]
    Histogram,
}

impl PlotType {
    pub const ALL: [PlotType; 4] = [
        PlotType::Scatter,
        PlotType::Line,
        PlotType::Box,
        PlotType::Histogram,
    ];

    /// Value the dropdown submits for this plot type
    pub fn value(&self) -> &'static str {
        match self {
            PlotType::Scatter => "scatterplot",
            PlotType::Line => "lineplot",
            PlotType::Box => "boxplot",
            PlotType::Histogram => "histogram",
        }
    }

    /// Parses a submitted dropdown value; unknown values yield `None`
    pub fn from_value(value: &str) -> Option<Self> {
        PlotType::ALL.into_iter().find(|p| p.value() == value)
    }
}

/// Aggregate functions offered by the "Aggregate" dropdown
///
/// These are collected with the rest of the selection but charts do not
/// apply them yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    Minimum,
    Maximum,
    Average,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 3] = [
        AggregateFunction::Minimum,
        AggregateFunction::Maximum,
        AggregateFunction::Average,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AggregateFunction::Minimum => "Minimum",
            AggregateFunction::Maximum => "Maximum",
            AggregateFunction::Average => "Average",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        AggregateFunction::ALL
            .into_iter()
            .find(|a| a.label() == label)
    }
}

/// The options currently chosen in the selectors
///
/// Nothing is selected by default. Column names are not checked when set;
/// a name that is not in the dataset is tolerated and only matters when a
/// chart is built.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionState {
    pub plot_type: Option<PlotType>,
    pub group_by: Option<String>,
    pub aggregate: Option<AggregateFunction>,
    pub x_column: Option<String>,
    pub y_column: Option<String>,
}

impl SelectionState {
    /// True when no selector has a value
    pub fn is_empty(&self) -> bool {
        self.plot_type.is_none()
            && self.group_by.is_none()
            && self.aggregate.is_none()
            && self.x_column.is_none()
            && self.y_column.is_none()
    }

    /// True when both axis columns are chosen
    pub fn is_complete(&self) -> bool {
        self.x_column.is_some() && self.y_column.is_some()
    }

    /// Clears every column choice that `dataset` does not have
    ///
    /// # Returns
    /// * The names of the cleared columns
    pub fn retain_columns(&mut self, dataset: &TabularDataset) -> Vec<String> {
        let mut cleared = Vec::new();
        for slot in [&mut self.x_column, &mut self.y_column, &mut self.group_by] {
            if let Some(name) = slot.as_ref() {
                if !dataset.has_column(name) {
                    cleared.extend(slot.take());
                }
            }
        }
        cleared
    }
}

/// One entry of a dropdown
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionItem {
    pub label: String,
    pub value: String,
}

impl OptionItem {
    fn same(text: &str) -> Self {
        OptionItem {
            label: text.to_string(),
            value: text.to_string(),
        }
    }
}

/// The choices each selector offers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SelectorOptions {
    pub plot_types: Vec<OptionItem>,
    pub aggregates: Vec<OptionItem>,
    pub group_by: Vec<OptionItem>,
    pub x_columns: Vec<OptionItem>,
    pub y_columns: Vec<OptionItem>,
}

impl SelectorOptions {
    /// Derives the selector choices from the current dataset
    ///
    /// Column selectors list the dataset's columns in dataset order, or
    /// nothing when there is no dataset. Always computed from the dataset
    /// itself so it cannot drift from what is stored.
    pub fn from_dataset(dataset: Option<&TabularDataset>) -> Self {
        let columns: Vec<OptionItem> = dataset
            .map(|d| d.columns().iter().map(|c| OptionItem::same(c)).collect())
            .unwrap_or_default();

        SelectorOptions {
            plot_types: PlotType::ALL
                .iter()
                .map(|p| OptionItem::same(p.value()))
                .collect(),
            aggregates: AggregateFunction::ALL
                .iter()
                .map(|a| OptionItem::same(a.label()))
                .collect(),
            group_by: columns.clone(),
            x_columns: columns.clone(),
            y_columns: columns,
        }
    }
}
