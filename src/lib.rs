/*!
# SheetPlot

A small browser application for looking at tabular data, built in Rust.

## Overview

Upload one or more CSV or Excel files and each one is previewed as a table
with a set of chart selectors underneath. Pick a plot type and two columns,
press "Create Graph", and the server answers with a rendered chart.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, plain JavaScript
- **Key Components**:
  - Upload area - Drag-and-drop or click-to-select, multiple files at once
  - Preview blocks - File name, upload time, selectors and a paged table
  - Chart area - SVG returned by the server

### Backend Layer
- **Technologies**: Rust, axum
- **Core Components**:
  - Upload Decoder - Turns data-URL payloads into datasets (CSV by `csv`, Excel by `calamine`)
  - Dataset - Typed, rectangular table with unique column names
  - Selection - Plot type, aggregate and column choices
  - Chart Builder - Maps a complete selection to a chart spec
  - Renderer - Draws scatter, line, box and histogram charts with `plotters`
  - Session Store - One current dataset and selection per browser session

### Data Persistence Layer
- Datasets are handed to the page as gzip-compressed bincode tokens
- Nothing is written to disk

## Modules

- **config**: Server settings
- **dataset**: Typed table model
- **decoder**: Upload decoding and per-file outcomes
- **selection**: Selector values and options
- **graph**: Chart spec building and SVG rendering
- **saving**: Dataset tokens
- **session**: Per-session state
- **preview**: HTML fragments (web feature)
- **app**: Routing and middleware (web feature)

## REST API Endpoints

- `/api/upload` - Decodes a batch of data-URL files
- `/api/upload/multipart` - Same, for multipart form uploads
- `/api/preview?page=n` - One page of the current dataset
- `/api/preview` (POST) - One page of the dataset behind a preview block's token
- `/api/options` - Selector options for the current dataset
- `/api/selection` - Reads or replaces the selector values
- `/api/graph` - The "Create Graph" button
- `/api/state` - Session phase
*/

pub mod config;
pub mod dataset;
pub mod decoder;
pub mod graph;
pub mod saving;
pub mod selection;
pub mod session;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod preview;

pub use config::ServerConfig;
pub use dataset::{CellValue, TabularDataset};
pub use decoder::{DecodeError, FileOutcome, UploadedFile};
pub use graph::{ChartKind, ChartOutcome, ChartSpec};
pub use selection::{AggregateFunction, PlotType, SelectionState, SelectorOptions};
pub use session::{SessionPhase, SessionStore};
