// 查询核心模块
//
// 架构：
// ┌─────────────────────────────────────────────────────────────┐
// │                      Query Layer                            │
// │                                                             │
// │  raw params ──► params::merge ──► ParameterSet              │
// │                    │ (coerce)          │                    │
// │                    ▼                   ▼                    │
// │             registry::lookup ──► QueryDefinition            │
// │                                        │ build_pipeline     │
// │                                        ▼                    │
// │                                  Vec<Stage>                 │
// │                                        │                    │
// │                              executor ─┴─► DocumentStore    │
// └─────────────────────────────────────────────────────────────┘

pub mod executor;
pub mod params;
pub mod pipeline;
pub mod registry;

pub use executor::{parse_filter, Clock, QueryExecutor, LEGACY_COLLECTIONS, LEGACY_FIELDS};
pub use params::{coerce, merge, ParamValue, ParameterSet};
pub use pipeline::{to_documents, PipelineTemplate, Stage, RAW_ROW_LIMIT};
pub use registry::{DefaultWindow, QueryDefinition, QueryRegistry, VALUES, VALUES_COUNT, VALUES_PER_DEVICE};
