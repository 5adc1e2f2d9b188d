pub mod error;
pub mod models;
pub mod zone_mapper;
pub mod data_loader;
pub mod processing;
pub mod figure;
pub mod capacity_factor;
pub mod curtailment;
pub mod ramping;
pub mod transmission;
pub mod generation_unstack;

pub use error::{PlotError, Result};
pub use models::{DateRange, GroupBy, PlotArgs, PlotContext, SummaryTable, TimeSeriesTable};
pub use data_loader::{DataLoader, MetaData, PropertyRequest};
pub use zone_mapper::RegionMapping;
pub use figure::{DataTable, FigureData, MethodOutput, PlotResult, ZoneOutput};
