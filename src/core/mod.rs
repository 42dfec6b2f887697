mod engine;
mod error;
mod types;

pub use engine::{monthly_rate_from_annual, simulate, summarize};
pub use error::ProjectionError;
pub use types::{
    AdminFee, FundState, MonthRecord, Projection, ProjectionSummary, ProjectionWarning,
    SimulationConfig,
};
