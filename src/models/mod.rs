// Domain models: poll facts and chart request/result shapes

mod chart;
mod sample;

pub use chart::{ChartData, ChartKey, ChartRequest, RankEntry, Series, ServerFilter};
pub use sample::{Cooldown, Sample, SampleFact, ServerAddr};
