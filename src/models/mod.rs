pub mod feature;
pub mod indicator;
pub mod period;
pub mod security;
pub mod stat;

pub use feature::{FeatureVector, FeatureVectorRaw};
pub use indicator::{last_jd_cross, IndicatorPoint, KdjSlice, KdjWindow, Probe};
pub use period::{PeriodType, Side};
pub use security::{PriceBar, Security};
pub use stat::ScoringStat;
