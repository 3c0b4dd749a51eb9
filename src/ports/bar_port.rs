//! Bar stream port.

use crate::domain::bar::Bar;
use crate::domain::error::QuantlabError;

pub trait BarPort {
    /// Bars in timestamp order, indicators and regime labels already attached.
    fn load_bars(&self) -> Result<Vec<Bar>, QuantlabError>;
}
