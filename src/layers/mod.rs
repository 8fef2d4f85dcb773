pub mod traits;
pub mod linear;
pub mod lstm;

pub use traits::Parameterized;
pub use linear::{Linear, LinearCache, LinearGrads};
pub use lstm::{LstmCell, LstmGrads, LstmStepCache, LstmStepGrads};
