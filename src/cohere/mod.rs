mod api;
mod model;

pub use model::{CohereModel, CohereOptions};
