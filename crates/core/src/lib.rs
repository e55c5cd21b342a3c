pub mod config;
pub mod distance;
pub mod error;
pub mod vector;

pub use config::{env_opt, env_parse, load_dotenv};
pub use distance::DistanceMeasure;
pub use error::CoreError;
pub use vector::Vector;
