pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod minc;
pub mod pipeline;
pub mod scratch;
pub mod search;

pub use cancel::CancelToken;
pub use config::{Config, SearchConfig};
pub use error::{AlignError, Result};
pub use pipeline::*;
pub use scratch::ScratchDir;
pub use search::{RotationalSearch, SearchRequest};
