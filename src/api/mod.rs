mod error;
pub mod models;
pub mod proxy;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;

pub use error::ApiError;
pub use server::{router, run};
