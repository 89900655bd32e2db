pub mod error;
pub mod logging;
pub mod config;
pub mod buffer;
pub mod arrays;
pub mod fills;
pub mod broadcast;
pub mod units;
pub mod hybrid;
pub mod product;
pub mod source;
pub mod ingestion;

#[cfg(test)]
pub(crate) mod test_utils;
