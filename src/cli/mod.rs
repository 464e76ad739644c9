pub mod list;
pub mod migrate;
pub mod setup;
pub mod ui;
