pub mod api;
pub mod control;
pub mod gpio;
pub mod host;
pub mod logging;
pub mod relay;
pub mod store;
pub mod thermometer;
