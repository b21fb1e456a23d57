//! Use cases behind the connections HTTP surface

pub mod connections;

pub use connections::{
    ConnectionPage, ConnectionService, ConnectionStatistics, ConnectionView, LogPage,
    ServiceError, TemplateCatalog, TestOverrides, UnsavedTest,
};
