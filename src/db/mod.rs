pub mod comparator;
pub mod connectors;
pub mod generator;
pub mod migrator;
pub mod ordering;
pub mod registry;
pub mod schema;
pub mod splitter;
pub mod sql_generator;
pub mod type_mapper;
