pub mod changeset;
pub mod ports;
pub mod schema;
pub mod snapshot;
pub mod sql_type;
