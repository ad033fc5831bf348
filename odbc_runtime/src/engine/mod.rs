pub mod catalog;
pub mod connection;
pub mod environment;
pub mod info;
pub mod statement;
pub mod transaction;

pub use catalog::{IndexScope, RowIdScope, SpecialColumns};
pub use connection::Connection;
pub use environment::{
    ConnectionPooling, DataSource, DriverDescription, Environment, PoolingMatch,
};
pub use info::{InfoKind, InfoValue};
pub use statement::{
    ColumnDescriptor, Concurrency, CursorType, FetchDirection, ParamDescriptor, ParamIo, Statement,
};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
