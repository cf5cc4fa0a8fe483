pub mod client_server;
pub mod compare;
pub mod global;
pub mod property_bag;
#[allow(clippy::module_inception)]
pub mod state;

pub use client_server::{ClientServerState, ClientServerStatus};
pub use compare::{canonical_form, deep_equals, deep_equals_with, hash_of, hash_of_with, NumericEquality};
pub use global::GlobalState;
pub use property_bag::{format_timespan, parse_timespan, FromProperty, PropertyBag, PropertyValue};
pub use state::{State, StateRecord, CLIENT_SERVER_STATE, GLOBAL_STATE, TEMP_STATE};
