pub mod codec;
pub mod envelope;

pub use codec::{
    client_server_state_from_json, instruction_from_json, instruction_item_from_json,
    request_from_json, state_from_json, state_item_from_json, to_json,
};
pub use envelope::Item;
