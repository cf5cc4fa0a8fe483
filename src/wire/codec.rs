//! JSON encoding for everything that crosses the transport.
//!
//! Decoding parses to a `serde_json::Value`, validates it against the payload's
//! schema and only then builds the typed value, so malformed input is reported
//! as a schema failure naming the payload rather than a serde error.

use crate::core::errors::{LockstepError, Result};
use crate::instructions::instruction::{ClientServerRequest, Instruction};
use crate::state::{ClientServerState, State};
use crate::wire::envelope::Item;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

lazy_static! {
    static ref PROPERTY_BAG_SCHEMA: Value = json!({
        "type": ["object", "null"],
        "additionalProperties": { "type": ["string", "number", "boolean", "null"] }
    });

    static ref INSTRUCTION_SCHEMA: Value = json!({
        "type": "object",
        "required": ["type"],
        "properties": {
            "type": { "type": ["string", "integer"] },
            "properties": PROPERTY_BAG_SCHEMA.clone(),
            "components": {
                "type": ["array", "null"],
                "items": {
                    "type": "object",
                    "required": ["type"],
                    "properties": {
                        "type": { "type": "string", "minLength": 1 },
                        "parameters": PROPERTY_BAG_SCHEMA.clone()
                    }
                }
            }
        }
    });

    static ref STATE_SCHEMA: Value = json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "properties": PROPERTY_BAG_SCHEMA.clone()
        }
    });

    static ref CLIENT_SERVER_STATE_SCHEMA: Value = json!({
        "type": "object",
        "required": ["properties"],
        "properties": {
            "name": { "type": "string" },
            "properties": {
                "type": "object",
                "minProperties": 1,
                "additionalProperties": { "type": ["string", "number", "boolean", "null"] }
            }
        }
    });
}

fn item_schema(definition: &Value) -> Value {
    json!({
        "type": "object",
        "required": ["id", "created", "lastModified", "definition"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "created": { "type": "string" },
            "lastModified": { "type": "string" },
            "definition": definition
        }
    })
}

/// A schema compiled once. Compilation errors are kept and reported on use.
type CompiledSchema = std::result::Result<jsonschema::Validator, String>;

fn compile(schema: &Value) -> CompiledSchema {
    jsonschema::validator_for(schema).map_err(|e| e.to_string())
}

lazy_static! {
    static ref INSTRUCTION_VALIDATOR: CompiledSchema = compile(&INSTRUCTION_SCHEMA);
    static ref STATE_VALIDATOR: CompiledSchema = compile(&STATE_SCHEMA);
    static ref CLIENT_SERVER_STATE_VALIDATOR: CompiledSchema = compile(&CLIENT_SERVER_STATE_SCHEMA);
    static ref STATE_ITEM_VALIDATOR: CompiledSchema = compile(&item_schema(&STATE_SCHEMA));
    static ref INSTRUCTION_ITEM_VALIDATOR: CompiledSchema = compile(&item_schema(&INSTRUCTION_SCHEMA));
}

/// Validate `value` against `schema`, naming `payload` in the error. The
/// schema is compiled on every call; the decoders below use cached ones.
pub fn validate(payload: &str, schema: &Value, value: &Value) -> Result<()> {
    check(payload, &compile(schema), value)
}

fn check(payload: &str, compiled: &CompiledSchema, value: &Value) -> Result<()> {
    let validator = compiled.as_ref().map_err(|e| {
        LockstepError::schema_validation(payload, format!("schema does not compile: {}", e))
    })?;
    if let Err(error) = validator.validate(value) {
        warn!(payload, error = %error, "payload failed schema validation");
        return Err(LockstepError::schema_validation(payload, error.to_string()));
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(payload: &str, compiled: &CompiledSchema, json: &str) -> Result<T> {
    let value: Value = serde_json::from_str(json)?;
    check(payload, compiled, &value)?;
    Ok(serde_json::from_value(value)?)
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn instruction_from_json(json: &str) -> Result<Instruction> {
    decode("Instruction", &INSTRUCTION_VALIDATOR, json)
}

pub fn request_from_json(json: &str) -> Result<ClientServerRequest> {
    decode("ClientServerRequest", &INSTRUCTION_VALIDATOR, json)
}

pub fn state_from_json(json: &str) -> Result<State> {
    decode("State", &STATE_VALIDATOR, json)
}

/// Decodes the generic shape first so a missing or unknown `Status` surfaces
/// as a property error rather than a serde message.
pub fn client_server_state_from_json(json: &str) -> Result<ClientServerState> {
    let state: State = decode("ClientServerState", &CLIENT_SERVER_STATE_VALIDATOR, json)?;
    ClientServerState::from_state(state)
}

pub fn state_item_from_json(json: &str) -> Result<Item<State>> {
    decode("Item<State>", &STATE_ITEM_VALIDATOR, json)
}

pub fn instruction_item_from_json(json: &str) -> Result<Item<Instruction>> {
    decode("Item<Instruction>", &INSTRUCTION_ITEM_VALIDATOR, json)
}
