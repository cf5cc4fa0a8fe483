//! Instruction model and wire codec

use lockstep::instructions::{ClientServerRequest, Instruction, InstructionsType, ProfilerInstructions};
use lockstep::state::{PropertyBag, PropertyValue};
use lockstep::wire::{self, Item};
use lockstep::LockstepError;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn test_profiling_request_keeps_string_duration() {
    let request = ClientServerRequest::new(
        InstructionsType::Profiling,
        PropertyBag::new().with("duration", "60"),
    )
    .unwrap();

    let json = wire::to_json(&request).unwrap();
    let decoded = wire::request_from_json(&json).unwrap();

    assert_eq!(decoded.kind(), InstructionsType::Profiling);
    assert_eq!(
        decoded.parameters().try_get("duration"),
        Some(&PropertyValue::String("60".to_string()))
    );
    assert_eq!(decoded, request);
}

#[test]
fn test_request_wire_shape() {
    let request = ClientServerRequest::from(
        Instruction::builder(InstructionsType::ClientServerStartExecution)
            .parameter("Scenario", "Throughput")
            .build()
            .unwrap(),
    );
    let value: serde_json::Value = serde_json::from_str(&wire::to_json(&request).unwrap()).unwrap();

    assert_eq!(
        value,
        serde_json::json!({
            "type": "ClientServerStartExecution",
            "properties": { "Scenario": "Throughput" }
        })
    );
}

#[test]
fn test_decode_accepts_ordinals_and_ignores_unknown_fields() {
    let decoded = wire::instruction_from_json(
        r#"{"type": 2, "properties": {"Force": true, "Note": null}, "origin": "client-01"}"#,
    )
    .unwrap();

    assert_eq!(decoded.kind(), InstructionsType::ClientServerReset);
    assert_eq!(decoded.parameters().len(), 1);
    assert!(decoded.parameters().get::<bool>("force").unwrap());
}

#[test]
fn test_decode_failures() {
    let missing_type = wire::instruction_from_json(r#"{"properties": {}}"#).unwrap_err();
    assert!(matches!(missing_type, LockstepError::SchemaValidation { .. }));

    let nested = wire::instruction_from_json(r#"{"type": "Profiling", "properties": {"x": [1]}}"#)
        .unwrap_err();
    assert!(matches!(nested, LockstepError::SchemaValidation { .. }));

    let unknown = wire::instruction_from_json(r#"{"type": "Teleport"}"#).unwrap_err();
    assert_eq!(unknown.category(), "serialization");

    let undefined = wire::instruction_from_json(r#"{"type": 0}"#);
    assert!(undefined.is_err());
}

#[test]
fn test_profiling_periods_round_trip_through_envelope() {
    let instruction =
        ProfilerInstructions::create(Duration::from_secs(3600 + 30), Duration::from_millis(1500), None)
            .unwrap();
    let item = Item::new("profile-1", instruction);

    let decoded = wire::instruction_item_from_json(&wire::to_json(&item).unwrap()).unwrap();
    let view = ProfilerInstructions::new(&decoded.definition).unwrap();

    assert_eq!(decoded.id, "profile-1");
    assert_eq!(view.profiling_period().unwrap(), Duration::from_secs(3630));
    assert_eq!(view.profiling_warm_up_period().unwrap(), Duration::from_millis(1500));
    assert_eq!(view.profiling_scenario().unwrap(), None);
    assert_eq!(
        decoded.definition.parameters().get::<String>("ProfilingPeriod").unwrap(),
        "01:00:30"
    );
}

#[test]
fn test_parameter_key_set_is_fixed() {
    let mut instruction = Instruction::new(
        InstructionsType::ClientServerStartStopExecution,
        PropertyBag::new().with("Timeout", 30),
    )
    .unwrap();

    instruction.set_parameter_value("TIMEOUT", 45).unwrap();
    assert_eq!(instruction.parameters().get::<i64>("timeout").unwrap(), 45);
    assert!(instruction.set_parameter_value("Retries", 3).is_err());
    assert_eq!(instruction.parameters().len(), 1);
}
