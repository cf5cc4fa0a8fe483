use crate::core::errors::{LockstepError, Result};
use crate::state::property_bag::{match_variant, FromProperty, PropertyBag, PropertyValue};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;

/// The kind of work or transition an instruction asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionsType {
    Undefined,
    Profiling,
    ClientServerReset,
    ClientServerStartExecution,
    ClientServerStartStopExecution,
    ClientServerExit,
}

impl InstructionsType {
    const VARIANTS: [(InstructionsType, &'static str); 6] = [
        (InstructionsType::Undefined, "Undefined"),
        (InstructionsType::Profiling, "Profiling"),
        (InstructionsType::ClientServerReset, "ClientServerReset"),
        (InstructionsType::ClientServerStartExecution, "ClientServerStartExecution"),
        (InstructionsType::ClientServerStartStopExecution, "ClientServerStartStopExecution"),
        (InstructionsType::ClientServerExit, "ClientServerExit"),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::VARIANTS[*self as usize].1
    }

    /// Parse a name (any casing) or an ordinal. `Undefined` is rejected.
    pub fn parse(value: &PropertyValue) -> Result<Self> {
        match match_variant(value, &Self::VARIANTS) {
            Some(InstructionsType::Undefined) | None => {
                Err(LockstepError::invalid_instruction_type(value.to_string()))
            }
            Some(kind) => Ok(kind),
        }
    }
}

impl fmt::Display for InstructionsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstructionsType {
    type Err = LockstepError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&PropertyValue::from(s))
    }
}

impl FromProperty for InstructionsType {
    const EXPECTED: &'static str = "InstructionsType";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match_variant(value, &Self::VARIANTS)
    }
}

impl Serialize for InstructionsType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InstructionsType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let value = PropertyValue::from_json(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid instruction type: {}", raw)))?;
        InstructionsType::parse(&value).map_err(de::Error::custom)
    }
}

/// A component the receiving side should run for an instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub parameters: PropertyBag,
}

impl ComponentSpec {
    pub fn new<S: Into<String>>(type_name: S, parameters: PropertyBag) -> Self {
        Self {
            type_name: type_name.into(),
            parameters,
        }
    }
}

/// A typed request for work or a status transition.
///
/// The type and the parameter key set are fixed at construction; only the
/// values of existing parameters can change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    #[serde(rename = "type")]
    kind: InstructionsType,
    properties: PropertyBag,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    components: Vec<ComponentSpec>,
}

impl Instruction {
    pub fn new(kind: InstructionsType, parameters: PropertyBag) -> Result<Self> {
        if kind == InstructionsType::Undefined {
            return Err(LockstepError::invalid_instruction_type(kind.as_str()));
        }
        Ok(Self {
            kind,
            properties: parameters,
            components: Vec::new(),
        })
    }

    pub fn builder(kind: InstructionsType) -> InstructionBuilder {
        InstructionBuilder {
            kind,
            parameters: PropertyBag::new(),
            components: Vec::new(),
        }
    }

    pub fn kind(&self) -> InstructionsType {
        self.kind
    }

    pub fn parameters(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn components(&self) -> &[ComponentSpec] {
        &self.components
    }

    /// Change the value of a parameter that already exists
    pub fn set_parameter_value<V: Into<PropertyValue>>(&mut self, key: &str, value: V) -> Result<()> {
        // Keep the key's original casing.
        let stored = self
            .properties
            .stored_key(key)
            .ok_or_else(|| LockstepError::missing_property(key))?
            .to_string();
        self.properties.set(stored, value);
        Ok(())
    }

    /// Same instruction with every parameter value passed through `f`. The
    /// type, key set and components are untouched.
    pub fn map_parameters<F>(&self, f: F) -> Result<Instruction>
    where
        F: FnMut(&str, &PropertyValue) -> Result<PropertyValue>,
    {
        Ok(Instruction {
            kind: self.kind,
            properties: self.properties.map_values(f)?,
            components: self.components.clone(),
        })
    }
}

#[derive(Deserialize)]
struct RawInstruction {
    #[serde(rename = "type")]
    kind: InstructionsType,
    #[serde(default)]
    properties: Option<PropertyBag>,
    #[serde(default)]
    components: Option<Vec<ComponentSpec>>,
}

impl<'de> Deserialize<'de> for Instruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawInstruction::deserialize(deserializer)?;
        Ok(Instruction {
            kind: raw.kind,
            properties: raw.properties.unwrap_or_default(),
            components: raw.components.unwrap_or_default(),
        })
    }
}

/// Collects parameters and components ahead of construction
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    kind: InstructionsType,
    parameters: PropertyBag,
    components: Vec<ComponentSpec>,
}

impl InstructionBuilder {
    pub fn parameter<K: Into<String>, V: Into<PropertyValue>>(mut self, key: K, value: V) -> Self {
        self.parameters.set(key, value);
        self
    }

    pub fn parameters(mut self, parameters: &PropertyBag) -> Self {
        self.parameters.add_range(parameters);
        self
    }

    pub fn component<S: Into<String>>(mut self, type_name: S, parameters: PropertyBag) -> Self {
        self.components.push(ComponentSpec::new(type_name, parameters));
        self
    }

    pub fn build(self) -> Result<Instruction> {
        let mut instruction = Instruction::new(self.kind, self.parameters)?;
        instruction.components = self.components;
        Ok(instruction)
    }
}

/// An instruction travelling from a client to its server(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientServerRequest(Instruction);

impl ClientServerRequest {
    pub fn new(kind: InstructionsType, parameters: PropertyBag) -> Result<Self> {
        Instruction::new(kind, parameters).map(Self)
    }

    pub fn instruction(&self) -> &Instruction {
        &self.0
    }

    pub fn into_inner(self) -> Instruction {
        self.0
    }
}

impl Deref for ClientServerRequest {
    type Target = Instruction;

    fn deref(&self) -> &Instruction {
        &self.0
    }
}

impl From<Instruction> for ClientServerRequest {
    fn from(instruction: Instruction) -> Self {
        Self(instruction)
    }
}

const PROFILING_PERIOD: &str = "ProfilingPeriod";
const PROFILING_WARM_UP_PERIOD: &str = "ProfilingWarmUpPeriod";
const PROFILING_SCENARIO: &str = "ProfilingScenario";

/// Typed view over a `Profiling` instruction
#[derive(Debug, Clone, Copy)]
pub struct ProfilerInstructions<'a> {
    instruction: &'a Instruction,
}

impl<'a> ProfilerInstructions<'a> {
    pub fn new(instruction: &'a Instruction) -> Result<Self> {
        if instruction.kind() != InstructionsType::Profiling {
            return Err(LockstepError::invalid_instruction_type(instruction.kind().as_str()));
        }
        Ok(Self { instruction })
    }

    /// Build a `Profiling` instruction carrying the given periods
    pub fn create(
        period: Duration,
        warm_up: Duration,
        scenario: Option<&str>,
    ) -> Result<Instruction> {
        let mut builder = Instruction::builder(InstructionsType::Profiling)
            .parameter(PROFILING_PERIOD, period)
            .parameter(PROFILING_WARM_UP_PERIOD, warm_up);
        if let Some(scenario) = scenario {
            builder = builder.parameter(PROFILING_SCENARIO, scenario);
        }
        builder.build()
    }

    pub fn profiling_period(&self) -> Result<Duration> {
        self.instruction
            .parameters()
            .get_or(PROFILING_PERIOD, Duration::ZERO)
    }

    pub fn profiling_warm_up_period(&self) -> Result<Duration> {
        self.instruction
            .parameters()
            .get_or(PROFILING_WARM_UP_PERIOD, Duration::ZERO)
    }

    pub fn profiling_scenario(&self) -> Result<Option<String>> {
        crate::state::state::optional(self.instruction.parameters(), PROFILING_SCENARIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_is_rejected() {
        let err = Instruction::new(InstructionsType::Undefined, PropertyBag::new()).unwrap_err();
        assert_eq!(err.category(), "instruction");

        assert!("Bogus".parse::<InstructionsType>().is_err());
        assert!("0".parse::<InstructionsType>().is_err());
        assert_eq!(
            "clientserverexit".parse::<InstructionsType>().unwrap(),
            InstructionsType::ClientServerExit
        );
        assert_eq!("3".parse::<InstructionsType>().unwrap(), InstructionsType::ClientServerStartExecution);
    }

    #[test]
    fn test_set_parameter_value_existing_only() {
        let mut instruction = Instruction::builder(InstructionsType::ClientServerReset)
            .parameter("Scenario", "Reset1")
            .build()
            .unwrap();

        instruction.set_parameter_value("scenario", "Reset2").unwrap();
        assert_eq!(instruction.parameters().get::<String>("Scenario").unwrap(), "Reset2");
        assert_eq!(instruction.parameters().keys().collect::<Vec<_>>(), vec!["Scenario"]);

        let mut localized = Instruction::builder(InstructionsType::ClientServerReset)
            .parameter("Größe", 1)
            .build()
            .unwrap();
        localized.set_parameter_value("GRÖßE", 2).unwrap();
        assert_eq!(localized.parameters().keys().collect::<Vec<_>>(), vec!["Größe"]);

        let err = instruction.set_parameter_value("Extra", 1).unwrap_err();
        assert!(matches!(err, LockstepError::MissingProperty { .. }));
        assert_eq!(instruction.parameters().len(), 1);
    }

    #[test]
    fn test_json_shape_and_null_properties() {
        let instruction = Instruction::builder(InstructionsType::Profiling)
            .parameter("duration", "60")
            .component("ExampleWorkload", PropertyBag::new().with("Threads", 4))
            .build()
            .unwrap();
        let json = serde_json::to_value(&instruction).unwrap();
        assert_eq!(json["type"], "Profiling");
        assert_eq!(json["properties"]["duration"], "60");
        assert_eq!(json["components"][0]["type"], "ExampleWorkload");

        let decoded: Instruction =
            serde_json::from_str(r#"{"type": 5, "properties": null, "ignored": true}"#).unwrap();
        assert_eq!(decoded.kind(), InstructionsType::ClientServerExit);
        assert!(decoded.parameters().is_empty());
        assert!(decoded.components().is_empty());

        assert!(serde_json::from_str::<Instruction>(r#"{"properties": {}}"#).is_err());
        assert!(serde_json::from_str::<Instruction>(r#"{"type": "Undefined"}"#).is_err());
    }

    #[test]
    fn test_profiler_view() {
        let instruction = ProfilerInstructions::create(
            Duration::from_secs(120),
            Duration::from_secs(15),
            Some("Burst"),
        )
        .unwrap();
        let view = ProfilerInstructions::new(&instruction).unwrap();

        assert_eq!(view.profiling_period().unwrap(), Duration::from_secs(120));
        assert_eq!(view.profiling_warm_up_period().unwrap(), Duration::from_secs(15));
        assert_eq!(view.profiling_scenario().unwrap().as_deref(), Some("Burst"));

        let exit = Instruction::new(InstructionsType::ClientServerExit, PropertyBag::new()).unwrap();
        assert!(ProfilerInstructions::new(&exit).is_err());
    }
}
